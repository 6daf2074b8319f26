//! Stand-in capabilities and frame sources for daemon tests.

use moodlens_core::{
    DetectorError, FaceDetector, FaceObservation, HandDetector, HandObservation, LandmarkPoint,
    LandmarkSet,
};
use moodlens_hw::{CameraError, Frame, FrameSource};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tracks how many estimates run at once.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
    fn enter(&self) -> ProbeGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        ProbeGuard {
            active: self.active.clone(),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct ProbeGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A full-size mesh with a wide, closed smile and a relaxed brow.
pub fn smiling_mesh() -> LandmarkSet {
    let mut points = vec![LandmarkPoint::new(320.0, 240.0); 468];
    let anchors = [
        (61, 280.0, 300.0),
        (291, 360.0, 300.0),
        (13, 320.0, 295.0),
        (14, 320.0, 305.0),
        (70, 270.0, 180.0),
        (107, 300.0, 180.0),
        (300, 370.0, 180.0),
        (336, 340.0, 180.0),
        (159, 285.0, 200.0),
        (145, 285.0, 210.0),
        (386, 355.0, 200.0),
        (374, 355.0, 210.0),
    ];
    for (i, x, y) in anchors {
        points[i] = LandmarkPoint::new(x, y);
    }
    LandmarkSet::new(points)
}

pub struct StubFace {
    landmarks: Option<LandmarkSet>,
    fail: bool,
    delay: Duration,
    probe: ConcurrencyProbe,
}

impl StubFace {
    pub fn smiling() -> Self {
        Self {
            landmarks: Some(smiling_mesh()),
            fail: false,
            delay: Duration::ZERO,
            probe: ConcurrencyProbe::default(),
        }
    }

    /// Finds no face in any frame.
    pub fn empty() -> Self {
        Self {
            landmarks: None,
            ..Self::smiling()
        }
    }

    /// Every estimate fails with an inference error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::smiling()
        }
    }

    /// Blocks for `delay` per estimate and records concurrency in `probe`.
    pub fn slow(delay: Duration, probe: &ConcurrencyProbe) -> Self {
        Self {
            delay,
            probe: probe.clone(),
            ..Self::smiling()
        }
    }
}

impl FaceDetector for StubFace {
    fn estimate(&mut self, _: &[u8], _: u32, _: u32) -> Result<Vec<FaceObservation>, DetectorError> {
        let _guard = self.probe.enter();
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.fail {
            return Err(DetectorError::InferenceFailed("stub failure".into()));
        }
        Ok(self
            .landmarks
            .iter()
            .map(|landmarks| FaceObservation {
                bounding_box: landmarks.bounds(),
                landmarks: landmarks.clone(),
                confidence: 0.95,
            })
            .collect())
    }
}

/// Sees one 21-point hand when `present`, otherwise nothing.
#[derive(Debug, Default)]
pub struct StubHand {
    pub present: bool,
}

impl HandDetector for StubHand {
    fn estimate(&mut self, _: &[u8], _: u32, _: u32) -> Result<Vec<HandObservation>, DetectorError> {
        if !self.present {
            return Ok(Vec::new());
        }
        let landmarks =
            LandmarkSet::new((0..21).map(|i| LandmarkPoint::new(100.0 + i as f32, 50.0)).collect());
        Ok(vec![HandObservation {
            bounding_box: landmarks.bounds(),
            landmarks,
            confidence: 0.8,
        }])
    }
}

/// In-memory frame source. `ended` can be flipped from outside to simulate
/// the device stream ending on its own.
pub struct FakeSource {
    pub ended: Arc<AtomicBool>,
    pub stops: Arc<AtomicUsize>,
    frames_left: Option<usize>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            ended: Arc::new(AtomicBool::new(false)),
            stops: Arc::new(AtomicUsize::new(0)),
            frames_left: None,
        }
    }

    /// Delivers `frames` frames, then fails the way an unplugged camera does.
    pub fn ending_after(frames: usize) -> Self {
        Self {
            frames_left: Some(frames),
            ..Self::new()
        }
    }
}

impl FrameSource for FakeSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        if let Some(left) = self.frames_left.as_mut() {
            if *left == 0 {
                self.ended.store(true, Ordering::SeqCst);
                return Err(CameraError::Disconnected("/dev/video-fake: no such device".into()));
            }
            *left -= 1;
        }
        Ok(Frame::from_gray(vec![128; 64 * 48], 64, 48))
    }

    fn dimensions(&self) -> (u32, u32) {
        (64, 48)
    }

    fn is_live(&self) -> bool {
        !self.ended.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        self.ended.store(true, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}
