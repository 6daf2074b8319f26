//! Fixed-rate detection loop.
//!
//! A tokio interval drives ticks. Each tick starts at most one cycle on the
//! blocking pool; ticks that arrive while a cycle is running are dropped, not
//! queued. A cycle that fails in the model path is answered with simulated
//! scores so that observers always see a result.

use crate::sink::{Notice, ResultSink};
use chrono::Utc;
use moodlens_core::{
    CycleDiagnostics, DetectionMode, DetectionResult, DetectorError, EmotionScorer,
    FallbackSimulator, FaceMeta, HandMeta, LandmarkFeatureExtractor, ModelBundle,
};
use moodlens_hw::{CameraError, CaptureSession, CaptureState};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("frame capture failed: {0}")]
    Capture(#[from] CameraError),
    #[error("model inference failed: {0}")]
    Model(#[from] DetectorError),
}

/// Decided once per session from the load outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionMode {
    ModelBacked,
    /// Models are unavailable; every cycle is simulated.
    Degraded,
}

/// Everything one cycle touches. Guarded by a mutex so that the scheduler can
/// hand it to the blocking pool.
pub struct CycleRunner {
    capture: CaptureSession,
    models: ModelBundle,
    mode: SessionMode,
    extractor: LandmarkFeatureExtractor,
    scorer: EmotionScorer,
    simulator: FallbackSimulator,
    rng: StdRng,
}

impl CycleRunner {
    pub fn new(capture: CaptureSession, models: ModelBundle) -> Self {
        let mode = if models.is_loaded() {
            SessionMode::ModelBacked
        } else {
            SessionMode::Degraded
        };
        tracing::info!(?mode, "detection session configured");
        Self {
            capture,
            models,
            mode,
            extractor: LandmarkFeatureExtractor::new(),
            scorer: EmotionScorer::new(),
            simulator: FallbackSimulator::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Replace the random source, for repeatable runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn capture(&self) -> &CaptureSession {
        &self.capture
    }

    pub fn capture_mut(&mut self) -> &mut CaptureSession {
        &mut self.capture
    }

    /// Run one detection cycle. `None` when the capture stream is not live.
    pub fn run_cycle(&mut self) -> Option<DetectionResult> {
        if !self.capture.is_live() {
            return None;
        }
        let started = Instant::now();
        let now = Utc::now();

        let mut result = match self.mode {
            SessionMode::Degraded => self.simulated(now, None),
            SessionMode::ModelBacked => match self.infer(now) {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(error = %e, "detection cycle failed; using simulated scores");
                    self.simulated(now, Some(e.to_string()))
                }
            },
        };
        result.diagnostics.cycle_ms = started.elapsed().as_secs_f64() * 1000.0;
        Some(result)
    }

    fn infer(&mut self, now: chrono::DateTime<Utc>) -> Result<DetectionResult, DetectionError> {
        let frame = self.capture.next_frame()?;
        let faces = self.models.face.estimate(&frame.data, frame.width, frame.height)?;
        let hands = self.models.hand.estimate(&frame.data, frame.width, frame.height)?;

        let face = faces.first();
        let features = face.and_then(|f| self.extractor.extract(&f.landmarks));
        let distribution = self.scorer.score(features.as_ref(), &mut self.rng);

        let mut result = DetectionResult::new(distribution, DetectionMode::Ai, now);
        result.face = face.map(|f| FaceMeta {
            confidence: f.confidence,
            bounding_box: f.bounding_box,
            landmark_count: f.landmarks.len(),
        });
        result.hand = hands.first().map(|h| HandMeta {
            hands_detected: hands.len(),
            confidence: h.confidence,
            landmark_count: h.landmarks.len(),
        });
        result.diagnostics = CycleDiagnostics {
            landmark_count: face.map_or(0, |f| f.landmarks.len()),
            hand_count: hands.len(),
            features,
            ..Default::default()
        };
        Ok(result)
    }

    fn simulated(
        &mut self,
        now: chrono::DateTime<Utc>,
        fallback_reason: Option<String>,
    ) -> DetectionResult {
        let distribution = self.simulator.simulate(now.timestamp_millis(), &mut self.rng);
        let mut result = DetectionResult::new(distribution, DetectionMode::Fallback, now);
        result.diagnostics.fallback_reason = fallback_reason;
        result
    }
}

/// Scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    /// Capture is ready and the timer is running.
    Armed,
    /// At least one cycle has been started.
    Ticking,
}

#[derive(Debug, Default)]
pub struct SchedulerStats {
    cycles_completed: AtomicU64,
    ticks_skipped_in_flight: AtomicU64,
    ticks_skipped_not_ready: AtomicU64,
    cycles_recovered: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub cycles_completed: u64,
    pub ticks_skipped_in_flight: u64,
    pub ticks_skipped_not_ready: u64,
    /// Model-path cycles answered with simulated scores.
    pub cycles_recovered: u64,
}

impl SchedulerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            ticks_skipped_in_flight: self.ticks_skipped_in_flight.load(Ordering::Relaxed),
            ticks_skipped_not_ready: self.ticks_skipped_not_ready.load(Ordering::Relaxed),
            cycles_recovered: self.cycles_recovered.load(Ordering::Relaxed),
        }
    }
}

/// Holds the in-flight flag for one cycle and clears it on drop, including
/// when the cycle panics.
struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct DetectionScheduler {
    period: Duration,
    runner: Arc<Mutex<CycleRunner>>,
    capture_state: watch::Receiver<CaptureState>,
    sink: Arc<ResultSink>,
    stats: Arc<SchedulerStats>,
    in_flight: Arc<AtomicBool>,
    faulted: Arc<AtomicBool>,
    state: watch::Sender<SchedulerState>,
}

impl DetectionScheduler {
    pub fn new(
        period: Duration,
        runner: Arc<Mutex<CycleRunner>>,
        capture_state: watch::Receiver<CaptureState>,
        sink: Arc<ResultSink>,
        stats: Arc<SchedulerStats>,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            period,
            runner,
            capture_state,
            sink,
            stats,
            in_flight: Arc::new(AtomicBool::new(false)),
            faulted: Arc::new(AtomicBool::new(false)),
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Wait for capture readiness, then tick until `shutdown` turns true (or
    /// its sender is dropped). Always ends by releasing the capture device.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let armed = tokio::select! {
            ready = self.capture_state.wait_for(|s| s.is_active()) => ready.is_ok(),
            _ = shutdown.wait_for(|&stop| stop) => false,
        };
        if !armed {
            tracing::debug!("scheduler stopped before capture was ready");
            self.teardown(None).await;
            return;
        }

        self.state.send_replace(SchedulerState::Armed);
        tracing::info!(period_ms = self.period.as_millis() as u64, "detection scheduler armed");

        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut current: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = shutdown.wait_for(|&stop| stop) => break,
                _ = ticker.tick() => {
                    if let Some(handle) = self.tick() {
                        current = Some(handle);
                    }
                }
            }
        }

        self.teardown(current).await;
    }

    fn tick(&self) -> Option<JoinHandle<()>> {
        if self.faulted.load(Ordering::Acquire) {
            return None;
        }
        if !self.capture_state.borrow().is_active() {
            self.stats.ticks_skipped_not_ready.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let Some(guard) = InFlightGuard::acquire(&self.in_flight) else {
            self.stats.ticks_skipped_in_flight.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("previous cycle still running; tick dropped");
            return None;
        };
        self.state.send_if_modified(|s| {
            let changed = *s != SchedulerState::Ticking;
            *s = SchedulerState::Ticking;
            changed
        });

        let runner = self.runner.clone();
        let sink = self.sink.clone();
        let stats = self.stats.clone();
        let faulted = self.faulted.clone();

        Some(tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let outcome = match runner.lock() {
                Ok(mut runner) => runner.run_cycle(),
                Err(_) => {
                    if !faulted.swap(true, Ordering::AcqRel) {
                        tracing::error!("detection cycle panicked; scheduler halted");
                        sink.notify(Notice::Fatal("mood detection stopped unexpectedly".into()));
                    }
                    return;
                }
            };
            match outcome {
                Some(result) => {
                    if result.diagnostics.fallback_reason.is_some() {
                        stats.cycles_recovered.fetch_add(1, Ordering::Relaxed);
                    }
                    stats.cycles_completed.fetch_add(1, Ordering::Relaxed);
                    sink.publish(result);
                }
                None => {
                    stats.ticks_skipped_not_ready.fetch_add(1, Ordering::Relaxed);
                }
            }
        }))
    }

    /// Stop accepting ticks, let the last cycle finish, then release capture.
    async fn teardown(&self, current: Option<JoinHandle<()>>) {
        if let Some(handle) = current {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "last detection cycle did not complete");
            }
        }
        self.runner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .capture_mut()
            .close();
        self.state.send_replace(SchedulerState::Idle);
        tracing::info!(stats = ?self.stats.snapshot(), "detection scheduler stopped");
    }
}
