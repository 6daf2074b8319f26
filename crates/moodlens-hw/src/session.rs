//! Capture session: sole owner of the active frame source.
//!
//! State moves `Requesting → Active → Released` and is published on a
//! `watch` channel so the scheduler can wait for readiness without polling
//! the device.

use crate::camera::{Camera, CameraError, CaptureConstraints, FrameSource};
use crate::frame::Frame;
use serde::Serialize;
use tokio::sync::watch;

/// Lifecycle of the session's device stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum CaptureState {
    /// No stream has been requested yet.
    Idle,
    Requesting,
    /// Stream metadata is known and frames can be read.
    Active { width: u32, height: u32 },
    Released,
}

impl CaptureState {
    pub fn is_active(&self) -> bool {
        matches!(self, CaptureState::Active { .. })
    }
}

/// Owns at most one frame source at a time.
pub struct CaptureSession {
    source: Option<Box<dyn FrameSource>>,
    state: watch::Sender<CaptureState>,
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSession {
    pub fn new() -> Self {
        let (state, _) = watch::channel(CaptureState::Idle);
        Self {
            source: None,
            state,
        }
    }

    /// Open a V4L2 camera. Any previously attached source is closed first.
    ///
    /// A denied device yields [`CameraError::PermissionDenied`]; the session
    /// is left `Released`.
    pub fn open(&mut self, constraints: &CaptureConstraints) -> Result<(), CameraError> {
        self.close();
        self.state.send_replace(CaptureState::Requesting);

        match Camera::open(constraints) {
            Ok(camera) => {
                self.attach(Box::new(camera));
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "camera open failed");
                self.state.send_replace(CaptureState::Released);
                Err(e)
            }
        }
    }

    /// Take ownership of an already-open source and signal readiness.
    pub fn attach(&mut self, source: Box<dyn FrameSource>) {
        self.close();
        let (width, height) = source.dimensions();
        self.source = Some(source);
        tracing::info!(width, height, "capture session active");
        self.state.send_replace(CaptureState::Active { width, height });
    }

    /// Stop the source's stream. Safe to call repeatedly; only the first call
    /// after an attach stops anything, and a source whose stream already
    /// ended is released without being stopped again.
    pub fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            if source.is_live() {
                source.stop();
            }
            tracing::info!("capture session released");
            self.state.send_replace(CaptureState::Released);
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe(&self) -> watch::Receiver<CaptureState> {
        self.state.subscribe()
    }

    /// True while a source is attached and its stream has not ended.
    pub fn is_live(&self) -> bool {
        self.source.as_ref().is_some_and(|s| s.is_live())
    }

    /// Read the next frame. If the source reports its stream ended, the
    /// session is released and later reads return [`CameraError::Stopped`].
    pub fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let Some(source) = self.source.as_mut().filter(|s| s.is_live()) else {
            return Err(CameraError::Stopped);
        };
        let result = source.next_frame();
        if result.is_err() && !source.is_live() {
            tracing::warn!("capture stream ended mid-session");
            self.close();
        }
        result
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}
