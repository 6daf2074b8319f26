//! moodlens-hw — Camera capture for the detection loop.
//!
//! Provides V4L2-based camera access and a capture session that owns the
//! device stream and signals when frames are available.

pub mod camera;
pub mod frame;
pub mod session;

pub use camera::{CameraError, CaptureConstraints, DeviceInfo, FacingMode, FrameSource};
pub use camera::Camera;
pub use frame::Frame;
pub use session::{CaptureSession, CaptureState};
