//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("no video capture device available")]
    NoDevice,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("stream stopped")]
    Stopped,
    #[error("device disconnected: {0}")]
    Disconnected(String),
}

/// Buffers queued in the capture stream.
const STREAM_BUFFERS: u32 = 4;
/// Longest wait for one frame before the dequeue is abandoned.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(2);

/// Which way the requested camera should face.
///
/// V4L2 exposes no facing metadata; built-in webcams enumerate first and
/// face the user, so `User` resolves to the first capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    #[default]
    User,
    Environment,
}

/// Requested capture configuration. Width and height are preferences the
/// driver may adjust.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConstraints {
    /// Explicit device path; `None` picks a device by `facing`.
    pub device: Option<String>,
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub facing: FacingMode,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            device: None,
            ideal_width: 640,
            ideal_height: 480,
            facing: FacingMode::User,
        }
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
}

/// A live source of frames owned by a capture session.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;

    /// Negotiated (width, height).
    fn dimensions(&self) -> (u32, u32);

    /// False once the underlying stream has ended or been stopped.
    fn is_live(&self) -> bool;

    /// Stop the underlying stream. Called at most once by the owning session,
    /// and only while the source is live.
    fn stop(&mut self);
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    /// Started on the first capture; dropped (STREAMOFF) by `stop`.
    stream: Option<MmapStream<'static>>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
    live: bool,
}

impl Camera {
    /// Open a camera matching `constraints`.
    pub fn open(constraints: &CaptureConstraints) -> Result<Self, CameraError> {
        let device_path = match &constraints.device {
            Some(path) => path.clone(),
            None => select_device(constraints.facing)?,
        };

        if !Path::new(&device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path));
        }

        let device = Device::with_path(&device_path).map_err(|e| classify_open_error(&device_path, e))?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = %device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = constraints.ideal_width;
        fmt.height = constraints.ideal_height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV or GREY)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            requested_width = constraints.ideal_width,
            requested_height = constraints.ideal_height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            stream: None,
            width: negotiated.width,
            height: negotiated.height,
            device_path,
            fourcc,
            pixel_format,
            live: true,
        })
    }

    /// Capture the next frame from the session stream, converting to
    /// grayscale if needed. The stream is started on first use and runs
    /// until [`FrameSource::stop`].
    ///
    /// A dequeue that fails because the device went away ends the stream;
    /// the camera reports not-live from then on.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        if !self.live {
            return Err(CameraError::Stopped);
        }

        if self.stream.is_none() {
            let mut stream =
                MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
                    .map_err(|e| {
                        CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
                    })?;
            stream.set_timeout(DEQUEUE_TIMEOUT);
            tracing::debug!(device = %self.device_path, "capture stream started");
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(CameraError::Stopped);
        };

        let (pixel_format, width, height) = (self.pixel_format, self.width, self.height);
        let dequeued = match stream.next() {
            Ok((buf, meta)) => Ok((to_grayscale(pixel_format, buf, width, height), meta.sequence)),
            Err(e) => Err(e),
        };

        let (gray, sequence) = match dequeued {
            Ok((gray, sequence)) => (gray?, sequence),
            Err(e) if stream_ended(&e) => {
                tracing::warn!(device = %self.device_path, error = %e, "capture stream ended");
                self.stream = None;
                self.live = false;
                return Err(CameraError::Disconnected(format!("{}: {e}", self.device_path)));
            }
            Err(e) => {
                return Err(CameraError::CaptureFailed(format!(
                    "failed to dequeue buffer: {e}"
                )))
            }
        };
        let is_dark = frame::is_dark_frame(&gray, 0.95);

        Ok(Frame {
            data: gray,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
            is_dark,
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        scan_nodes()
            .into_iter()
            .filter_map(|(_, node)| match node {
                Node::Capture(info) => Some(info),
                Node::Other | Node::Unreadable(_) => None,
            })
            .collect()
    }
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn is_live(&self) -> bool {
        self.live
    }

    fn stop(&mut self) {
        if self.live {
            // Dropping the stream issues STREAMOFF and unmaps the buffers.
            self.stream = None;
            self.live = false;
            tracing::info!(device = %self.device_path, "camera stream stopped");
        }
    }
}

fn to_grayscale(
    pixel_format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, CameraError> {
    let pixels = (width * height) as usize;

    match pixel_format {
        PixelFormat::Grey => {
            if buf.len() < pixels {
                return Err(CameraError::CaptureFailed(format!(
                    "GREY buffer too short: expected {pixels}, got {}",
                    buf.len()
                )));
            }
            Ok(buf[..pixels].to_vec())
        }
        PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, width, height)
            .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
    }
}

/// What a `/dev/videoN` node turned out to be.
#[derive(Debug)]
enum Node {
    Capture(DeviceInfo),
    /// Opened, but not a video capture node (metadata or output).
    Other,
    Unreadable(io::Error),
}

fn scan_nodes() -> Vec<(String, Node)> {
    (0..16)
        .map(|i| format!("/dev/video{i}"))
        .filter(|path| Path::new(path).exists())
        .map(|path| {
            let node = inspect_node(&path);
            (path, node)
        })
        .collect()
}

fn inspect_node(path: &str) -> Node {
    let caps = match Device::with_path(path).and_then(|dev| dev.query_caps()) {
        Ok(caps) => caps,
        Err(e) => return Node::Unreadable(e),
    };
    if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
        return Node::Other;
    }
    Node::Capture(DeviceInfo {
        path: path.to_string(),
        name: caps.card.clone(),
        driver: caps.driver.clone(),
        bus: caps.bus.clone(),
    })
}

fn select_device(facing: FacingMode) -> Result<String, CameraError> {
    choose_device(scan_nodes(), facing)
}

/// Pick a capture node by facing preference. With no usable node, a node
/// that refused access is reported as `PermissionDenied` rather than
/// `NoDevice`.
fn choose_device<I>(nodes: I, facing: FacingMode) -> Result<String, CameraError>
where
    I: IntoIterator<Item = (String, Node)>,
{
    let mut usable = Vec::new();
    let mut denied = None;
    for (path, node) in nodes {
        match node {
            Node::Capture(_) => usable.push(path),
            Node::Other => {}
            Node::Unreadable(e) => match classify_open_error(&path, e) {
                CameraError::PermissionDenied(path) => {
                    tracing::warn!(device = %path, "camera access denied");
                    if denied.is_none() {
                        denied = Some(path);
                    }
                }
                other => tracing::debug!(device = %path, error = %other, "skipping device"),
            },
        }
    }

    let chosen = match facing {
        FacingMode::User => usable.first(),
        FacingMode::Environment => usable.last(),
    };
    match (chosen, denied) {
        (Some(path), _) => Ok(path.clone()),
        (None, Some(path)) => Err(CameraError::PermissionDenied(path)),
        (None, None) => Err(CameraError::NoDevice),
    }
}

/// Dequeue errors meaning the device is gone rather than slow.
fn stream_ended(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(ENODEV) | Some(EIO))
}

fn classify_open_error(device_path: &str, e: io::Error) -> CameraError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => CameraError::PermissionDenied(device_path.to_string()),
        _ if e.raw_os_error() == Some(EBUSY) || e.to_string().contains("busy") => {
            CameraError::DeviceBusy
        }
        _ => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
    }
}

const EIO: i32 = 5;
const EBUSY: i32 = 16;
const ENODEV: i32 = 19;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constraints() {
        let c = CaptureConstraints::default();
        assert_eq!((c.ideal_width, c.ideal_height), (640, 480));
        assert_eq!(c.facing, FacingMode::User);
        assert!(c.device.is_none());
    }

    #[test]
    fn test_permission_error_classified() {
        let e = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(matches!(
            classify_open_error("/dev/video0", e),
            CameraError::PermissionDenied(p) if p == "/dev/video0"
        ));
    }

    #[test]
    fn test_busy_error_classified() {
        let e = io::Error::from_raw_os_error(EBUSY);
        assert!(matches!(classify_open_error("/dev/video0", e), CameraError::DeviceBusy));
    }

    #[test]
    fn test_open_missing_device() {
        let c = CaptureConstraints {
            device: Some("/dev/video-does-not-exist".into()),
            ..Default::default()
        };
        assert!(matches!(Camera::open(&c), Err(CameraError::DeviceNotFound(_))));
    }

    fn capture(path: &str) -> (String, Node) {
        let info = DeviceInfo {
            path: path.into(),
            name: "cam".into(),
            driver: "uvcvideo".into(),
            bus: "usb".into(),
        };
        (path.into(), Node::Capture(info))
    }

    fn denied(path: &str) -> (String, Node) {
        (
            path.into(),
            Node::Unreadable(io::Error::from(io::ErrorKind::PermissionDenied)),
        )
    }

    #[test]
    fn test_only_denied_devices_report_permission() {
        let nodes = vec![denied("/dev/video0"), ("/dev/video1".into(), Node::Other)];
        assert!(matches!(
            choose_device(nodes, FacingMode::User),
            Err(CameraError::PermissionDenied(p)) if p == "/dev/video0"
        ));
    }

    #[test]
    fn test_usable_device_wins_over_denied() {
        let nodes = vec![denied("/dev/video0"), capture("/dev/video2")];
        assert_eq!(choose_device(nodes, FacingMode::User).unwrap(), "/dev/video2");
    }

    #[test]
    fn test_no_nodes_is_no_device() {
        let busy = (
            "/dev/video0".to_string(),
            Node::Unreadable(io::Error::from_raw_os_error(EBUSY)),
        );
        assert!(matches!(
            choose_device(Vec::new(), FacingMode::User),
            Err(CameraError::NoDevice)
        ));
        assert!(matches!(
            choose_device(vec![busy], FacingMode::User),
            Err(CameraError::NoDevice)
        ));
    }

    #[test]
    fn test_facing_picks_first_or_last() {
        let nodes = || vec![capture("/dev/video0"), capture("/dev/video2")];
        assert_eq!(choose_device(nodes(), FacingMode::User).unwrap(), "/dev/video0");
        assert_eq!(
            choose_device(nodes(), FacingMode::Environment).unwrap(),
            "/dev/video2"
        );
    }

    #[test]
    fn test_unplug_errors_end_stream() {
        assert!(stream_ended(&io::Error::from_raw_os_error(ENODEV)));
        assert!(stream_ended(&io::Error::from_raw_os_error(EIO)));
        assert!(!stream_ended(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!stream_ended(&io::Error::from_raw_os_error(EBUSY)));
    }

    #[test]
    fn test_grey_buffer_too_short() {
        assert!(matches!(
            to_grayscale(PixelFormat::Grey, &[0u8; 10], 4, 4),
            Err(CameraError::CaptureFailed(_))
        ));
        assert_eq!(to_grayscale(PixelFormat::Grey, &[7u8; 20], 4, 4).unwrap(), vec![7u8; 16]);
    }
}
