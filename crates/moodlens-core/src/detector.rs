//! Face and hand landmark capabilities.
//!
//! Each capability has an ONNX-backed implementation and an unavailable
//! stand-in. The choice is made once, when models are loaded.

use crate::types::{FaceObservation, HandObservation, LandmarkPoint, LandmarkSet};
use image::imageops::FilterType;
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const FACE_MESH_INPUT_SIZE: u32 = 192;
const FACE_MESH_POINTS: usize = 468;
const HAND_INPUT_SIZE: u32 = 224;
const HAND_POINTS: usize = 21;
const PRESENCE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("model capability unavailable")]
    Unavailable,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Estimates face landmarks in a grayscale frame.
pub trait FaceDetector: Send {
    fn estimate(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceObservation>, DetectorError>;

    /// False for the stand-in used when no model could be loaded.
    fn is_available(&self) -> bool {
        true
    }
}

/// Estimates hand landmarks in a grayscale frame.
pub trait HandDetector: Send {
    fn estimate(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<HandObservation>, DetectorError>;

    fn is_available(&self) -> bool {
        true
    }
}

/// Face capability used in degraded mode.
#[derive(Debug, Default)]
pub struct UnavailableFaceDetector;

impl FaceDetector for UnavailableFaceDetector {
    fn estimate(&mut self, _: &[u8], _: u32, _: u32) -> Result<Vec<FaceObservation>, DetectorError> {
        Err(DetectorError::Unavailable)
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Hand capability used in degraded mode.
#[derive(Debug, Default)]
pub struct UnavailableHandDetector;

impl HandDetector for UnavailableHandDetector {
    fn estimate(&mut self, _: &[u8], _: u32, _: u32) -> Result<Vec<HandObservation>, DetectorError> {
        Err(DetectorError::Unavailable)
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// The pair of capabilities handed to the scheduler after loading.
pub struct ModelBundle {
    pub face: Box<dyn FaceDetector>,
    pub hand: Box<dyn HandDetector>,
}

impl ModelBundle {
    pub fn new(face: Box<dyn FaceDetector>, hand: Box<dyn HandDetector>) -> Self {
        Self { face, hand }
    }

    /// Both capabilities replaced by their unavailable stand-ins.
    pub fn unavailable() -> Self {
        Self {
            face: Box::new(UnavailableFaceDetector),
            hand: Box::new(UnavailableHandDetector),
        }
    }

    /// True only when both capabilities are model-backed.
    pub fn is_loaded(&self) -> bool {
        self.face.is_available() && self.hand.is_available()
    }
}

/// 468-point face mesh model via ONNX Runtime.
///
/// Runs on the full frame (no detector crop). Landmarks come back in
/// model-input pixels and are scaled to frame pixels.
pub struct OnnxFaceMesh {
    session: Session,
    has_presence_output: bool,
}

impl OnnxFaceMesh {
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        let session = load_session(model_path)?;
        let has_presence_output = session.outputs().len() > 1;
        tracing::info!(path = model_path, has_presence_output, "loaded face mesh model");
        Ok(Self {
            session,
            has_presence_output,
        })
    }
}

impl FaceDetector for OnnxFaceMesh {
    fn estimate(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceObservation>, DetectorError> {
        let input = nhwc_input(frame, width, height, FACE_MESH_INPUT_SIZE, |p| p / 127.5 - 1.0)?;
        let has_presence = self.has_presence_output;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, coords) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("face landmarks: {e}")))?;

        let confidence = if has_presence {
            let (_, score) = outputs[1]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("face presence: {e}")))?;
            score.first().copied().map(sigmoid).unwrap_or(0.0)
        } else {
            1.0
        };

        if confidence < PRESENCE_THRESHOLD {
            return Ok(Vec::new());
        }

        let landmarks = decode_landmarks(coords, FACE_MESH_POINTS, FACE_MESH_INPUT_SIZE, width, height)?;
        Ok(vec![FaceObservation {
            bounding_box: landmarks.bounds(),
            landmarks,
            confidence,
        }])
    }
}

/// 21-point hand landmark model via ONNX Runtime.
pub struct OnnxHandLandmarker {
    session: Session,
    has_presence_output: bool,
}

impl OnnxHandLandmarker {
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        let session = load_session(model_path)?;
        let has_presence_output = session.outputs().len() > 1;
        tracing::info!(path = model_path, has_presence_output, "loaded hand landmark model");
        Ok(Self {
            session,
            has_presence_output,
        })
    }
}

impl HandDetector for OnnxHandLandmarker {
    fn estimate(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<HandObservation>, DetectorError> {
        let input = nhwc_input(frame, width, height, HAND_INPUT_SIZE, |p| p / 255.0)?;
        let has_presence = self.has_presence_output;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, coords) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("hand landmarks: {e}")))?;

        // Hand presence is exported as a probability, not a logit.
        let confidence = if has_presence {
            let (_, score) = outputs[1]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("hand presence: {e}")))?;
            score.first().copied().unwrap_or(0.0).clamp(0.0, 1.0)
        } else {
            1.0
        };

        if confidence < PRESENCE_THRESHOLD {
            return Ok(Vec::new());
        }

        let landmarks = decode_landmarks(coords, HAND_POINTS, HAND_INPUT_SIZE, width, height)?;
        Ok(vec![HandObservation {
            bounding_box: landmarks.bounds(),
            landmarks,
            confidence,
        }])
    }
}

fn load_session(model_path: &str) -> Result<Session, DetectorError> {
    if !Path::new(model_path).exists() {
        return Err(DetectorError::ModelNotFound(model_path.to_string()));
    }
    Ok(Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(model_path)?)
}

/// Resize a grayscale frame to `size`×`size` and lay it out as a 1×H×W×3 tensor.
fn nhwc_input(
    frame: &[u8],
    width: u32,
    height: u32,
    size: u32,
    normalize: impl Fn(f32) -> f32,
) -> Result<Array4<f32>, DetectorError> {
    let expected = (width as usize) * (height as usize);
    if width == 0 || height == 0 || frame.len() < expected {
        return Err(DetectorError::InvalidFrame(format!(
            "{width}x{height} frame with {} bytes",
            frame.len()
        )));
    }

    let image = GrayImage::from_raw(width, height, frame[..expected].to_vec())
        .ok_or_else(|| DetectorError::InvalidFrame("buffer does not match dimensions".into()))?;
    let resized = image::imageops::resize(&image, size, size, FilterType::Triangle);

    let side = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, side, side, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let value = normalize(pixel[0] as f32);
        // Grayscale → 3-channel: replicate Y → [R=Y, G=Y, B=Y]
        for c in 0..3 {
            tensor[[0, y as usize, x as usize, c]] = value;
        }
    }
    Ok(tensor)
}

/// Map `count` (x, y, z) triples from model-input pixels to frame pixels.
fn decode_landmarks(
    coords: &[f32],
    count: usize,
    input_size: u32,
    width: u32,
    height: u32,
) -> Result<LandmarkSet, DetectorError> {
    if coords.len() < count * 3 {
        return Err(DetectorError::InferenceFailed(format!(
            "expected {} landmark values, got {}",
            count * 3,
            coords.len()
        )));
    }
    let sx = width as f32 / input_size as f32;
    let sy = height as f32 / input_size as f32;
    let points = coords
        .chunks_exact(3)
        .take(count)
        .map(|c| LandmarkPoint {
            x: c[0] * sx,
            y: c[1] * sy,
            z: c[2],
        })
        .collect();
    Ok(LandmarkSet::new(points))
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
