//! moodlens-core — Landmark-to-emotion inference.
//!
//! Derives geometric features from a 468-point face mesh, scores them into
//! an emotion distribution, and simulates a signal when no models are loaded.
//! Landmark models run via ONNX Runtime on the CPU.

pub mod detector;
pub mod features;
pub mod scorer;
pub mod simulator;
pub mod types;

pub use detector::{DetectorError, FaceDetector, HandDetector, ModelBundle};
pub use features::{FeatureVector, LandmarkFeatureExtractor};
pub use scorer::EmotionScorer;
pub use simulator::FallbackSimulator;
pub use types::{
    BoundingBox, CycleDiagnostics, DetectionMode, DetectionResult, EmotionDistribution,
    EmotionLabel, FaceMeta, FaceObservation, HandMeta, HandObservation, LandmarkPoint, LandmarkSet,
};

/// Default directory for landmark model files (`$XDG_DATA_HOME/moodlens/models`).
pub fn default_model_dir() -> std::path::PathBuf {
    let data_home = std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        });
    data_home.join("moodlens").join("models")
}
