//! Sequential, time-bounded loading of the face and hand capabilities.

use moodlens_core::detector::{OnnxFaceMesh, OnnxHandLandmarker};
use moodlens_core::{DetectorError, FaceDetector, HandDetector, ModelBundle};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Which model a load step concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelResource {
    Face,
    Hand,
}

impl fmt::Display for ModelResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelResource::Face => f.write_str("face"),
            ModelResource::Hand => f.write_str("hand"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("{resource} model failed to load: {source}")]
    Failed {
        resource: ModelResource,
        #[source]
        source: DetectorError,
    },
    #[error("{resource} model did not load within {timeout:?}")]
    TimedOut {
        resource: ModelResource,
        timeout: Duration,
    },
    #[error("models were already loaded once for this session")]
    AlreadyAttempted,
}

/// Lifecycle of the model pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

/// Loads face then hand, each under its own timeout. Never retries.
pub struct ModelLoader {
    step_timeout: Duration,
    state: watch::Sender<LoadState>,
}

impl ModelLoader {
    pub fn new(step_timeout: Duration) -> Self {
        let (state, _) = watch::channel(LoadState::Unloaded);
        Self {
            step_timeout,
            state,
        }
    }

    pub fn state(&self) -> LoadState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoadState> {
        self.state.subscribe()
    }

    /// Load the ONNX face mesh and hand landmark models from disk.
    pub async fn load(
        &self,
        face_path: String,
        hand_path: String,
    ) -> Result<ModelBundle, ModelLoadError> {
        self.load_with(
            move || {
                load_blocking(move || {
                    OnnxFaceMesh::load(&face_path).map(|m| Box::new(m) as Box<dyn FaceDetector>)
                })
            },
            move || {
                load_blocking(move || {
                    OnnxHandLandmarker::load(&hand_path)
                        .map(|m| Box::new(m) as Box<dyn HandDetector>)
                })
            },
        )
        .await
    }

    /// Run the two load steps in order. The hand step is not started until
    /// the face step has succeeded.
    pub async fn load_with<FL, FF, HL, HF>(
        &self,
        face: FL,
        hand: HL,
    ) -> Result<ModelBundle, ModelLoadError>
    where
        FL: FnOnce() -> FF,
        FF: Future<Output = Result<Box<dyn FaceDetector>, DetectorError>>,
        HL: FnOnce() -> HF,
        HF: Future<Output = Result<Box<dyn HandDetector>, DetectorError>>,
    {
        if self.state() != LoadState::Unloaded {
            return Err(ModelLoadError::AlreadyAttempted);
        }
        self.state.send_replace(LoadState::Loading);

        let result = async {
            let face = self.step(ModelResource::Face, face()).await?;
            let hand = self.step(ModelResource::Hand, hand()).await?;
            Ok::<_, ModelLoadError>(ModelBundle::new(face, hand))
        }
        .await;

        match &result {
            Ok(_) => {
                tracing::info!("face and hand models loaded");
                self.state.send_replace(LoadState::Loaded);
            }
            Err(e) => {
                tracing::warn!(error = %e, "model loading failed; running on simulated signal");
                self.state.send_replace(LoadState::Failed);
            }
        }
        result
    }

    /// Await one load step. On timeout the step's future is dropped; a
    /// blocking load already running finishes in the background and its
    /// result is discarded.
    async fn step<T, F>(&self, resource: ModelResource, load: F) -> Result<T, ModelLoadError>
    where
        F: Future<Output = Result<T, DetectorError>>,
    {
        tracing::debug!(%resource, timeout = ?self.step_timeout, "loading model");
        match tokio::time::timeout(self.step_timeout, load).await {
            Ok(Ok(model)) => Ok(model),
            Ok(Err(source)) => Err(ModelLoadError::Failed { resource, source }),
            Err(_) => Err(ModelLoadError::TimedOut {
                resource,
                timeout: self.step_timeout,
            }),
        }
    }
}

/// Run a blocking ONNX session build on the blocking pool.
async fn load_blocking<T, F>(load: F) -> Result<T, DetectorError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DetectorError> + Send + 'static,
{
    tokio::task::spawn_blocking(load)
        .await
        .map_err(|e| DetectorError::InferenceFailed(format!("model load task failed: {e}")))?
}
