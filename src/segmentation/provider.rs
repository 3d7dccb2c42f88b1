use super::config::SegmentationConfig;
use super::types::SegmentationModel;
use crate::error::{PipelineError, Result};
use crate::raster::{Dimensions, Mask, Raster};
use crate::session::Liveness;
use image::imageops;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Async adapter over a blocking `SegmentationModel`.
///
/// Cloning is cheap; clones share the same loaded model. Inference runs on
/// tokio's blocking pool so a slow model never stalls the event loop.
#[derive(Clone)]
pub struct SegmentationProvider {
    model: Arc<Mutex<Box<dyn SegmentationModel + Send>>>,
    config: SegmentationConfig,
}

impl SegmentationProvider {
    pub fn from_model(model: Box<dyn SegmentationModel + Send>, config: SegmentationConfig) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
            config,
        }
    }

    /// Load the default ONNX backend off the event loop.
    pub async fn load(model_path: PathBuf, config: SegmentationConfig) -> Result<Self> {
        let load_config = config.clone();
        let model = tokio::task::spawn_blocking(move || {
            super::create_default_model(&model_path, &load_config)
        })
        .await
        .map_err(|e| PipelineError::ModelLoad(format!("load task failed: {e}")))??;

        Ok(Self::from_model(model, config))
    }

    /// Whether masks are produced for a horizontally mirrored frame
    pub fn mirrored(&self) -> bool {
        self.config.mirror
    }

    /// Compute the foreground mask for `frame`.
    ///
    /// Any backend failure, including a panic on the worker, surfaces as
    /// `Segmentation` so the caller can skip the cycle.
    pub async fn segment(&self, frame: Arc<Raster>) -> Result<Mask> {
        let model = Arc::clone(&self.model);
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || {
            let _span = tracing::debug_span!("segment").entered();
            let Dimensions { width, height } = Dimensions::of(&frame);

            let matte = if config.mirror {
                let mirrored = imageops::flip_horizontal(frame.as_ref());
                model.lock().segment(&mirrored)?
            } else {
                model.lock().segment(&frame)?
            };

            Mask::from_probabilities(width, height, &matte, config.confidence_threshold)
                .map_err(|e| PipelineError::Segmentation(e.to_string()))
        })
        .await
        .map_err(|e| PipelineError::Segmentation(format!("segmentation task failed: {e}")))?
    }

    pub fn reset(&self) {
        self.model.lock().reset_state();
    }
}

/// Load state of the segmentation model, observable by the UI layer
#[derive(Clone)]
pub enum ModelState {
    Loading,
    Ready(SegmentationProvider),
    Unavailable(String),
}

/// Shared slot the model lands in once its asynchronous load completes
#[derive(Clone)]
pub struct ModelSlot {
    state: Arc<RwLock<ModelState>>,
}

impl Default for ModelSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelSlot {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(ModelState::Loading)),
        }
    }

    pub fn ready(provider: SegmentationProvider) -> Self {
        Self {
            state: Arc::new(RwLock::new(ModelState::Ready(provider))),
        }
    }

    /// Run `loader` on the runtime and publish its outcome.
    ///
    /// The result is dropped if the session was torn down while loading.
    pub fn spawn_load<F>(&self, loader: F, liveness: Liveness) -> JoinHandle<()>
    where
        F: Future<Output = Result<SegmentationProvider>> + Send + 'static,
    {
        let slot = self.clone();
        tokio::spawn(async move {
            let outcome = loader.await;
            if !liveness.is_alive() {
                tracing::debug!("Session torn down during model load, discarding model");
                return;
            }
            slot.publish(outcome);
        })
    }

    pub fn publish(&self, outcome: Result<SegmentationProvider>) {
        let next = match outcome {
            Ok(provider) => {
                tracing::info!("Segmentation model ready");
                ModelState::Ready(provider)
            }
            Err(e) => {
                tracing::error!("Segmentation model unavailable: {}", e);
                ModelState::Unavailable(e.to_string())
            }
        };
        *self.state.write() = next;
    }

    pub fn state(&self) -> ModelState {
        self.state.read().clone()
    }

    pub fn provider(&self) -> Option<SegmentationProvider> {
        match &*self.state.read() {
            ModelState::Ready(provider) => Some(provider.clone()),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(&*self.state.read(), ModelState::Loading)
    }

    /// Drop the loaded model, if any
    pub fn clear(&self) {
        let previous = std::mem::replace(&mut *self.state.write(), ModelState::Loading);
        if let ModelState::Ready(provider) = previous {
            provider.reset();
        }
    }
}
