use crate::raster::Dimensions;
use thiserror::Error;

/// Errors raised by the compositing pipeline.
///
/// Startup failures (`ModelLoad`, `CameraAccess`) halt the session. Everything
/// else is scoped to a single composite cycle: the cycle is skipped and the
/// previously committed frame stays on screen.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("segmentation model failed to load: {0}")]
    ModelLoad(String),

    #[error("camera access failed: {0}")]
    CameraAccess(String),

    #[error("no frame available from source")]
    NoFrameAvailable,

    #[error("segmentation failed: {0}")]
    Segmentation(String),

    #[error("{what} dimensions {actual} do not match canvas {expected}")]
    DimensionMismatch {
        what: &'static str,
        expected: Dimensions,
        actual: Dimensions,
    },

    #[error("background image could not be decoded: {0}")]
    BackgroundDecode(String),

    #[error("output write failed: {0}")]
    Output(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Whether this error ends the session rather than a single cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::ModelLoad(_) | PipelineError::CameraAccess(_)
        )
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;
