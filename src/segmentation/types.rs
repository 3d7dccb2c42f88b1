use crate::error::Result;
use crate::raster::Raster;

/// Alpha matte: values where 0.0 = background, 1.0 = foreground
/// Dimensions match the input frame dimensions
pub type Matte = Vec<f32>;

/// Blocking segmentation backend.
///
/// Implementations run on a blocking worker thread; the async
/// `SegmentationProvider` wraps them for the pipeline.
pub trait SegmentationModel {
    /// Process a frame and return an alpha matte, flattened in row-major
    /// order at the frame's own resolution.
    fn segment(&mut self, frame: &Raster) -> Result<Matte>;

    /// Reset internal state (for models with temporal/recurrent components)
    ///
    /// Call this when switching cameras or starting a new session.
    fn reset_state(&mut self) {}

    /// Get the model's preferred input dimensions as (width, height)
    fn input_size(&self) -> (u32, u32);
}
