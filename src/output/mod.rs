mod canvas;
mod loopback;

pub use canvas::CanvasSink;
pub use loopback::V4L2Output;

use crate::error::Result;
use crate::raster::{Dimensions, Raster};

/// Trait for output destinations
pub trait OutputSink {
    /// Commit a fully composited frame
    fn write_frame(&mut self, frame: &Raster) -> Result<()>;

    /// Get the expected output resolution
    fn dimensions(&self) -> Dimensions;
}
