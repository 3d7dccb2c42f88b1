use super::OutputSink;
use crate::error::Result;
use crate::raster::{Dimensions, Raster};
use parking_lot::RwLock;
use std::sync::Arc;

/// In-memory display surface holding the last committed frame.
///
/// Clones share the same surface, so a viewer can hold one clone while the
/// session writes through another.
#[derive(Clone)]
pub struct CanvasSink {
    shown: Arc<RwLock<Option<Arc<Raster>>>>,
    dimensions: Dimensions,
}

impl CanvasSink {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            shown: Arc::new(RwLock::new(None)),
            dimensions: Dimensions::new(width, height),
        }
    }

    /// The frame currently on screen, if anything has been committed
    pub fn shown(&self) -> Option<Arc<Raster>> {
        self.shown.read().clone()
    }
}

impl OutputSink for CanvasSink {
    fn write_frame(&mut self, frame: &Raster) -> Result<()> {
        self.dimensions.ensure(Dimensions::of(frame), "output")?;
        *self.shown.write() = Some(Arc::new(frame.clone()));
        Ok(())
    }

    fn dimensions(&self) -> Dimensions {
        self.dimensions
    }
}
