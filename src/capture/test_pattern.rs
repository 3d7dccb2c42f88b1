use super::FrameSource;
use crate::error::Result;
use crate::raster::{Dimensions, Raster};
use image::Rgba;

/// Synthetic frame source: a gradient with a bright vertical bar that
/// sweeps across the frame. Useful for running the pipeline without a camera.
pub struct TestPatternSource {
    dimensions: Dimensions,
    frame_index: u64,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        tracing::info!("Using {}x{} test pattern source", width, height);
        Self {
            dimensions: Dimensions::new(width, height),
            frame_index: 0,
        }
    }
}

impl FrameSource for TestPatternSource {
    fn current_frame(&mut self) -> Result<Raster> {
        let Dimensions { width, height } = self.dimensions;
        let bar_width = (width / 8).max(1);
        let bar_start = (self.frame_index * 4 % u64::from(width.max(1))) as u32;
        self.frame_index += 1;

        Ok(Raster::from_fn(width, height, |x, y| {
            if x >= bar_start && x < bar_start + bar_width {
                return Rgba([255, 255, 255, 255]);
            }
            let r = (x as f32 / width as f32 * 200.0) as u8 + 30;
            let g = (y as f32 / height as f32 * 200.0) as u8 + 30;
            Rgba([r, g, 120, 255])
        }))
    }

    fn dimensions(&self) -> Dimensions {
        self.dimensions
    }
}
