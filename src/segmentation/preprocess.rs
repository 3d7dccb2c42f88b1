use crate::error::{PipelineError, Result};
use crate::raster::Raster;
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use ndarray::Array4;

/// Converts RGBA frames to model input tensors and model mattes back to
/// frame resolution
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    /// Preprocess an RGBA frame into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Drop alpha, convert to float and normalize to [0, 1]
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, frame: &Raster) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized;
        let source = if frame.dimensions() != (self.target_width, self.target_height) {
            resized = imageops::resize(
                frame,
                self.target_width,
                self.target_height,
                FilterType::Triangle,
            );
            &resized
        } else {
            frame
        };

        let shape = (1, 3, self.target_height as usize, self.target_width as usize);
        Array4::from_shape_fn(shape, |(_, c, y, x)| {
            f32::from(source.get_pixel(x as u32, y as u32)[c]) / 255.0
        })
    }

    /// Resize a model-resolution matte back to frame dimensions
    ///
    /// Returns: Resized matte flattened in row-major order
    pub fn postprocess_matte(
        matte: &[f32],
        matte_width: u32,
        matte_height: u32,
        target_width: u32,
        target_height: u32,
    ) -> Result<Vec<f32>> {
        let _span = tracing::debug_span!("postprocess").entered();

        if matte.len() != matte_width as usize * matte_height as usize {
            return Err(PipelineError::Segmentation(format!(
                "matte has {} values for {}x{}",
                matte.len(),
                matte_width,
                matte_height
            )));
        }

        if matte_width == target_width && matte_height == target_height {
            return Ok(matte.to_vec());
        }

        let gray = GrayImage::from_fn(matte_width, matte_height, |x, y| {
            let idx = (y * matte_width + x) as usize;
            Luma([(matte[idx] * 255.0).clamp(0.0, 255.0) as u8])
        });

        let resized = imageops::resize(&gray, target_width, target_height, FilterType::Triangle);

        Ok(resized.pixels().map(|p| f32::from(p[0]) / 255.0).collect())
    }
}
