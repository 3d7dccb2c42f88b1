use crate::background::Background;
use crate::error::Result;
use crate::raster::{Dimensions, Mask, Raster};
use image::imageops::{self, FilterType};
use image::Rgba;
use std::sync::Arc;

/// Merges a frame over a background using a foreground mask.
///
/// The boundary is hard-edged: a pixel is either copied from the frame
/// (mask true) or left as the rendered background.
pub struct Compositor {
    dimensions: Dimensions,
    filter: FilterType,
    // Stretched copy of the last image background, keyed by Arc identity
    cached_background: Option<(Arc<Background>, Raster)>,
}

impl Compositor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            dimensions: Dimensions::new(width, height),
            filter: FilterType::Triangle,
            cached_background: None,
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Produce the output raster for one cycle.
    ///
    /// Inputs are validated before any pixel is touched, so a
    /// `DimensionMismatch` leaves nothing half-drawn.
    pub fn composite(
        &mut self,
        frame: &Raster,
        mask: &Mask,
        background: &Arc<Background>,
    ) -> Result<Raster> {
        let _span = tracing::debug_span!("composite").entered();

        self.dimensions.ensure(Dimensions::of(frame), "frame")?;
        self.dimensions.ensure(mask.dimensions(), "mask")?;

        let mut output = self.render_background(background);

        for ((out, src), &foreground) in output
            .chunks_exact_mut(4)
            .zip(frame.chunks_exact(4))
            .zip(mask.as_slice())
        {
            if foreground {
                out.copy_from_slice(src);
            }
        }

        Ok(output)
    }

    /// Render the background at canvas size: solid fills are opaque,
    /// images are stretched to fit without letterboxing.
    pub fn render_background(&mut self, background: &Arc<Background>) -> Raster {
        let Dimensions { width, height } = self.dimensions;
        match background.as_ref() {
            Background::Solid(color) => {
                let Rgba([r, g, b, _]) = *color;
                Raster::from_pixel(width, height, Rgba([r, g, b, 255]))
            }
            Background::Image(image) => {
                if let Some((key, rendered)) = &self.cached_background {
                    if Arc::ptr_eq(key, background) {
                        return rendered.clone();
                    }
                }

                let rendered = if image.dimensions() == (width, height) {
                    image.clone()
                } else {
                    tracing::debug!(
                        "Stretching {}x{} background to {}",
                        image.width(),
                        image.height(),
                        self.dimensions
                    );
                    imageops::resize(image, width, height, self.filter)
                };
                self.cached_background = Some((Arc::clone(background), rendered.clone()));
                rendered
            }
        }
    }
}
