use crate::error::{PipelineError, Result};
use image::RgbaImage;
use std::fmt;

/// RGBA8 pixel grid, row-major and contiguous
pub type Raster = RgbaImage;

/// Width and height of a raster or mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn of(raster: &Raster) -> Self {
        let (width, height) = raster.dimensions();
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Fail with `DimensionMismatch` unless `actual` equals `self`.
    pub fn ensure(&self, actual: Dimensions, what: &'static str) -> Result<()> {
        if *self != actual {
            return Err(PipelineError::DimensionMismatch {
                what,
                expected: *self,
                actual,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Per-pixel foreground classification, index-aligned with a raster.
///
/// Entry `i` covers the raster bytes `i * 4 .. i * 4 + 4`. `true` means
/// foreground (person).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    dimensions: Dimensions,
    data: Vec<bool>,
}

impl Mask {
    pub fn new(width: u32, height: u32, data: Vec<bool>) -> Result<Self> {
        let dimensions = Dimensions::new(width, height);
        if data.len() != dimensions.pixel_count() {
            return Err(PipelineError::InvalidConfig(format!(
                "mask of {} has {} entries, expected {}",
                dimensions,
                data.len(),
                dimensions.pixel_count()
            )));
        }
        Ok(Self { dimensions, data })
    }

    pub fn filled(width: u32, height: u32, value: bool) -> Self {
        let dimensions = Dimensions::new(width, height);
        Self {
            dimensions,
            data: vec![value; dimensions.pixel_count()],
        }
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(usize) -> bool) -> Self {
        let dimensions = Dimensions::new(width, height);
        let data = (0..dimensions.pixel_count()).map(&mut f).collect();
        Self { dimensions, data }
    }

    /// Threshold a row-major probability matte. Values strictly above
    /// `threshold` count as foreground.
    pub fn from_probabilities(width: u32, height: u32, matte: &[f32], threshold: f32) -> Result<Self> {
        let data = matte.iter().map(|&p| p > threshold).collect();
        Self::new(width, height, data)
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.data
    }

    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_rejects_wrong_length() {
        let err = Mask::new(4, 4, vec![true; 15]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn probabilities_threshold_strictly_above() {
        let mask = Mask::from_probabilities(4, 1, &[0.0, 0.5, 0.51, 1.0], 0.5).unwrap();
        assert_eq!(mask.as_slice(), &[false, false, true, true]);
        assert_eq!(mask.foreground_count(), 2);
    }

    #[test]
    fn ensure_reports_both_sizes() {
        let expected = Dimensions::new(640, 480);
        let err = expected
            .ensure(Dimensions::new(320, 240), "frame")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "frame dimensions 320x240 do not match canvas 640x480"
        );
    }
}
