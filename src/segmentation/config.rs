use crate::error::{PipelineError, Result};
use clap::ValueEnum;

/// Speed versus accuracy knob, fixed when the model is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SpeedAccuracyTradeoff {
    Fast,
    #[default]
    Balanced,
    Accurate,
}

impl SpeedAccuracyTradeoff {
    /// Square model input resolution for this setting
    pub fn input_size(self) -> u32 {
        match self {
            SpeedAccuracyTradeoff::Fast => 256,
            SpeedAccuracyTradeoff::Balanced => 512,
            SpeedAccuracyTradeoff::Accurate => 768,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationConfig {
    pub tradeoff: SpeedAccuracyTradeoff,
    /// Matte values strictly above this count as foreground
    pub confidence_threshold: f32,
    /// Mirror frames horizontally before segmentation. The drawn frame is
    /// mirrored the same way so the mask stays aligned.
    pub mirror: bool,
}

impl SegmentationConfig {
    pub fn new(tradeoff: SpeedAccuracyTradeoff, confidence_threshold: f32, mirror: bool) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(PipelineError::InvalidConfig(format!(
                "confidence threshold {confidence_threshold} outside 0.0..=1.0"
            )));
        }
        Ok(Self {
            tradeoff,
            confidence_threshold,
            mirror,
        })
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            tradeoff: SpeedAccuracyTradeoff::default(),
            confidence_threshold: 0.5,
            mirror: false,
        }
    }
}
