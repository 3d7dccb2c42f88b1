mod config;
mod preprocess;
mod provider;
mod rvm;
pub mod types;

pub use config::{SegmentationConfig, SpeedAccuracyTradeoff};
pub use preprocess::Preprocessor;
pub use provider::{ModelSlot, ModelState, SegmentationProvider};
pub use rvm::RobustVideoMatting;
pub use types::{Matte, SegmentationModel};

use crate::error::Result;
use std::path::Path;

/// Create the default segmentation backend (RVM) sized for `config`
pub fn create_default_model(
    model_path: &Path,
    config: &SegmentationConfig,
) -> Result<Box<dyn SegmentationModel + Send>> {
    let model = RobustVideoMatting::new(model_path, config.tradeoff.input_size())?;
    Ok(Box::new(model))
}
