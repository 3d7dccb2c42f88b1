//! Real-time background replacement for a live camera feed.
//!
//! Each composite cycle reads a frame, asks a person-segmentation model for a
//! foreground mask, and draws the frame's foreground pixels over the current
//! background. A `Session` owns all cycle state and is driven by
//! `scheduler::run` from a repaint clock, capped at a target frame rate.

pub mod background;
pub mod capture;
pub mod compositor;
pub mod error;
pub mod output;
pub mod raster;
pub mod scheduler;
pub mod segmentation;
pub mod session;
pub mod stats;

pub use error::{PipelineError, Result};
pub use raster::{Dimensions, Mask, Raster};
