use super::OutputSink;
use crate::error::{PipelineError, Result};
use crate::raster::{Dimensions, Raster};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

/// Writes frames to a v4l2loopback device as YUYV
pub struct V4L2Output {
    // Held open so the negotiated format stays in effect
    _device: Device,
    file: File,
    dimensions: Dimensions,
    buffer: Vec<u8>,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        // YUYV packs two pixels per 4 bytes
        if width == 0 || height == 0 || width % 2 != 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "YUYV output needs a non-empty, even-width frame, got {}x{}",
                width, height
            )));
        }

        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        let device = Device::with_path(path)
            .map_err(|e| PipelineError::Output(format!("{}: {}", path.display(), e)))?;

        let requested = Format::new(width, height, FourCC::new(b"YUYV"));
        let applied = Output::set_format(&device, &requested)
            .map_err(|e| PipelineError::Output(format!("failed to set output format: {e}")))?;
        if applied.width != width || applied.height != height {
            return Err(PipelineError::Output(format!(
                "device accepted {}x{} instead of {}x{}",
                applied.width, applied.height, width, height
            )));
        }
        tracing::debug!("Loopback format: {}", applied);

        // v4l2loopback accepts raw frame data written to the device file
        let file = File::options()
            .write(true)
            .open(path)
            .map_err(|e| PipelineError::Output(format!("{}: {}", path.display(), e)))?;

        tracing::info!("v4l2loopback device opened successfully");

        Ok(Self {
            _device: device,
            file,
            dimensions: Dimensions::new(width, height),
            buffer: Vec::with_capacity((width * height * 2) as usize),
        })
    }
}

/// Convert an even-width RGBA frame to packed YUV 4:2:2 (Y0 U Y1 V),
/// averaging chroma over each horizontal pixel pair. Alpha is ignored.
pub(crate) fn rgba_to_yuyv(frame: &Raster, out: &mut Vec<u8>) {
    out.clear();
    let width = frame.width() as usize;
    if width == 0 {
        return;
    }
    for row in frame.as_raw().chunks_exact(width * 4) {
        for pair in row.chunks_exact(8) {
            let (y1, u1, v1) = rgb_to_yuv(pair[0], pair[1], pair[2]);
            let (y2, u2, v2) = rgb_to_yuv(pair[4], pair[5], pair[6]);

            let u = ((u16::from(u1) + u16::from(u2)) / 2) as u8;
            let v = ((u16::from(v1) + u16::from(v2)) / 2) as u8;
            out.extend_from_slice(&[y1, u, y2, v]);
        }
    }
}

/// Convert RGB to YUV color space
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = f32::from(r);
    let g = f32::from(g);
    let b = f32::from(b);

    let y = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 255.0) as u8;
    let u = ((-0.147 * r - 0.289 * g + 0.436 * b) + 128.0).clamp(0.0, 255.0) as u8;
    let v = ((0.615 * r - 0.515 * g - 0.100 * b) + 128.0).clamp(0.0, 255.0) as u8;

    (y, u, v)
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, frame: &Raster) -> Result<()> {
        self.dimensions.ensure(Dimensions::of(frame), "output")?;

        rgba_to_yuyv(frame, &mut self.buffer);

        self.file
            .write_all(&self.buffer)
            .map_err(|e| PipelineError::Output(format!("failed to write frame: {e}")))
    }

    fn dimensions(&self) -> Dimensions {
        self.dimensions
    }
}
