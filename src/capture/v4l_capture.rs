use super::{read_blocking, FrameSource};
use crate::error::{PipelineError, Result};
use crate::raster::{Dimensions, Raster};
use image::imageops::{self, FilterType};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;

pub struct WebcamCapture {
    camera: Camera,
    dimensions: Dimensions,
}

impl WebcamCapture {
    /// Open webcam `device_index` and start streaming.
    ///
    /// Any failure here is a `CameraAccess` error; the pipeline does not
    /// retry it.
    pub fn new(device_index: u32, width: u32, height: u32) -> Result<Self> {
        tracing::info!(
            "Initializing webcam {} at {}x{}",
            device_index,
            width,
            height
        );

        let index = CameraIndex::Index(device_index);
        let requested = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::HighestResolution(
            Resolution::new(width, height),
        ));

        let mut camera = Camera::new(index, requested)
            .map_err(|e| PipelineError::CameraAccess(format!("failed to open camera: {e}")))?;

        camera
            .open_stream()
            .map_err(|e| PipelineError::CameraAccess(format!("failed to open stream: {e}")))?;

        tracing::info!("Webcam initialized, native format {}", camera.camera_format());

        Ok(Self {
            camera,
            dimensions: Dimensions::new(width, height),
        })
    }
}

impl FrameSource for WebcamCapture {
    fn current_frame(&mut self) -> Result<Raster> {
        if !self.camera.is_stream_open() {
            return Err(PipelineError::NoFrameAvailable);
        }

        let camera = &mut self.camera;
        let frame = read_blocking(|| camera.frame()).map_err(|e| {
            tracing::debug!("Camera frame unavailable: {}", e);
            PipelineError::NoFrameAvailable
        })?;

        let resolution = frame.resolution();
        let (width, height) = (resolution.width(), resolution.height());
        let mut pixels = vec![0u8; width as usize * height as usize * 4];
        frame
            .decode_image_to_buffer::<RgbAFormat>(&mut pixels)
            .map_err(|e| {
                tracing::debug!("Failed to decode camera frame: {}", e);
                PipelineError::NoFrameAvailable
            })?;

        let decoded = Raster::from_raw(width, height, pixels).ok_or(PipelineError::NoFrameAvailable)?;

        // Cameras may not honour the requested resolution exactly
        if Dimensions::of(&decoded) != self.dimensions {
            return Ok(imageops::resize(
                &decoded,
                self.dimensions.width,
                self.dimensions.height,
                FilterType::Triangle,
            ));
        }

        Ok(decoded)
    }

    fn dimensions(&self) -> Dimensions {
        self.dimensions
    }
}
