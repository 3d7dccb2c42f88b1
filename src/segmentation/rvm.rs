use super::preprocess::Preprocessor;
use super::types::{Matte, SegmentationModel};
use crate::error::{PipelineError, Result};
use crate::raster::Raster;
use ndarray::{Array1, Array4, Ix4};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

/// RobustVideoMatting segmentation model
///
/// Recurrent hidden states (r1-r4) are carried between frames by the model
/// itself; they are reset with the session.
pub struct RobustVideoMatting {
    session: Session,
    preprocessor: Preprocessor,
    width: u32,
    height: u32,

    r1: Option<Array4<f32>>,
    r2: Option<Array4<f32>>,
    r3: Option<Array4<f32>>,
    r4: Option<Array4<f32>>,

    // Hidden states run at this fraction of the input resolution
    downsample_ratio: f32,
}

fn load_err(e: ort::Error) -> PipelineError {
    PipelineError::ModelLoad(e.to_string())
}

fn infer_err(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Segmentation(e.to_string())
}

impl RobustVideoMatting {
    /// Load an RVM ONNX model with a square `input_size` input
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!(
            "Loading RVM model from {} ({}x{} input)",
            path.display(),
            input_size,
            input_size
        );

        let session = Session::builder()
            .map_err(load_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_err)?
            .with_intra_threads(4)
            .map_err(load_err)?
            .commit_from_file(path)
            .map_err(|e| PipelineError::ModelLoad(format!("{}: {}", path.display(), e)))?;

        tracing::info!("RVM model loaded successfully");

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(input_size, input_size),
            width: input_size,
            height: input_size,
            r1: None,
            r2: None,
            r3: None,
            r4: None,
            downsample_ratio: 0.25,
        })
    }

    fn init_hidden_states(&mut self) {
        let h = (self.height as f32 * self.downsample_ratio) as usize;
        let w = (self.width as f32 * self.downsample_ratio) as usize;

        tracing::debug!("Initializing hidden states to {}x{}", w, h);

        self.r1 = Some(Array4::zeros((1, 16, h, w)));
        self.r2 = Some(Array4::zeros((1, 20, h / 2, w / 2)));
        self.r3 = Some(Array4::zeros((1, 24, h / 4, w / 4)));
        self.r4 = Some(Array4::zeros((1, 28, h / 8, w / 8)));
    }

    fn take_state(&mut self) -> [Array4<f32>; 4] {
        if self.r1.is_none() {
            self.init_hidden_states();
        }
        [
            self.r1.take().unwrap_or_default(),
            self.r2.take().unwrap_or_default(),
            self.r3.take().unwrap_or_default(),
            self.r4.take().unwrap_or_default(),
        ]
    }
}

impl SegmentationModel for RobustVideoMatting {
    fn segment(&mut self, frame: &Raster) -> Result<Matte> {
        let _span = tracing::debug_span!("rvm_segment").entered();

        let input = self.preprocessor.preprocess(frame);
        let [r1, r2, r3, r4] = self.take_state();
        let ratio = Array1::from_elem(1, self.downsample_ratio);

        // RVM inputs: src, r1i..r4i, downsample_ratio
        let inputs = ort::inputs![
            Tensor::from_array(input).map_err(infer_err)?,
            Tensor::from_array(r1).map_err(infer_err)?,
            Tensor::from_array(r2).map_err(infer_err)?,
            Tensor::from_array(r3).map_err(infer_err)?,
            Tensor::from_array(r4).map_err(infer_err)?,
            Tensor::from_array(ratio).map_err(infer_err)?
        ];

        let infer_span = tracing::debug_span!("inference").entered();
        let outputs = self.session.run(inputs).map_err(infer_err)?;
        drop(infer_span);

        // Outputs: fgr, pha, r1o..r4o. Only the alpha matte and the
        // recurrent state are used.
        let pha = outputs[1].try_extract_array::<f32>().map_err(infer_err)?;
        let shape = pha.shape().to_vec();
        if shape.len() != 4 {
            return Err(PipelineError::Segmentation(format!(
                "unexpected matte shape {:?}",
                shape
            )));
        }
        let (matte_height, matte_width) = (shape[2] as u32, shape[3] as u32);
        let matte_flat: Vec<f32> = pha.iter().copied().collect();

        let mut next = Vec::with_capacity(4);
        for idx in 2..6 {
            let state = outputs[idx]
                .try_extract_array::<f32>()
                .map_err(infer_err)?
                .to_owned()
                .into_dimensionality::<Ix4>()
                .map_err(infer_err)?;
            next.push(state);
        }
        drop(outputs);

        let mut next = next.into_iter();
        self.r1 = next.next();
        self.r2 = next.next();
        self.r3 = next.next();
        self.r4 = next.next();

        let (frame_width, frame_height) = frame.dimensions();
        Preprocessor::postprocess_matte(
            &matte_flat,
            matte_width,
            matte_height,
            frame_width,
            frame_height,
        )
    }

    fn reset_state(&mut self) {
        tracing::info!("Resetting RVM hidden states");
        self.r1 = None;
        self.r2 = None;
        self.r3 = None;
        self.r4 = None;
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
