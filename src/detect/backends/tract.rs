#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{ExecutionPath, InferenceBackend, ModelInput, RawModelOutput};

/// Tract-based backend for ONNX inference.
///
/// Loads a local model file and runs CPU inference. The model is expected to
/// take a 1x3xHxW input and produce a `[1, 4 + num_classes, num_anchors]`
/// output, the standard single-output detection head layout.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    width: u32,
    height: u32,
    num_classes: usize,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        width: u32,
        height: u32,
        num_classes: usize,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            num_classes,
        })
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn execution_path(&self) -> ExecutionPath {
        ExecutionPath::Cpu
    }

    fn forward(&mut self, input: &ModelInput) -> Result<RawModelOutput> {
        if input.width != self.width || input.height != self.height {
            return Err(anyhow!(
                "input size {}x{} does not match model input {}x{}",
                input.width,
                input.height,
                self.width,
                self.height
            ));
        }

        let tensor = tract_ndarray::Array4::from_shape_vec(
            (1, 3, self.height as usize, self.width as usize),
            input.data.clone(),
        )
        .context("model input has wrong length for its dimensions")?
        .into_tensor();

        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;

        let shape = view.shape();
        if shape.len() != 3 || shape[1] != 4 + self.num_classes {
            return Err(anyhow!(
                "unexpected output shape {:?}, expected [1, {}, anchors]",
                shape,
                4 + self.num_classes
            ));
        }
        let num_anchors = shape[2];

        let data: Vec<f32> = view.iter().copied().collect();
        RawModelOutput::new(data, self.num_classes, num_anchors)
    }
}
