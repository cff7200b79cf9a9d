use anyhow::{anyhow, Result};

/// Which execution path a backend runs on. The engine records the active path
/// so operators can tell whether accelerated inference is actually in use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionPath {
    Accelerated,
    Cpu,
}

impl ExecutionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accelerated => "accelerated",
            Self::Cpu => "cpu",
        }
    }
}

/// Preprocessed model input: a 1x3xHxW f32 tensor in NCHW layout, RGB,
/// normalized to [0, 1]. Produced by `ops::letterbox`.
pub struct ModelInput {
    pub data: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

/// Fixed, versioned shape of a detection model's raw output.
///
/// Layout is `[4 + num_classes, num_anchors]` row-major: rows 0..4 are the
/// center-form box (cx, cy, w, h) in model-input pixels, rows 4.. are
/// per-class scores. Backends adapt whatever their runtime returns into this
/// struct; nothing downstream ever probes a runtime result object by field
/// name.
pub struct RawModelOutput {
    pub data: Vec<f32>,
    pub num_classes: usize,
    pub num_anchors: usize,
}

impl RawModelOutput {
    pub fn new(data: Vec<f32>, num_classes: usize, num_anchors: usize) -> Result<Self> {
        let expected = (4 + num_classes) * num_anchors;
        if data.len() != expected {
            return Err(anyhow!(
                "model output has {} values, expected {} ([4+{}] x {})",
                data.len(),
                expected,
                num_classes,
                num_anchors
            ));
        }
        Ok(Self {
            data,
            num_classes,
            num_anchors,
        })
    }

    /// Value at `(row, anchor)` in the `[4 + num_classes, num_anchors]` grid.
    #[inline]
    pub fn at(&self, row: usize, anchor: usize) -> f32 {
        self.data[row * self.num_anchors + anchor]
    }
}

/// Inference backend trait.
///
/// Backends own the loaded model handle and release it on drop. `forward`
/// takes `&mut self` because some runtimes keep per-session scratch state;
/// the engine serializes calls behind its own lock so one loaded model can be
/// shared by every camera worker.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Which execution path this backend runs on.
    fn execution_path(&self) -> ExecutionPath;

    /// Run one forward pass over a preprocessed input.
    fn forward(&mut self, input: &ModelInput) -> Result<RawModelOutput>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
