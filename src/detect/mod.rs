mod backend;
mod backends;
mod engine;
mod ops;
mod result;

pub use backend::{ExecutionPath, InferenceBackend, ModelInput, RawModelOutput};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use engine::{BackendFactory, DetectionEngine, EngineConfig, MIN_MODEL_BYTES};
pub use ops::{decode_output, letterbox, non_max_suppression, LetterboxTransform};
pub use result::Detection;
