use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::{ExecutionPath, InferenceBackend};
use crate::detect::ops;
use crate::detect::result::Detection;
use crate::now_ms;

/// Minimum plausible weight file size. Exported models below this are
/// truncated or corrupt; loading them produces garbage sessions, so the
/// engine refuses them outright.
pub const MIN_MODEL_BYTES: u64 = 1024 * 1024;

/// Detection engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Path to the model weights. `None` selects the synthetic stub backend
    /// (tests, demos without hardware).
    pub model_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub class_names: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            input_width: 640,
            input_height: 640,
            class_names: vec!["person".to_string()],
        }
    }
}

/// Constructs a backend from the engine config. Factories are tried in
/// preference order at `initialize` time; the first that succeeds wins.
pub type BackendFactory =
    Box<dyn Fn(&EngineConfig) -> Result<Box<dyn InferenceBackend>> + Send + Sync>;

struct EngineState {
    backend: Option<Box<dyn InferenceBackend>>,
    active_path: Option<ExecutionPath>,
    active_name: Option<&'static str>,
}

/// Wraps a detection model behind a backend chain with fallback.
///
/// One engine (one loaded model) is shared by every camera worker; `infer`
/// serializes backend calls behind an internal lock. Inference never errors
/// into the frame loop: an unloaded engine, an empty frame, or a backend
/// failure all yield an empty detection list. Only `initialize` reports
/// failure to the caller.
pub struct DetectionEngine {
    config: EngineConfig,
    factories: Vec<BackendFactory>,
    state: Mutex<EngineState>,
}

impl DetectionEngine {
    /// Engine with the default backend chain for this build: the tract ONNX
    /// backend when compiled in, the synthetic stub when `model_path` is
    /// unset.
    pub fn new(config: EngineConfig) -> Self {
        let mut factories: Vec<BackendFactory> = Vec::new();

        #[cfg(feature = "backend-tract")]
        factories.push(Box::new(|cfg: &EngineConfig| {
            let path = cfg
                .model_path
                .as_ref()
                .ok_or_else(|| anyhow!("tract backend requires a model path"))?;
            let backend = crate::detect::backends::TractBackend::new(
                path,
                cfg.input_width,
                cfg.input_height,
                cfg.class_names.len(),
            )?;
            Ok(Box::new(backend) as Box<dyn InferenceBackend>)
        }));

        factories.push(Box::new(|cfg: &EngineConfig| {
            if cfg.model_path.is_some() {
                return Err(anyhow!("stub backend is only used without model weights"));
            }
            Ok(Box::new(crate::detect::backends::StubBackend::new(
                cfg.class_names.len(),
            )) as Box<dyn InferenceBackend>)
        }));

        Self::with_backend_chain(config, factories)
    }

    /// Engine with an explicit backend chain, preferred backend first.
    pub fn with_backend_chain(config: EngineConfig, factories: Vec<BackendFactory>) -> Self {
        Self {
            config,
            factories,
            state: Mutex::new(EngineState {
                backend: None,
                active_path: None,
                active_name: None,
            }),
        }
    }

    /// Load the model. Validates the weight file, then walks the backend
    /// chain until one initializes; later entries are the non-accelerated
    /// fallback path. On failure the engine is left unloaded, never
    /// half-constructed.
    pub fn initialize(&self) -> Result<()> {
        if let Some(path) = &self.config.model_path {
            validate_weight_file(path)?;
        }

        let mut last_error: Option<anyhow::Error> = None;
        for factory in &self.factories {
            match factory(&self.config) {
                Ok(mut backend) => {
                    if let Err(e) = backend.warm_up() {
                        log::warn!("backend '{}' failed warm-up: {e:#}", backend.name());
                        last_error = Some(e);
                        continue;
                    }
                    if last_error.is_some() {
                        log::warn!(
                            "falling back to '{}' backend ({})",
                            backend.name(),
                            backend.execution_path().as_str()
                        );
                    } else {
                        log::info!(
                            "detection engine loaded: backend '{}' ({})",
                            backend.name(),
                            backend.execution_path().as_str()
                        );
                    }
                    let mut state = self.lock_state();
                    state.active_path = Some(backend.execution_path());
                    state.active_name = Some(backend.name());
                    state.backend = Some(backend);
                    return Ok(());
                }
                Err(e) => {
                    log::debug!("backend init failed: {e:#}");
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => e.context("no inference backend could be initialized"),
            None => anyhow!("no inference backends configured"),
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.lock_state().backend.is_some()
    }

    /// Which execution path is active, once loaded.
    pub fn execution_path(&self) -> Option<ExecutionPath> {
        self.lock_state().active_path
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.lock_state().active_name
    }

    /// Release the loaded model. The backend's drop frees runtime resources.
    pub fn unload(&self) {
        let mut state = self.lock_state();
        state.backend = None;
        state.active_path = None;
        state.active_name = None;
    }

    /// Run detection on a frame.
    ///
    /// Returns only detections with confidence >= `confidence_threshold`,
    /// after class-aware NMS at `nms_threshold`. Never errors: failures are
    /// logged and yield an empty list so a single bad frame cannot take down
    /// a camera worker.
    pub fn infer(
        &self,
        frame: &RgbImage,
        confidence_threshold: f32,
        nms_threshold: f32,
    ) -> Vec<Detection> {
        if frame.width() == 0 || frame.height() == 0 {
            return Vec::new();
        }

        let (input, transform) =
            ops::letterbox(frame, self.config.input_width, self.config.input_height);

        let mut state = self.lock_state();
        let Some(backend) = state.backend.as_mut() else {
            log::debug!("infer called before engine load; returning no detections");
            return Vec::new();
        };

        let raw = match backend.forward(&input) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("inference failed on backend '{}': {e:#}", backend.name());
                return Vec::new();
            }
        };
        drop(state);

        let timestamp_ms = now_ms().unwrap_or(0);
        let decoded = ops::decode_output(
            &raw,
            &transform,
            confidence_threshold,
            frame.width(),
            frame.height(),
            &self.config.class_names,
            timestamp_ms,
        );
        ops::non_max_suppression(decoded, nms_threshold)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        // A poisoned lock means a backend panicked mid-forward; the loaded
        // handle may be in an unknown state, so drop it and continue unloaded.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                let mut guard = poisoned.into_inner();
                guard.backend = None;
                guard.active_path = None;
                guard.active_name = None;
                guard
            }
        }
    }
}

fn validate_weight_file(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| anyhow!("model file {} is not readable: {}", path.display(), e))?;
    if metadata.len() < MIN_MODEL_BYTES {
        return Err(anyhow!(
            "model file {} is {} bytes, below the {} byte minimum; refusing to load a truncated model",
            path.display(),
            metadata.len(),
            MIN_MODEL_BYTES
        ));
    }
    Ok(())
}
