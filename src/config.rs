use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::overlay::FeatureConfig;

const DEFAULT_DB_PATH: &str = "sitewatch.db";
const DEFAULT_MEDIA_DIR: &str = "media";
const DEFAULT_SOURCE_URL: &str = "stub://floor_camera";
const DEFAULT_SOURCE_FPS: u32 = 10;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_ID: &str = "cam-1";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_NMS_THRESHOLD: f32 = 0.45;
const DEFAULT_SUPPRESSION_WINDOW_MS: u64 = 5_000;

#[derive(Debug, Deserialize, Default)]
struct SitewatchConfigFile {
    db_path: Option<String>,
    media_dir: Option<String>,
    zones_path: Option<PathBuf>,
    cameras: Option<Vec<CameraConfigFile>>,
    engine: Option<EngineConfigFile>,
    suppression_window_ms: Option<u64>,
    features: Option<HashMap<String, FeatureConfig>>,
}

#[derive(Debug, Deserialize)]
struct CameraConfigFile {
    id: String,
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence_threshold: Option<f32>,
    nms_threshold: Option<f32>,
    class_names: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub id: String,
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub class_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SitewatchConfig {
    pub db_path: String,
    pub media_dir: String,
    pub zones_path: Option<PathBuf>,
    pub cameras: Vec<CameraSettings>,
    pub engine: EngineSettings,
    /// Per-(track, zone) re-entry suppression window.
    pub suppression_window_ms: u64,
    /// Per-feature overrides keyed by feature id.
    pub features: HashMap<String, FeatureConfig>,
}

impl SitewatchConfig {
    /// Load from the file named by `SITEWATCH_CONFIG` (JSON), then apply
    /// `SITEWATCH_*` environment overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SITEWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SitewatchConfigFile) -> Self {
        let cameras = file
            .cameras
            .map(|cameras| {
                cameras
                    .into_iter()
                    .map(|camera| CameraSettings {
                        id: camera.id,
                        url: camera.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                        target_fps: camera.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
                        width: camera.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                        height: camera.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
                    })
                    .collect()
            })
            .unwrap_or_else(|| {
                vec![CameraSettings {
                    id: DEFAULT_CAMERA_ID.to_string(),
                    url: DEFAULT_SOURCE_URL.to_string(),
                    target_fps: DEFAULT_SOURCE_FPS,
                    width: DEFAULT_SOURCE_WIDTH,
                    height: DEFAULT_SOURCE_HEIGHT,
                }]
            });

        let engine_file = file.engine.unwrap_or_default();
        let engine = EngineSettings {
            model_path: engine_file.model_path,
            input_size: engine_file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            confidence_threshold: engine_file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            nms_threshold: engine_file.nms_threshold.unwrap_or(DEFAULT_NMS_THRESHOLD),
            class_names: engine_file
                .class_names
                .unwrap_or_else(|| vec!["person".to_string()]),
        };

        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            media_dir: file
                .media_dir
                .unwrap_or_else(|| DEFAULT_MEDIA_DIR.to_string()),
            zones_path: file.zones_path,
            cameras,
            engine,
            suppression_window_ms: file
                .suppression_window_ms
                .unwrap_or(DEFAULT_SUPPRESSION_WINDOW_MS),
            features: file.features.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("SITEWATCH_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(dir) = std::env::var("SITEWATCH_MEDIA_DIR") {
            if !dir.trim().is_empty() {
                self.media_dir = dir;
            }
        }
        if let Ok(path) = std::env::var("SITEWATCH_ZONES_PATH") {
            if !path.trim().is_empty() {
                self.zones_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("SITEWATCH_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.engine.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(threshold) = std::env::var("SITEWATCH_CONFIDENCE_THRESHOLD") {
            self.engine.confidence_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("SITEWATCH_CONFIDENCE_THRESHOLD must be a number"))?;
        }
        if let Ok(url) = std::env::var("SITEWATCH_SOURCE_URL") {
            if !url.trim().is_empty() {
                for camera in &mut self.cameras {
                    camera.url = url.clone();
                }
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(anyhow!("at least one camera must be configured"));
        }
        let mut seen = std::collections::HashSet::new();
        for camera in &self.cameras {
            if camera.id.trim().is_empty() {
                return Err(anyhow!("camera id must not be empty"));
            }
            if !seen.insert(camera.id.clone()) {
                return Err(anyhow!("duplicate camera id '{}'", camera.id));
            }
            if camera.width == 0 || camera.height == 0 {
                return Err(anyhow!("camera '{}' has a zero dimension", camera.id));
            }
        }
        if !(0.0..=1.0).contains(&self.engine.confidence_threshold) {
            return Err(anyhow!("confidence_threshold must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.engine.nms_threshold) {
            return Err(anyhow!("nms_threshold must be within [0, 1]"));
        }
        if self.engine.input_size == 0 {
            return Err(anyhow!("engine input_size must be greater than zero"));
        }
        if self.engine.class_names.is_empty() {
            return Err(anyhow!("engine class_names must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SitewatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
