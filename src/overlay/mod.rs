//! Priority-ordered frame annotation pipeline.
//!
//! Each overlay feature is an independent plugin: it declares a stable id, a
//! render priority (lower runs earlier), and a configuration bag, and is
//! applied to the frame in priority order. Privacy blur carries the lowest
//! priority so every later feature draws on already-anonymized pixels.
//!
//! Features are isolated: one feature failing (error or panic) is logged and
//! counted, and the pipeline continues from the last good frame. The
//! pipeline times every invocation and exposes per-feature averages so slow
//! features can be flagged.

mod config;
pub mod features;
mod pipeline;

pub use config::FeatureConfig;
pub use pipeline::{FeatureStats, OverlayPipeline};

use std::time::Instant;

use anyhow::Result;
use image::RgbImage;

use crate::detect::Detection;
use crate::track::TrackedPerson;
use crate::zones::{ZoneHit, ZoneSnapshot};

/// Render priorities observed across the standard feature set. Kept together
/// so the ordering contract is visible in one place.
pub mod priority {
    pub const PRIVACY_BLUR: u32 = 10;
    pub const ZONE_OVERLAY: u32 = 50;
    pub const DETECTION_OVERLAY: u32 = 200;
    pub const TRACKING_OVERLAY: u32 = 300;
    pub const STATISTICS: u32 = 1000;
}

/// Per-frame, per-camera context threaded through the feature chain.
/// Constructed fresh each frame; features read it, never mutate it.
#[derive(Clone)]
pub struct FrameContext {
    pub camera_id: String,
    pub frame_index: u64,
    pub detections: Vec<Detection>,
    pub tracks: Vec<TrackedPerson>,
    pub zones: ZoneSnapshot,
    pub zone_hits: Vec<ZoneHit>,
    /// Canvas px per source px of the active render mapping; 1.0 when the
    /// frame is rendered at source resolution.
    pub scale_factor: f32,
    pub started_at: Instant,
}

impl FrameContext {
    pub fn new(camera_id: impl Into<String>, frame_index: u64) -> Self {
        Self {
            camera_id: camera_id.into(),
            frame_index,
            detections: Vec::new(),
            tracks: Vec::new(),
            zones: ZoneSnapshot::default(),
            zone_hits: Vec::new(),
            scale_factor: 1.0,
            started_at: Instant::now(),
        }
    }
}

/// An overlay feature: one independent frame annotation step.
pub trait OverlayFeature: Send {
    /// Stable identifier, used as the configuration key.
    fn id(&self) -> &'static str;

    /// Operator-facing name.
    fn display_name(&self) -> &'static str;

    /// Render priority; lower values are applied earlier.
    fn priority(&self) -> u32;

    /// Configuration this feature starts with when none is supplied.
    fn default_config(&self) -> FeatureConfig {
        FeatureConfig::default()
    }

    /// Cheap pre-check; when false the feature is skipped this frame without
    /// being timed.
    fn should_process(&self, _ctx: &FrameContext) -> bool {
        true
    }

    /// Apply the annotation. The frame is a working copy; on error the
    /// pipeline discards it and continues from the last good frame.
    fn process_frame(&mut self, frame: &mut RgbImage, ctx: &FrameContext) -> Result<()>;

    /// Called when the feature's configuration changes at runtime.
    fn on_config_changed(&mut self, _config: &FeatureConfig) {}
}
