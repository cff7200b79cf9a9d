use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use image::RgbImage;

use crate::overlay::{FeatureConfig, FrameContext, OverlayFeature};

/// Average latency above which a feature is flagged as slow.
const SLOW_FEATURE_MS: f64 = 10.0;

/// Rolling per-feature accounting.
#[derive(Clone, Debug, Default)]
pub struct FeatureStats {
    pub invocations: u64,
    pub errors: u64,
    pub last_error: Option<String>,
    total_micros: u128,
}

impl FeatureStats {
    pub fn average_ms(&self) -> f64 {
        if self.invocations == 0 {
            return 0.0;
        }
        self.total_micros as f64 / self.invocations as f64 / 1000.0
    }

    /// True when this feature averages above the tuning threshold.
    pub fn is_slow(&self) -> bool {
        self.average_ms() > SLOW_FEATURE_MS
    }

    fn record(&mut self, elapsed_micros: u128, error: Option<String>) {
        self.invocations += 1;
        self.total_micros += elapsed_micros;
        if let Some(message) = error {
            self.errors += 1;
            self.last_error = Some(message);
        }
    }
}

struct FeatureSlot {
    feature: Box<dyn OverlayFeature>,
    config: FeatureConfig,
    stats: FeatureStats,
}

/// The ordered feature chain for one camera.
///
/// Features are sorted by priority once at registration or configuration
/// change, never per frame. `process` clones the working frame before each
/// feature so a failing feature cannot corrupt what earlier features drew;
/// superseded intermediates are dropped as soon as the next feature's output
/// replaces them, and the caller keeps ownership of the original input.
pub struct OverlayPipeline {
    slots: Vec<FeatureSlot>,
}

impl OverlayPipeline {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Register a feature with its default configuration.
    pub fn register(&mut self, feature: Box<dyn OverlayFeature>) {
        let config = feature.default_config();
        self.register_with_config(feature, config);
    }

    pub fn register_with_config(&mut self, mut feature: Box<dyn OverlayFeature>, config: FeatureConfig) {
        feature.on_config_changed(&config);
        self.slots.push(FeatureSlot {
            feature,
            config,
            stats: FeatureStats::default(),
        });
        self.slots.sort_by_key(|slot| slot.feature.priority());
    }

    /// Replace one feature's configuration. Returns false for unknown ids.
    /// The new configuration takes effect on the next frame; a frame being
    /// processed keeps the snapshot it started with.
    pub fn set_config(&mut self, feature_id: &str, config: FeatureConfig) -> bool {
        let Some(slot) = self
            .slots
            .iter_mut()
            .find(|slot| slot.feature.id() == feature_id)
        else {
            return false;
        };
        slot.feature.on_config_changed(&config);
        slot.config = config;
        true
    }

    pub fn feature_ids(&self) -> Vec<&'static str> {
        self.slots.iter().map(|slot| slot.feature.id()).collect()
    }

    /// Apply every enabled feature in priority order.
    ///
    /// A feature that errors or panics is logged and counted; processing
    /// continues with the last good frame, so one bad feature never blanks
    /// the display.
    pub fn process(&mut self, input: &RgbImage, ctx: &FrameContext) -> RgbImage {
        let mut current = input.clone();

        for slot in &mut self.slots {
            if !slot.config.enabled || !slot.feature.should_process(ctx) {
                continue;
            }

            let mut work = current.clone();
            let start = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                slot.feature.process_frame(&mut work, ctx)
            }));
            let elapsed = start.elapsed().as_micros();

            match outcome {
                Ok(Ok(())) => {
                    slot.stats.record(elapsed, None);
                    current = work;
                }
                Ok(Err(e)) => {
                    log::warn!(
                        "overlay feature '{}' failed on camera {} frame {}: {e:#}",
                        slot.feature.id(),
                        ctx.camera_id,
                        ctx.frame_index
                    );
                    slot.stats.record(elapsed, Some(format!("{e:#}")));
                }
                Err(_) => {
                    log::error!(
                        "overlay feature '{}' panicked on camera {} frame {}",
                        slot.feature.id(),
                        ctx.camera_id,
                        ctx.frame_index
                    );
                    slot.stats.record(elapsed, Some("panic".to_string()));
                }
            }
        }

        current
    }

    /// Per-feature accounting, pipeline order.
    pub fn stats(&self) -> Vec<(&'static str, FeatureStats)> {
        self.slots
            .iter()
            .map(|slot| (slot.feature.id(), slot.stats.clone()))
            .collect()
    }

    /// Ids of features currently averaging above the latency threshold.
    pub fn slow_features(&self) -> Vec<&'static str> {
        self.slots
            .iter()
            .filter(|slot| slot.stats.is_slow())
            .map(|slot| slot.feature.id())
            .collect()
    }
}

impl Default for OverlayPipeline {
    fn default() -> Self {
        Self::new()
    }
}
