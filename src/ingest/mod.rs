//! Frame ingestion sources.
//!
//! Sources produce `CapturedFrame`s that flow into the per-camera worker:
//! - `stub://` synthetic scenes (tests, demos, soak runs without hardware)
//!
//! Real camera transports (RTSP, V4L2) plug in behind the same `FrameSource`
//! trait; the kernel itself ships only the synthetic source.

use anyhow::{bail, Result};
use image::RgbImage;
use rand::Rng;

use crate::now_ms;

/// Configuration for one frame source.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Source URL, e.g. "stub://walker".
    pub url: String,
    /// Target frame rate. Sources decimate to this rate; the synthetic
    /// source uses it only for health accounting.
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://default".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// One decoded frame plus capture metadata.
pub struct CapturedFrame {
    pub image: RgbImage,
    pub timestamp_ms: u64,
    pub index: u64,
}

#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub url: String,
}

pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<CapturedFrame>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Open the source named by the config URL.
pub fn open_source(config: SourceConfig) -> Result<Box<dyn FrameSource>> {
    if config.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config)));
    }
    bail!("unsupported source url '{}'", config.url)
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

/// Renders a dark noisy scene with one bright person-sized blob.
///
/// The blob is bright enough that the stub detection backend picks it up, so
/// the whole pipeline (letterbox, decode, NMS, tracking, zones) can be
/// exercised without model weights. By default the blob walks back and forth
/// across the lower third of the frame; `pin` freezes its foot point at a
/// fixed relative position for deterministic scenarios.
pub struct SyntheticSource {
    config: SourceConfig,
    frame_count: u64,
    pinned_foot: Option<(f32, f32)>,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Self {
        log::info!("SyntheticSource: generating {} frames", config.url);
        Self {
            config,
            frame_count: 0,
            pinned_foot: None,
        }
    }

    /// Hold the blob's foot point at a fixed relative position.
    pub fn pin(mut self, rel_x: f32, rel_y: f32) -> Self {
        self.pinned_foot = Some((rel_x.clamp(0.0, 1.0), rel_y.clamp(0.0, 1.0)));
        self
    }

    fn foot_position(&self) -> (f32, f32) {
        if let Some(pinned) = self.pinned_foot {
            return pinned;
        }
        // Triangle-wave walk across the frame, foot near the bottom.
        let period = 200.0;
        let phase = (self.frame_count as f32 % period) / period;
        let x = if phase < 0.5 { phase * 2.0 } else { 2.0 - phase * 2.0 };
        (0.1 + 0.8 * x, 0.85)
    }

    fn render(&self) -> RgbImage {
        let mut rng = rand::thread_rng();
        let width = self.config.width;
        let height = self.config.height;

        let mut image = RgbImage::from_fn(width, height, |_, _| {
            let v: u8 = rng.gen_range(8..40);
            image::Rgb([v, v, v])
        });

        // Person-sized blob: ~8% of width, ~25% of height, foot at the
        // bottom-center of the blob.
        let (foot_x, foot_y) = self.foot_position();
        let blob_w = ((width as f32) * 0.08).max(4.0) as u32;
        let blob_h = ((height as f32) * 0.25).max(8.0) as u32;
        let cx = (foot_x * width as f32) as i64;
        let bottom = (foot_y * height as f32) as i64;

        for dy in 0..blob_h as i64 {
            for dx in 0..blob_w as i64 {
                let x = cx - blob_w as i64 / 2 + dx;
                let y = bottom - blob_h as i64 + dy;
                if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
                    continue;
                }
                let v: u8 = rng.gen_range(235..=255);
                image.put_pixel(x as u32, y as u32, image::Rgb([v, v, v]));
            }
        }

        image
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<CapturedFrame> {
        let image = self.render();
        self.frame_count += 1;
        Ok(CapturedFrame {
            image,
            timestamp_ms: now_ms()?,
            index: self.frame_count,
        })
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }
}
