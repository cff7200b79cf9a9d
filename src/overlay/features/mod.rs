//! The standard overlay feature set.
//!
//! Priorities are fixed relative to each other so privacy blur always runs
//! before anything draws: blur 10, zones 50, detections 200, tracking 300,
//! statistics 1000.

mod detections;
mod privacy;
mod stats;
mod tracks;
mod zones;

pub use detections::DetectionOverlayFeature;
pub use privacy::PrivacyBlurFeature;
pub use stats::StatisticsOverlayFeature;
pub use tracks::TrackingOverlayFeature;
pub use zones::ZoneOverlayFeature;

use image::RgbImage;

use crate::overlay::OverlayPipeline;

/// Pipeline with the full standard feature set registered at default
/// configuration.
pub fn standard_pipeline() -> OverlayPipeline {
    let mut pipeline = OverlayPipeline::new();
    pipeline.register(Box::new(PrivacyBlurFeature::new()));
    pipeline.register(Box::new(ZoneOverlayFeature::new()));
    pipeline.register(Box::new(DetectionOverlayFeature::new()));
    pipeline.register(Box::new(TrackingOverlayFeature::new()));
    pipeline.register(Box::new(StatisticsOverlayFeature::new()));
    pipeline
}

/// Alpha-blend `color` over the pixel at (x, y); out-of-bounds is a no-op.
pub(crate) fn blend_pixel(frame: &mut RgbImage, x: i64, y: i64, color: [u8; 3], alpha: f32) {
    if x < 0 || y < 0 || x >= frame.width() as i64 || y >= frame.height() as i64 {
        return;
    }
    let alpha = alpha.clamp(0.0, 1.0);
    let pixel = frame.get_pixel_mut(x as u32, y as u32);
    for c in 0..3 {
        let blended = pixel.0[c] as f32 * (1.0 - alpha) + color[c] as f32 * alpha;
        pixel.0[c] = blended.round().clamp(0.0, 255.0) as u8;
    }
}
