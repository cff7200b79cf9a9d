use anyhow::Result;
use image::imageops::FilterType;
use image::RgbImage;

use crate::overlay::{priority, FeatureConfig, FrameContext, OverlayFeature};

/// Pixelates every detected person region so later overlays draw on
/// anonymized pixels. Runs at the lowest priority in the chain for exactly
/// that reason.
pub struct PrivacyBlurFeature {
    pixel_size: u32,
    /// Fraction of box height blurred, measured from the top (head and
    /// torso); 1.0 blurs the full box.
    coverage: f32,
}

impl PrivacyBlurFeature {
    pub fn new() -> Self {
        Self {
            pixel_size: 12,
            coverage: 1.0,
        }
    }
}

impl Default for PrivacyBlurFeature {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayFeature for PrivacyBlurFeature {
    fn id(&self) -> &'static str {
        "privacy_blur"
    }

    fn display_name(&self) -> &'static str {
        "Privacy Blur"
    }

    fn priority(&self) -> u32 {
        priority::PRIVACY_BLUR
    }

    fn default_config(&self) -> FeatureConfig {
        let mut config = FeatureConfig::default();
        config.set("pixel_size", 12).set("coverage", 1.0);
        config
    }

    fn should_process(&self, ctx: &FrameContext) -> bool {
        !ctx.detections.is_empty()
    }

    fn process_frame(&mut self, frame: &mut RgbImage, ctx: &FrameContext) -> Result<()> {
        for detection in &ctx.detections {
            let bbox = detection
                .bbox
                .clamp_to(frame.width() as f32, frame.height() as f32);
            let x = bbox.x as u32;
            let y = bbox.y as u32;
            let w = bbox.w as u32;
            let h = ((bbox.h * self.coverage) as u32).min(frame.height().saturating_sub(y));
            if w < 2 || h < 2 {
                continue;
            }

            // Mosaic: shrink the region and scale it back up with nearest
            // neighbor. Irreversible at pixel_size granularity.
            let region = image::imageops::crop_imm(frame, x, y, w, h).to_image();
            let down_w = (w / self.pixel_size).max(1);
            let down_h = (h / self.pixel_size).max(1);
            let down = image::imageops::resize(&region, down_w, down_h, FilterType::Triangle);
            let up = image::imageops::resize(&down, w, h, FilterType::Nearest);
            image::imageops::replace(frame, &up, x as i64, y as i64);
        }
        Ok(())
    }

    fn on_config_changed(&mut self, config: &FeatureConfig) {
        self.pixel_size = config.get_u32("pixel_size", 12).max(2);
        self.coverage = config.get_f32("coverage", 1.0).clamp(0.1, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Detection;
    use crate::BoundingBox;

    #[test]
    fn blur_flattens_detail_inside_the_box() {
        // Checkerboard has maximal local contrast; the mosaic removes it.
        let mut frame = RgbImage::from_fn(64, 64, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgb([255, 255, 255])
            } else {
                image::Rgb([0, 0, 0])
            }
        });

        let mut ctx = FrameContext::new("cam-1", 0);
        ctx.detections.push(Detection::new(
            BoundingBox::new(16.0, 16.0, 32.0, 32.0),
            0.9,
            0,
            "person",
            0,
        ));

        let mut feature = PrivacyBlurFeature::new();
        feature.process_frame(&mut frame, &ctx).unwrap();

        // Inside the box neighboring pixels are now equal in 12px blocks.
        assert_eq!(frame.get_pixel(20, 20), frame.get_pixel(21, 20));
        // Outside the box the checkerboard survives.
        assert_ne!(frame.get_pixel(2, 2), frame.get_pixel(3, 2));
    }

    #[test]
    fn skips_frames_without_detections() {
        let feature = PrivacyBlurFeature::new();
        assert!(!feature.should_process(&FrameContext::new("cam-1", 0)));
    }
}
