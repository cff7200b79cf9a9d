use anyhow::Result;
use image::RgbImage;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::overlay::{priority, FeatureConfig, FrameContext, OverlayFeature};

/// Hollow bounding box per detection plus a confidence bar along the box top.
/// Text labels are deliberately left to the display layer; the bar reads at a
/// glance without font rendering.
pub struct DetectionOverlayFeature {
    color: [u8; 3],
    thickness: u32,
    show_confidence: bool,
}

impl DetectionOverlayFeature {
    pub fn new() -> Self {
        Self {
            color: [0, 220, 80],
            thickness: 2,
            show_confidence: true,
        }
    }
}

impl Default for DetectionOverlayFeature {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayFeature for DetectionOverlayFeature {
    fn id(&self) -> &'static str {
        "detection_overlay"
    }

    fn display_name(&self) -> &'static str {
        "Detection Overlay"
    }

    fn priority(&self) -> u32 {
        priority::DETECTION_OVERLAY
    }

    fn default_config(&self) -> FeatureConfig {
        let mut config = FeatureConfig::default();
        config
            .set("color", serde_json::json!([0, 220, 80]))
            .set("thickness", 2)
            .set("show_confidence", true);
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
            let w = bbox.w as u32;
            let h = bbox.h as u32;
            if w < 2 || h < 2 {
                continue;
            }

            for t in 0..self.thickness {
                let inset = t as i32;
                let rw = w.saturating_sub(2 * t);
                let rh = h.saturating_sub(2 * t);
                if rw < 1 || rh < 1 {
                    break;
                }
                draw_hollow_rect_mut(
                    frame,
                    Rect::at(bbox.x as i32 + inset, bbox.y as i32 + inset).of_size(rw, rh),
                    image::Rgb(self.color),
                );
            }

            if self.show_confidence {
                // Filled bar across the top edge, length proportional to
                // confidence.
                let bar_w = (w as f32 * detection.confidence.clamp(0.0, 1.0)) as u32;
                let bar_h = 3u32.min(h);
                if bar_w >= 1 {
                    imageproc::drawing::draw_filled_rect_mut(
                        frame,
                        Rect::at(bbox.x as i32, bbox.y as i32).of_size(bar_w, bar_h),
                        image::Rgb(self.color),
                    );
                }
            }
        }
        Ok(())
    }

    fn on_config_changed(&mut self, config: &FeatureConfig) {
        self.color = config.get_color("color", [0, 220, 80]);
        self.thickness = config.get_u32("thickness", 2).clamp(1, 8);
        self.show_confidence = config.get_bool("show_confidence", true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Detection;
    use crate::BoundingBox;

    fn ctx_with_box() -> FrameContext {
        let mut ctx = FrameContext::new("cam-1", 0);
        ctx.detections.push(Detection::new(
            BoundingBox::new(10.0, 10.0, 40.0, 40.0),
            0.5,
            0,
            "person",
            0,
        ));
        ctx
    }

    #[test]
    fn draws_box_edges_and_leaves_interior_alone() {
        let mut frame = RgbImage::new(64, 64);
        let mut feature = DetectionOverlayFeature::new();
        feature.show_confidence = false;
        feature.process_frame(&mut frame, &ctx_with_box()).unwrap();

        // Left edge painted, interior untouched.
        assert_eq!(frame.get_pixel(10, 30).0, [0, 220, 80]);
        assert_eq!(frame.get_pixel(30, 30).0, [0, 0, 0]);
    }

    #[test]
    fn confidence_bar_length_tracks_confidence() {
        let mut frame = RgbImage::new(64, 64);
        let mut feature = DetectionOverlayFeature::new();
        feature.process_frame(&mut frame, &ctx_with_box()).unwrap();

        // 0.5 confidence over a 40px box: pixel at x=10+15 filled, x=10+35
        // past the bar end and past the top edge stroke, so unfilled.
        assert_eq!(frame.get_pixel(25, 11).0, [0, 220, 80]);
        assert_eq!(frame.get_pixel(45, 12).0, [0, 0, 0]);
    }

    #[test]
    fn skips_frames_without_detections() {
        let feature = DetectionOverlayFeature::new();
        assert!(!feature.should_process(&FrameContext::new("cam-1", 0)));
    }
}
