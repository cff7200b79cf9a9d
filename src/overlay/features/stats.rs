use anyhow::Result;
use image::RgbImage;
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

use crate::overlay::features::blend_pixel;
use crate::overlay::{priority, FeatureConfig, FrameContext, OverlayFeature};

const PANEL_MARGIN: u32 = 4;
const ROW_HEIGHT: u32 = 8;
const ROW_GAP: u32 = 3;
const BAR_UNIT_PX: u32 = 12;

/// Compact per-camera status panel in the frame corner: one bar per metric
/// (detections, active tracks, zone hits this frame), bar length proportional
/// to the count. Intentionally glyph-free so the kernel carries no font
/// assets; the display layer renders numeric readouts from `FeatureStats`.
pub struct StatisticsOverlayFeature {
    opacity: f32,
    max_units: u32,
}

impl StatisticsOverlayFeature {
    pub fn new() -> Self {
        Self {
            opacity: 0.55,
            max_units: 10,
        }
    }

    fn rows(ctx: &FrameContext) -> [(u32, [u8; 3]); 3] {
        [
            (ctx.detections.len() as u32, [0, 220, 80]),
            (
                ctx.tracks.iter().filter(|t| t.is_active()).count() as u32,
                [66, 135, 245],
            ),
            (ctx.zone_hits.len() as u32, [245, 80, 80]),
        ]
    }
}

impl Default for StatisticsOverlayFeature {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayFeature for StatisticsOverlayFeature {
    fn id(&self) -> &'static str {
        "statistics_overlay"
    }

    fn display_name(&self) -> &'static str {
        "Statistics Overlay"
    }

    fn priority(&self) -> u32 {
        priority::STATISTICS
    }

    fn default_config(&self) -> FeatureConfig {
        let mut config = FeatureConfig::default();
        config.set("opacity", 0.55).set("max_units", 10);
        config
    }

    fn process_frame(&mut self, frame: &mut RgbImage, ctx: &FrameContext) -> Result<()> {
        let rows = Self::rows(ctx);
        let panel_w = (PANEL_MARGIN * 2 + self.max_units * BAR_UNIT_PX).min(frame.width());
        let panel_h =
            (PANEL_MARGIN * 2 + rows.len() as u32 * (ROW_HEIGHT + ROW_GAP)).min(frame.height());

        // Darkened backing so the bars stay readable on bright frames.
        for y in 0..panel_h {
            for x in 0..panel_w {
                blend_pixel(frame, x as i64, y as i64, [0, 0, 0], self.opacity);
            }
        }

        for (row, (count, color)) in rows.iter().enumerate() {
            let units = (*count).min(self.max_units);
            if units == 0 {
                continue;
            }
            let y = PANEL_MARGIN + row as u32 * (ROW_HEIGHT + ROW_GAP);
            if y + ROW_HEIGHT > frame.height() {
                break;
            }
            let bar_w = (units * BAR_UNIT_PX).min(frame.width().saturating_sub(PANEL_MARGIN));
            draw_filled_rect_mut(
                frame,
                Rect::at(PANEL_MARGIN as i32, y as i32).of_size(bar_w, ROW_HEIGHT),
                image::Rgb(*color),
            );
        }
        Ok(())
    }

    fn on_config_changed(&mut self, config: &FeatureConfig) {
        self.opacity = config.get_f32("opacity", 0.55).clamp(0.1, 0.9);
        self.max_units = config.get_u32("max_units", 10).clamp(1, 20);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Detection;
    use crate::BoundingBox;

    #[test]
    fn panel_backing_is_drawn_even_when_idle() {
        let mut frame = RgbImage::from_pixel(160, 120, image::Rgb([200, 200, 200]));
        let mut feature = StatisticsOverlayFeature::new();
        feature
            .process_frame(&mut frame, &FrameContext::new("cam-1", 0))
            .unwrap();

        // Panel corner darkened, far corner untouched.
        assert!(frame.get_pixel(2, 2).0[0] < 200);
        assert_eq!(frame.get_pixel(150, 110).0, [200, 200, 200]);
    }

    #[test]
    fn detection_bar_scales_with_count() {
        let mut ctx = FrameContext::new("cam-1", 0);
        for i in 0..3 {
            ctx.detections.push(Detection::new(
                BoundingBox::new(i as f32 * 10.0, 0.0, 5.0, 5.0),
                0.9,
                0,
                "person",
                0,
            ));
        }

        let mut frame = RgbImage::new(160, 120);
        let mut feature = StatisticsOverlayFeature::new();
        feature.process_frame(&mut frame, &ctx).unwrap();

        // 3 detections: bar spans 36px from the margin.
        let row_y = PANEL_MARGIN + ROW_HEIGHT / 2;
        assert_eq!(frame.get_pixel(PANEL_MARGIN + 30, row_y).0, [0, 220, 80]);
        assert_ne!(frame.get_pixel(PANEL_MARGIN + 40, row_y).0, [0, 220, 80]);
    }

    #[test]
    fn bar_length_caps_at_max_units() {
        let counts = StatisticsOverlayFeature::rows(&FrameContext::new("cam-1", 0));
        assert_eq!(counts.iter().map(|(c, _)| *c).sum::<u32>(), 0);

        let mut feature = StatisticsOverlayFeature::new();
        let mut config = FeatureConfig::default();
        config.set("max_units", 2);
        feature.on_config_changed(&config);
        assert_eq!(feature.max_units, 2);
    }
}
