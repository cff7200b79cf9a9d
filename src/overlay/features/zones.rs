use anyhow::Result;
use image::RgbImage;
use imageproc::drawing::draw_line_segment_mut;

use crate::overlay::features::blend_pixel;
use crate::overlay::{priority, FeatureConfig, FrameContext, OverlayFeature};
use crate::zones::{point_in_polygon, ZoneKind};
use crate::Point;

/// Draws every enabled zone for the camera: a translucent fill plus a solid
/// boundary outline, colored by zone kind unless the zone carries its own
/// style color.
pub struct ZoneOverlayFeature {
    fill: bool,
    outline_thickness: u32,
}

impl ZoneOverlayFeature {
    pub fn new() -> Self {
        Self {
            fill: true,
            outline_thickness: 2,
        }
    }

    fn zone_color(kind: ZoneKind, style_color: [u8; 3]) -> [u8; 3] {
        // A configured style color wins; otherwise kind defaults.
        if style_color != [255, 64, 0] {
            return style_color;
        }
        match kind {
            ZoneKind::Warning => [255, 180, 0],
            ZoneKind::Danger => [255, 32, 32],
        }
    }
}

impl Default for ZoneOverlayFeature {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayFeature for ZoneOverlayFeature {
    fn id(&self) -> &'static str {
        "zone_overlay"
    }

    fn display_name(&self) -> &'static str {
        "Zone Overlay"
    }

    fn priority(&self) -> u32 {
        priority::ZONE_OVERLAY
    }

    fn default_config(&self) -> FeatureConfig {
        let mut config = FeatureConfig::default();
        config.set("fill", true).set("outline_thickness", 2);
        config
    }

    fn should_process(&self, ctx: &FrameContext) -> bool {
        !ctx.zones.is_empty()
    }

    fn process_frame(&mut self, frame: &mut RgbImage, ctx: &FrameContext) -> Result<()> {
        let width = frame.width() as f32;
        let height = frame.height() as f32;

        for zone in ctx.zones.for_camera(&ctx.camera_id) {
            let Some(boundary) = zone.relative_boundary() else {
                continue;
            };
            let pixels: Vec<Point> = boundary
                .iter()
                .map(|p| Point::new(p.x * width, p.y * height))
                .collect();
            let color = Self::zone_color(zone.kind, zone.style.color);

            if self.fill {
                fill_polygon(frame, &boundary, color, zone.style.opacity);
            }

            for i in 0..pixels.len() {
                let a = pixels[i];
                let b = pixels[(i + 1) % pixels.len()];
                // Thickness stacks parallel segments offset along the edge
                // normal, so near-vertical edges widen like horizontal ones.
                let len = ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt().max(1.0);
                let nx = -(b.y - a.y) / len;
                let ny = (b.x - a.x) / len;
                for t in 0..self.outline_thickness {
                    let offset = t as f32;
                    draw_line_segment_mut(
                        frame,
                        (a.x + nx * offset, a.y + ny * offset),
                        (b.x + nx * offset, b.y + ny * offset),
                        image::Rgb(color),
                    );
                }
            }
        }
        Ok(())
    }

    fn on_config_changed(&mut self, config: &FeatureConfig) {
        self.fill = config.get_bool("fill", true);
        self.outline_thickness = config.get_u32("outline_thickness", 2).clamp(1, 8);
    }
}

// Scanned over the polygon's bounding box in relative space; fine for the
// handful of zones a camera carries.
fn fill_polygon(frame: &mut RgbImage, boundary: &[Point], color: [u8; 3], opacity: f32) {
    let width = frame.width() as f32;
    let height = frame.height() as f32;

    let min_x = boundary.iter().fold(f32::MAX, |m, p| m.min(p.x)).max(0.0);
    let max_x = boundary.iter().fold(f32::MIN, |m, p| m.max(p.x)).min(1.0);
    let min_y = boundary.iter().fold(f32::MAX, |m, p| m.min(p.y)).max(0.0);
    let max_y = boundary.iter().fold(f32::MIN, |m, p| m.max(p.y)).min(1.0);

    let x0 = (min_x * width) as i64;
    let x1 = (max_x * width) as i64;
    let y0 = (min_y * height) as i64;
    let y1 = (max_y * height) as i64;

    for y in y0..=y1 {
        for x in x0..=x1 {
            let rel = Point::new((x as f32 + 0.5) / width, (y as f32 + 0.5) / height);
            if point_in_polygon(rel, boundary) {
                blend_pixel(frame, x, y, color, opacity);
            }
        }
    }
}
