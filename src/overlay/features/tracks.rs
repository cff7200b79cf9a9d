use anyhow::Result;
use image::RgbImage;
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};

use crate::overlay::{priority, FeatureConfig, FrameContext, OverlayFeature};

/// Cycling palette so neighboring track ids get visually distinct colors.
const PALETTE: [[u8; 3]; 6] = [
    [66, 135, 245],
    [245, 166, 35],
    [126, 211, 33],
    [189, 16, 224],
    [80, 227, 194],
    [245, 80, 80],
];

/// Draws each active track's motion trail and a marker at its current
/// centroid, colored by track id.
pub struct TrackingOverlayFeature {
    trail: bool,
    marker_radius: i32,
}

impl TrackingOverlayFeature {
    pub fn new() -> Self {
        Self {
            trail: true,
            marker_radius: 4,
        }
    }

    fn color_for(id: u64) -> [u8; 3] {
        PALETTE[(id as usize) % PALETTE.len()]
    }
}

impl Default for TrackingOverlayFeature {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayFeature for TrackingOverlayFeature {
    fn id(&self) -> &'static str {
        "tracking_overlay"
    }

    fn display_name(&self) -> &'static str {
        "Tracking Overlay"
    }

    fn priority(&self) -> u32 {
        priority::TRACKING_OVERLAY
    }

    fn default_config(&self) -> FeatureConfig {
        let mut config = FeatureConfig::default();
        config.set("trail", true).set("marker_radius", 4);
        config
    }

    fn should_process(&self, ctx: &FrameContext) -> bool {
        ctx.tracks.iter().any(|t| t.is_active())
    }

    fn process_frame(&mut self, frame: &mut RgbImage, ctx: &FrameContext) -> Result<()> {
        for track in ctx.tracks.iter().filter(|t| t.is_active()) {
            let color = image::Rgb(Self::color_for(track.id));

            if self.trail && track.history.len() >= 2 {
                let points: Vec<_> = track.history.iter().collect();
                for pair in points.windows(2) {
                    draw_line_segment_mut(
                        frame,
                        (pair[0].x, pair[0].y),
                        (pair[1].x, pair[1].y),
                        color,
                    );
                }
            }

            let center = track.bbox.center();
            draw_filled_circle_mut(
                frame,
                (center.x as i32, center.y as i32),
                self.marker_radius,
                color,
            );
        }
        Ok(())
    }

    fn on_config_changed(&mut self, config: &FeatureConfig) {
        self.trail = config.get_bool("trail", true);
        self.marker_radius = config.get_u32("marker_radius", 4).clamp(1, 16) as i32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{TrackPhase, TrackedPerson};
    use crate::{BoundingBox, Point};
    use std::collections::VecDeque;

    fn track(id: u64, phase: TrackPhase, history: Vec<Point>) -> TrackedPerson {
        let center = history.last().copied().unwrap_or(Point::new(32.0, 32.0));
        TrackedPerson {
            id,
            bbox: BoundingBox::from_center(center.x, center.y, 10.0, 20.0),
            phase,
            history: VecDeque::from(history),
            misses: 0,
            last_seen_ms: 0,
            appearance: None,
            frames_lost: 0,
        }
    }

    #[test]
    fn marker_and_trail_are_drawn_for_active_tracks() {
        let mut frame = RgbImage::new(64, 64);
        let mut ctx = FrameContext::new("cam-1", 0);
        ctx.tracks.push(track(
            0,
            TrackPhase::Active,
            vec![Point::new(10.0, 32.0), Point::new(40.0, 32.0)],
        ));

        let mut feature = TrackingOverlayFeature::new();
        feature.process_frame(&mut frame, &ctx).unwrap();

        // Trail passes through (25, 32); marker covers the centroid.
        assert_eq!(frame.get_pixel(25, 32).0, PALETTE[0]);
        assert_eq!(frame.get_pixel(40, 32).0, PALETTE[0]);
    }

    #[test]
    fn lost_tracks_are_not_drawn() {
        let mut frame = RgbImage::new(64, 64);
        let mut ctx = FrameContext::new("cam-1", 0);
        ctx.tracks.push(track(
            0,
            TrackPhase::Lost,
            vec![Point::new(10.0, 32.0), Point::new(40.0, 32.0)],
        ));

        let feature = TrackingOverlayFeature::new();
        assert!(!feature.should_process(&ctx));
    }

    #[test]
    fn track_colors_cycle_by_id() {
        assert_eq!(
            TrackingOverlayFeature::color_for(1),
            TrackingOverlayFeature::color_for(1 + PALETTE.len() as u64)
        );
        assert_ne!(
            TrackingOverlayFeature::color_for(1),
            TrackingOverlayFeature::color_for(2)
        );
    }
}
