use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::mapper::CoordinateMapper;
use crate::track::TrackedPerson;
use crate::zones::{Zone, ZoneKind};
use crate::Point;

/// Ray-casting point-in-polygon test. Both the point and the polygon must be
/// in the same coordinate space; the evaluator converts everything to
/// relative [0,1] first.
pub fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[j];
        if (a.y > point.y) != (b.y > point.y) {
            let x_cross = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
            if point.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// One zone containment result for one track on one frame.
#[derive(Clone, Debug)]
pub struct ZoneHit {
    pub zone_id: String,
    pub zone_kind: ZoneKind,
    pub track_id: u64,
    /// True only on the entry edge; false while the person stays inside.
    pub transition: bool,
    /// The tested foot point, relative coordinates.
    pub foot: Point,
}

/// Evaluates tracked positions against a camera's zones.
///
/// Stateful per camera: remembers which (track, zone) pairs are currently
/// inside so the entry transition fires exactly once per continuous stay,
/// and applies a repeated-entry suppression window so a person hovering on a
/// boundary does not flood the event log.
pub struct ZoneEvaluator {
    inside: HashSet<(u64, String)>,
    last_entry_ms: HashMap<(u64, String), u64>,
    suppression_window_ms: u64,
}

impl ZoneEvaluator {
    pub fn new(suppression_window_ms: u64) -> Self {
        Self {
            inside: HashSet::new(),
            last_entry_ms: HashMap::new(),
            suppression_window_ms,
        }
    }

    /// Test each active track's foot point against each evaluable zone.
    ///
    /// Returns a hit per (track, zone) containment; `transition` marks new
    /// entries. Tracks absent from `tracks` lose their inside membership so
    /// a later return counts as a fresh entry (subject to the suppression
    /// window).
    pub fn evaluate(
        &mut self,
        tracks: &[TrackedPerson],
        zones: &[Arc<Zone>],
        mapper: &CoordinateMapper,
        now_ms: u64,
    ) -> Vec<ZoneHit> {
        let mut hits = Vec::new();
        let mut seen_inside: HashSet<(u64, String)> = HashSet::new();

        for track in tracks {
            if !track.is_active() {
                continue;
            }
            let foot = mapper.image_to_relative(track.bbox.foot_point()).point;

            for zone in zones {
                let Some(boundary) = zone.relative_boundary() else {
                    continue;
                };
                if !point_in_polygon(foot, &boundary) {
                    continue;
                }

                let key = (track.id, zone.id.clone());
                let was_inside = self.inside.contains(&key);
                let mut transition = false;
                if !was_inside {
                    let suppressed = self
                        .last_entry_ms
                        .get(&key)
                        .is_some_and(|last| now_ms.saturating_sub(*last) < self.suppression_window_ms);
                    if !suppressed {
                        transition = true;
                        self.last_entry_ms.insert(key.clone(), now_ms);
                    }
                }
                seen_inside.insert(key);

                hits.push(ZoneHit {
                    zone_id: zone.id.clone(),
                    zone_kind: zone.kind,
                    track_id: track.id,
                    transition,
                    foot,
                });
            }
        }

        self.inside = seen_inside;
        self.prune_entries(now_ms);
        hits
    }

    // Entry timestamps only matter within the suppression window; drop the rest
    // so long-running cameras don't accumulate per-track state forever.
    fn prune_entries(&mut self, now_ms: u64) {
        let window = self.suppression_window_ms;
        self.last_entry_ms
            .retain(|key, last| self.inside.contains(key) || now_ms.saturating_sub(*last) < window);
    }
}
