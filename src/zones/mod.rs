//! Safety zones: polygonal floor areas that trigger warning or danger events
//! when a tracked person's foot point enters them.
//!
//! - `Zone`: persisted model with an explicit coordinate-space tag
//! - `ZoneCache`: copy-on-write snapshots shared across camera workers
//! - `ZoneEvaluator`: point-in-polygon tests with entry-edge transitions

mod cache;
mod evaluator;

pub use cache::{ZoneCache, ZoneSnapshot};
pub use evaluator::{point_in_polygon, ZoneEvaluator, ZoneHit};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::Point;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneKind {
    Warning,
    Danger,
}

impl ZoneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Danger => "danger",
        }
    }
}

/// Which space a zone's boundary points live in. Persisted explicitly; legacy
/// records without the tag fall back to `infer` once at load time, never per
/// frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSpace {
    /// [0,1] x [0,1] fractions of the camera frame.
    Relative,
    /// Floor-plane meters, converted through the zone's calibration.
    World,
}

impl CoordinateSpace {
    /// Legacy heuristic for untagged records: all points within [0,1] is
    /// taken to mean relative coordinates. A legitimately tiny world-space
    /// zone near the origin misclassifies here, which is why the tag is now
    /// persisted.
    pub fn infer(points: &[Point]) -> Self {
        let all_unit = points
            .iter()
            .all(|p| (0.0..=1.0).contains(&p.x) && (0.0..=1.0).contains(&p.y));
        if all_unit {
            Self::Relative
        } else {
            Self::World
        }
    }
}

/// Camera calibration for converting world-space boundaries to frame
/// fractions.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Calibration {
    pub pixels_per_meter: f32,
    pub reference_width: u32,
    pub reference_height: u32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            pixels_per_meter: 100.0,
            reference_width: 640,
            reference_height: 480,
        }
    }
}

/// Display color and opacity for the zone overlay.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ZoneStyle {
    pub color: [u8; 3],
    pub opacity: f32,
}

impl Default for ZoneStyle {
    fn default() -> Self {
        Self {
            color: [255, 64, 0],
            opacity: 0.35,
        }
    }
}

/// A configured safety zone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub kind: ZoneKind,
    pub camera_id: String,
    /// Floor-plane boundary. Fewer than 3 points makes the zone inert
    /// (neither rendered nor evaluated), never an error.
    #[serde(default)]
    pub points: Vec<Point>,
    /// Explicit space tag; absent on legacy records.
    #[serde(default)]
    pub coordinate_space: Option<CoordinateSpace>,
    /// Display-only zone height in meters.
    #[serde(default)]
    pub height_m: f32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub style: ZoneStyle,
    #[serde(default)]
    pub calibration: Calibration,
}

fn default_enabled() -> bool {
    true
}

impl Zone {
    /// The definite coordinate space: the persisted tag, or the legacy
    /// heuristic for untagged records.
    pub fn space(&self) -> CoordinateSpace {
        self.coordinate_space
            .unwrap_or_else(|| CoordinateSpace::infer(&self.points))
    }

    /// Pin the space tag so the heuristic runs at most once per record.
    pub fn resolve_space(&mut self) {
        if self.coordinate_space.is_none() {
            let inferred = CoordinateSpace::infer(&self.points);
            log::warn!(
                "zone '{}' has no coordinate_space tag; inferred {:?} from its points",
                self.id,
                inferred
            );
            self.coordinate_space = Some(inferred);
        }
    }

    pub fn is_evaluable(&self) -> bool {
        self.enabled && self.points.len() >= 3
    }

    /// Boundary converted to relative [0,1] coordinates, the single space all
    /// containment tests run in. `None` when the zone is inert.
    pub fn relative_boundary(&self) -> Option<Vec<Point>> {
        if !self.is_evaluable() {
            return None;
        }
        let boundary = match self.space() {
            CoordinateSpace::Relative => self.points.clone(),
            CoordinateSpace::World => {
                let w = (self.calibration.reference_width as f32).max(1.0);
                let h = (self.calibration.reference_height as f32).max(1.0);
                let ppm = self.calibration.pixels_per_meter;
                self.points
                    .iter()
                    .map(|p| Point::new(p.x * ppm / w, p.y * ppm / h))
                    .collect()
            }
        };
        Some(boundary)
    }
}

/// Load zones from a JSON file.
///
/// Records are parsed individually: a malformed record is logged and skipped
/// rather than failing the whole file, and zones with missing boundaries are
/// kept but inert.
pub fn load_zones(path: &Path) -> Result<Vec<Zone>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read zone file {}", path.display()))?;
    let records: Vec<serde_json::Value> = serde_json::from_str(&raw)
        .with_context(|| format!("zone file {} is not a JSON array", path.display()))?;

    let mut zones = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        match serde_json::from_value::<Zone>(record) {
            Ok(mut zone) => {
                zone.resolve_space();
                if zone.points.len() < 3 {
                    log::warn!(
                        "zone '{}' has {} boundary points; it will not render or evaluate",
                        zone.id,
                        zone.points.len()
                    );
                }
                zones.push(zone);
            }
            Err(e) => {
                log::warn!("skipping malformed zone record #{index}: {e}");
            }
        }
    }
    Ok(zones)
}
