//! Sitewatch Kernel
//!
//! This crate implements the core frame-processing pipeline for multi-camera
//! workplace safety monitoring.
//!
//! # Architecture
//!
//! Each camera runs an independent worker that drives the chain:
//!
//! capture -> detection -> tracking -> zone evaluation -> overlay rendering
//!
//! with qualifying detections forwarded to event persistence in parallel.
//! Cameras share read access to the zone cache (copy-on-write snapshots), the
//! overlay feature configuration, and the detection engine (internally locked
//! so one loaded model serves all cameras).
//!
//! # Module Structure
//!
//! - `detect`: detection engine, inference backends, letterbox/NMS ops
//! - `mapper`: image / relative / canvas coordinate transforms
//! - `track`: per-person tracking with greedy association
//! - `zones`: zone model, snapshot cache, intrusion evaluation
//! - `overlay`: priority-ordered frame annotation pipeline
//! - `events`: safety event records, SQLite store, media capture
//! - `ingest`: frame sources (synthetic stub for tests and demos)
//! - `pipeline`: per-camera workers and the persistence worker
//! - `monitor`: CPU/GPU utilization sampling

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod detect;
pub mod events;
pub mod ingest;
pub mod mapper;
pub mod monitor;
pub mod overlay;
pub mod pipeline;
pub mod track;
pub mod zones;

pub use detect::{Detection, DetectionEngine, EngineConfig, ExecutionPath};
pub use events::{
    EventKind, EventQuery, EventStore, InMemoryEventStore, MediaWriter, SafetyEvent,
    SqliteEventStore,
};
pub use ingest::{CapturedFrame, FrameSource, SourceConfig, SourceStats, SyntheticSource};
pub use mapper::{CoordinateMapper, Mapped};
pub use overlay::{FeatureConfig, FrameContext, OverlayFeature, OverlayPipeline};
pub use pipeline::{
    AnnotatedFrame, CameraWorker, CameraWorkerConfig, PersistenceRequest, PersistenceWorker,
    WorkerHandle,
};
pub use track::{PersonTracker, TrackPhase, TrackedPerson, TrackerConfig};
pub use zones::{
    CoordinateSpace, Zone, ZoneCache, ZoneEvaluator, ZoneHit, ZoneKind, ZoneSnapshot,
};

/// Milliseconds since the UNIX epoch.
pub fn now_ms() -> Result<u64> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
    Ok(now.as_millis() as u64)
}

// -------------------- Geometry primitives --------------------

/// A 2D point. The coordinate space (image pixels, relative [0,1], canvas
/// pixels, or world meters) is determined by context; see `CoordinateSpace`
/// and `CoordinateMapper`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned bounding box in source-frame pixels (top-left origin).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Build from center-form (cx, cy, w, h), the model's native output form.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x: cx - w / 2.0,
            y: cy - h / 2.0,
            w,
            h,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Bottom-center of the box: the "foot" reference point used for zone
    /// evaluation, since a standing person touches the floor plane there.
    pub fn foot_point(&self) -> Point {
        Point::new(self.x + self.w / 2.0, self.y + self.h)
    }

    /// Intersection-over-union with another box. Always in [0, 1]; zero when
    /// the boxes do not overlap.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = self.x.max(other.x);
        let iy = self.y.max(other.y);
        let ix2 = self.right().min(other.right());
        let iy2 = self.bottom().min(other.bottom());

        let iw = (ix2 - ix).max(0.0);
        let ih = (iy2 - iy).max(0.0);
        let intersection = iw * ih;

        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        (intersection / union).clamp(0.0, 1.0)
    }

    /// Clamp the box to lie within `width` x `height` image bounds.
    pub fn clamp_to(&self, width: f32, height: f32) -> BoundingBox {
        let x = self.x.clamp(0.0, width);
        let y = self.y.clamp(0.0, height);
        let x2 = self.right().clamp(0.0, width);
        let y2 = self.bottom().clamp(0.0, height);
        BoundingBox::new(x, y, (x2 - x).max(0.0), (y2 - y).max(0.0))
    }
}
