use serde::{Deserialize, Serialize};

use crate::BoundingBox;

/// A single object detection, immutable once produced for a frame.
///
/// Boxes are corner-form in source-frame pixels (already rescaled out of the
/// model's letterboxed input space). Detections are discarded after the frame
/// is processed unless they qualify as a `SafetyEvent`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Confidence in [0, 1].
    pub confidence: f32,
    pub class_id: usize,
    pub class_name: String,
    /// Assigned by the tracker after association; `None` straight out of the engine.
    pub track_id: Option<u64>,
    pub timestamp_ms: u64,
}

impl Detection {
    pub fn new(
        bbox: BoundingBox,
        confidence: f32,
        class_id: usize,
        class_name: impl Into<String>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
            class_name: class_name.into(),
            track_id: None,
            timestamp_ms,
        }
    }
}
