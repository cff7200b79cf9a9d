//! Per-person tracking with greedy association.
//!
//! Each detection is associated to an existing track by IoU, falling back to
//! normalized centroid distance for fast movers, with an optional appearance
//! tie-breaker so a track can survive brief full occlusion. Greedy best-match
//! assignment, not optimal assignment: identities can swap when two people
//! cross paths closely.
//!
//! Track lifecycle: spawned Active on first sight, aged by a miss counter
//! when unmatched, demoted to Lost after `max_disappear_frames` (excluded
//! from rendering and zone evaluation), evicted after a retention window.

use std::collections::VecDeque;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::detect::Detection;
use crate::{BoundingBox, Point};

#[derive(Clone, Debug)]
pub struct TrackerConfig {
    /// Minimum IoU for a primary match.
    pub iou_threshold: f32,
    /// Maximum centroid distance (fraction of the frame diagonal) for the
    /// fallback match when boxes no longer overlap.
    pub similarity_threshold: f32,
    /// Consecutive unmatched frames before a track is demoted to Lost.
    pub max_disappear_frames: u32,
    /// Lost frames before the track is evicted entirely.
    pub retention_frames: u32,
    /// Bounded length of the per-track centroid history.
    pub history_len: usize,
    /// Weight of the appearance similarity tie-breaker; 0 disables re-id.
    pub appearance_weight: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            similarity_threshold: 0.08,
            max_disappear_frames: 30,
            retention_frames: 60,
            history_len: 32,
            appearance_weight: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackPhase {
    Active,
    Lost,
}

/// A person with a stable identity across frames.
#[derive(Clone, Debug)]
pub struct TrackedPerson {
    pub id: u64,
    pub bbox: BoundingBox,
    pub phase: TrackPhase,
    /// Time-ordered centroid history, oldest first, capped at `history_len`.
    pub history: VecDeque<Point>,
    pub misses: u32,
    pub last_seen_ms: u64,
    pub appearance: Option<Vec<f32>>,
    pub(crate) frames_lost: u32,
}

impl TrackedPerson {
    pub fn is_active(&self) -> bool {
        self.phase == TrackPhase::Active
    }
}

pub struct PersonTracker {
    config: TrackerConfig,
    frame_diagonal: f32,
    next_id: u64,
    tracks: Vec<TrackedPerson>,
}

impl PersonTracker {
    pub fn new(config: TrackerConfig, frame_w: u32, frame_h: u32) -> Self {
        let w = frame_w as f32;
        let h = frame_h as f32;
        Self {
            config,
            frame_diagonal: (w * w + h * h).sqrt().max(1.0),
            next_id: 1,
            tracks: Vec::new(),
        }
    }

    /// Associate one frame's detections with existing tracks.
    ///
    /// Assigns `track_id` on matched detections, spawns tracks for unmatched
    /// ones, and ages everything else. Safe to call with an empty slice (a
    /// camera producing no detections just ages its tracks out). Without the
    /// frame there is nothing to describe appearance with, so association is
    /// geometry-only here; workers call `update_with_frame`.
    pub fn update(&mut self, detections: &mut [Detection]) {
        self.update_inner(detections, &[]);
    }

    /// `update` plus the re-id tie-breaker: computes a color histogram over
    /// each detection's frame region, scores it against the descriptor stored
    /// on each track, and refreshes the descriptor of whichever track the
    /// detection ends up on. No-op overhead when `appearance_weight` is 0.
    pub fn update_with_frame(&mut self, detections: &mut [Detection], frame: &RgbImage) {
        if self.config.appearance_weight <= 0.0 {
            return self.update_inner(detections, &[]);
        }
        let descriptors: Vec<Vec<f32>> = detections
            .iter()
            .map(|det| appearance_descriptor(frame, &det.bbox))
            .collect();
        self.update_inner(detections, &descriptors);
    }

    fn update_inner(&mut self, detections: &mut [Detection], descriptors: &[Vec<f32>]) {
        let mut candidates: Vec<(usize, usize, f32)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            if !track.is_active() {
                continue;
            }
            for (di, det) in detections.iter().enumerate() {
                let descriptor = descriptors.get(di).map(Vec::as_slice);
                if let Some(score) = self.match_score(track, det, descriptor) {
                    candidates.push((ti, di, score));
                }
            }
        }

        // Greedy: best score first, each track and detection used once.
        candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        let mut track_used = vec![false; self.tracks.len()];
        let mut det_used = vec![false; detections.len()];
        for (ti, di, _) in candidates {
            if track_used[ti] || det_used[di] {
                continue;
            }
            track_used[ti] = true;
            det_used[di] = true;

            let track = &mut self.tracks[ti];
            let det = &mut detections[di];
            track.bbox = det.bbox;
            track.misses = 0;
            track.last_seen_ms = det.timestamp_ms;
            if let Some(descriptor) = descriptors.get(di) {
                track.appearance = Some(descriptor.clone());
            }
            push_bounded(&mut track.history, det.bbox.center(), self.config.history_len);
            det.track_id = Some(track.id);
        }

        // Unmatched detections spawn new tracks.
        for (di, det) in detections.iter_mut().enumerate() {
            if det_used[di] {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            let mut history = VecDeque::with_capacity(self.config.history_len);
            history.push_back(det.bbox.center());
            self.tracks.push(TrackedPerson {
                id,
                bbox: det.bbox,
                phase: TrackPhase::Active,
                history,
                misses: 0,
                last_seen_ms: det.timestamp_ms,
                appearance: descriptors.get(di).cloned(),
                frames_lost: 0,
            });
            det.track_id = Some(id);
        }

        // Age unmatched tracks; demote and evict. `track_used` was sized
        // before the spawn loop, so tracks spawned this frame sit past its
        // end and are not aged on their spawn frame.
        let max_disappear = self.config.max_disappear_frames;
        let retention = self.config.retention_frames;
        let pre_spawn = track_used.len();
        for (ti, track) in self.tracks.iter_mut().enumerate().take(pre_spawn) {
            if track_used[ti] {
                continue;
            }
            match track.phase {
                TrackPhase::Active => {
                    track.misses += 1;
                    if track.misses > max_disappear {
                        track.phase = TrackPhase::Lost;
                        track.frames_lost = 0;
                    }
                }
                TrackPhase::Lost => {
                    track.frames_lost += 1;
                }
            }
        }
        self.tracks
            .retain(|t| t.phase == TrackPhase::Active || t.frames_lost <= retention);
    }

    /// Tracks currently eligible for rendering and zone evaluation.
    pub fn active_tracks(&self) -> Vec<TrackedPerson> {
        self.tracks.iter().filter(|t| t.is_active()).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    fn match_score(
        &self,
        track: &TrackedPerson,
        det: &Detection,
        descriptor: Option<&[f32]>,
    ) -> Option<f32> {
        let iou = track.bbox.iou(&det.bbox);
        let mut score = if iou >= self.config.iou_threshold {
            // IoU matches always outrank distance-only matches.
            Some(1.0 + iou)
        } else {
            let dist = track.bbox.center().distance_to(&det.bbox.center()) / self.frame_diagonal;
            (dist <= self.config.similarity_threshold).then(|| 1.0 - dist)
        }?;

        if self.config.appearance_weight > 0.0 {
            if let (Some(track_app), Some(det_app)) = (&track.appearance, descriptor) {
                score += self.config.appearance_weight
                    * appearance_similarity(track_app, det_app);
            }
        }
        Some(score)
    }
}

fn push_bounded(history: &mut VecDeque<Point>, point: Point, cap: usize) {
    while history.len() >= cap.max(1) {
        history.pop_front();
    }
    history.push_back(point);
}

/// Cosine similarity between two descriptors, 0 when shapes differ.
pub fn appearance_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Coarse RGB histogram over a box region, normalized to unit mass.
/// Cheap appearance descriptor for the re-id tie-breaker.
pub fn appearance_descriptor(frame: &RgbImage, bbox: &BoundingBox) -> Vec<f32> {
    const BINS: usize = 8;
    let mut hist = vec![0.0f32; BINS * 3];
    let clamped = bbox.clamp_to(frame.width() as f32, frame.height() as f32);
    let mut count = 0.0f32;
    let x0 = clamped.x as u32;
    let y0 = clamped.y as u32;
    let x1 = (clamped.right() as u32).min(frame.width());
    let y1 = (clamped.bottom() as u32).min(frame.height());
    for y in y0..y1 {
        for x in x0..x1 {
            let pixel = frame.get_pixel(x, y);
            for c in 0..3 {
                let bin = (pixel.0[c] as usize * BINS) / 256;
                hist[c * BINS + bin] += 1.0;
            }
            count += 1.0;
        }
    }
    if count > 0.0 {
        for v in &mut hist {
            *v /= count;
        }
    }
    hist
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection::new(BoundingBox::new(x, y, w, h), 0.9, 0, "person", 1000)
    }

    fn tracker() -> PersonTracker {
        PersonTracker::new(TrackerConfig::default(), 640, 480)
    }

    #[test]
    fn overlapping_detection_keeps_track_id() {
        let mut tracker = tracker();

        let mut frame1 = vec![det(100.0, 100.0, 50.0, 80.0)];
        tracker.update(&mut frame1);
        let id = frame1[0].track_id.unwrap();

        let mut frame2 = vec![det(105.0, 102.0, 50.0, 80.0)];
        tracker.update(&mut frame2);
        assert_eq!(frame2[0].track_id, Some(id));
        assert_eq!(tracker.active_tracks().len(), 1);
    }

    #[test]
    fn centroid_fallback_rescues_fast_movers() {
        let mut tracker = PersonTracker::new(
            TrackerConfig {
                similarity_threshold: 0.2,
                ..TrackerConfig::default()
            },
            640,
            480,
        );

        let mut frame1 = vec![det(100.0, 100.0, 30.0, 60.0)];
        tracker.update(&mut frame1);
        let id = frame1[0].track_id.unwrap();

        // Jumped past any overlap but still within the distance gate.
        let mut frame2 = vec![det(160.0, 100.0, 30.0, 60.0)];
        tracker.update(&mut frame2);
        assert_eq!(frame2[0].track_id, Some(id));
    }

    #[test]
    fn distant_detection_spawns_new_track() {
        let mut tracker = tracker();

        let mut frame1 = vec![det(0.0, 0.0, 30.0, 60.0)];
        tracker.update(&mut frame1);
        let first = frame1[0].track_id.unwrap();

        let mut frame2 = vec![det(600.0, 400.0, 30.0, 60.0)];
        tracker.update(&mut frame2);
        assert_ne!(frame2[0].track_id, Some(first));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn unmatched_track_goes_lost_then_evicted() {
        let config = TrackerConfig {
            max_disappear_frames: 2,
            retention_frames: 3,
            ..TrackerConfig::default()
        };
        let mut tracker = PersonTracker::new(config, 640, 480);

        let mut frame = vec![det(100.0, 100.0, 30.0, 60.0)];
        tracker.update(&mut frame);
        assert_eq!(tracker.active_tracks().len(), 1);

        // Three empty frames: misses 1, 2, then 3 > 2 demotes to Lost.
        for _ in 0..3 {
            tracker.update(&mut []);
        }
        assert!(tracker.active_tracks().is_empty());
        assert_eq!(tracker.len(), 1);

        // Retention window passes; the track is evicted.
        for _ in 0..4 {
            tracker.update(&mut []);
        }
        assert!(tracker.is_empty());
    }

    #[test]
    fn spawn_frame_does_not_age_the_new_track() {
        let config = TrackerConfig {
            max_disappear_frames: 2,
            ..TrackerConfig::default()
        };
        let mut tracker = PersonTracker::new(config, 640, 480);

        let mut frame = vec![det(100.0, 100.0, 30.0, 60.0)];
        tracker.update(&mut frame);
        assert_eq!(tracker.tracks[0].misses, 0);

        // Demoted only once the miss counter exceeds the limit: two unmatched
        // frames keep it Active, the third demotes it.
        tracker.update(&mut []);
        tracker.update(&mut []);
        assert_eq!(tracker.active_tracks().len(), 1);
        tracker.update(&mut []);
        assert!(tracker.active_tracks().is_empty());
    }

    #[test]
    fn appearance_breaks_geometry_ties() {
        let config = TrackerConfig {
            appearance_weight: 1.0,
            ..TrackerConfig::default()
        };
        let mut tracker = PersonTracker::new(config, 640, 480);

        // All-red frame: the track's stored descriptor is a red histogram.
        let red = image::RgbImage::from_pixel(640, 480, image::Rgb([255, 0, 0]));
        let mut frame1 = vec![det(100.0, 100.0, 20.0, 40.0)];
        tracker.update_with_frame(&mut frame1, &red);
        let id = frame1[0].track_id.unwrap();
        assert_eq!(tracker.tracks[0].appearance.as_ref().unwrap().len(), 24);

        // Two candidates with identical IoU against the track; only the
        // second sits on red pixels, so appearance must decide.
        let mut frame = image::RgbImage::from_pixel(640, 480, image::Rgb([0, 0, 255]));
        for y in 100..140 {
            for x in 110..130 {
                frame.put_pixel(x, y, image::Rgb([255, 0, 0]));
            }
        }
        let mut frame2 = vec![
            det(90.0, 100.0, 20.0, 40.0),
            det(110.0, 100.0, 20.0, 40.0),
        ];
        tracker.update_with_frame(&mut frame2, &frame);
        assert_eq!(frame2[1].track_id, Some(id));
        assert_ne!(frame2[0].track_id, Some(id));
    }

    #[test]
    fn zero_detections_never_crash() {
        let mut tracker = tracker();
        for _ in 0..100 {
            tracker.update(&mut []);
        }
        assert!(tracker.is_empty());
    }

    #[test]
    fn history_is_bounded_and_time_ordered() {
        let config = TrackerConfig {
            history_len: 4,
            ..TrackerConfig::default()
        };
        let mut tracker = PersonTracker::new(config, 640, 480);

        for i in 0..10 {
            let mut frame = vec![det(100.0 + i as f32, 100.0, 30.0, 60.0)];
            tracker.update(&mut frame);
        }

        let tracks = tracker.active_tracks();
        assert_eq!(tracks.len(), 1);
        let history = &tracks[0].history;
        assert_eq!(history.len(), 4);
        // Oldest first.
        for pair in history.iter().collect::<Vec<_>>().windows(2) {
            assert!(pair[0].x < pair[1].x);
        }
    }

    #[test]
    fn cosine_similarity_bounds() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((appearance_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(appearance_similarity(&a, &[0.0, 1.0, 0.0]), 0.0);
        assert_eq!(appearance_similarity(&a, &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn appearance_descriptor_is_normalized() {
        let frame = image::RgbImage::from_pixel(32, 32, image::Rgb([200, 100, 50]));
        let descriptor = appearance_descriptor(&frame, &BoundingBox::new(4.0, 4.0, 16.0, 16.0));
        let mass: f32 = descriptor.iter().sum();
        // One bin per channel gets all the mass.
        assert!((mass - 3.0).abs() < 1e-3);
    }
}
