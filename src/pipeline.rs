//! Per-camera processing workers and event persistence.
//!
//! One thread per camera runs capture → inference → tracking → zone
//! evaluation → overlay rendering, then hands the annotated frame to a
//! bounded channel (consumers may drop frames, the pipeline never blocks)
//! and candidate events to the persistence worker. Workers receive their
//! collaborators in the constructor; nothing is looked up globally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use image::RgbImage;

use crate::detect::DetectionEngine;
use crate::events::{EventKind, EventStore, MediaWriter, SafetyEvent};
use crate::ingest::FrameSource;
use crate::mapper::CoordinateMapper;
use crate::overlay::{FrameContext, OverlayPipeline};
use crate::track::{PersonTracker, TrackerConfig};
use crate::zones::{ZoneCache, ZoneEvaluator, ZoneKind};

/// Annotated output of one worker iteration.
pub struct AnnotatedFrame {
    pub camera_id: String,
    pub frame_index: u64,
    pub timestamp_ms: u64,
    pub image: RgbImage,
}

/// An event plus the frame it should be snapshotted from.
pub struct PersistenceRequest {
    pub event: SafetyEvent,
    pub snapshot: Option<RgbImage>,
}

/// Running worker thread plus its stop flag.
pub struct WorkerHandle {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Request shutdown. The in-flight frame finishes; the loop exits on the
    /// next iteration.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn join(self) {
        self.stop.store(true, Ordering::SeqCst);
        if self.join.join().is_err() {
            log::error!("worker thread panicked");
        }
    }
}

/// Tunables for one camera worker.
#[derive(Clone, Debug)]
pub struct CameraWorkerConfig {
    pub camera_id: String,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub target_fps: u32,
    pub suppression_window_ms: u64,
    pub tracker: TrackerConfig,
}

impl Default for CameraWorkerConfig {
    fn default() -> Self {
        Self {
            camera_id: "cam-1".to_string(),
            confidence_threshold: 0.5,
            nms_threshold: 0.45,
            target_fps: 10,
            suppression_window_ms: 5_000,
            tracker: TrackerConfig::default(),
        }
    }
}

pub struct CameraWorker {
    config: CameraWorkerConfig,
    source: Box<dyn FrameSource>,
    engine: Arc<DetectionEngine>,
    zone_cache: Arc<ZoneCache>,
    overlay: OverlayPipeline,
    frames_out: Sender<AnnotatedFrame>,
    events_out: Sender<PersistenceRequest>,
}

impl CameraWorker {
    pub fn new(
        config: CameraWorkerConfig,
        source: Box<dyn FrameSource>,
        engine: Arc<DetectionEngine>,
        zone_cache: Arc<ZoneCache>,
        overlay: OverlayPipeline,
        frames_out: Sender<AnnotatedFrame>,
        events_out: Sender<PersistenceRequest>,
    ) -> Self {
        Self {
            config,
            source,
            engine,
            zone_cache,
            overlay,
            frames_out,
            events_out,
        }
    }

    /// Start the worker thread.
    pub fn spawn(self) -> WorkerHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let camera_id = self.config.camera_id.clone();
        let join = std::thread::Builder::new()
            .name(format!("camera-{camera_id}"))
            .spawn(move || self.run(stop_flag))
            .unwrap_or_else(|e| {
                // Thread spawn failing means the process is out of resources;
                // surface it loudly and hand back a finished handle.
                log::error!("failed to spawn worker for camera {camera_id}: {e}");
                std::thread::spawn(|| {})
            });
        WorkerHandle { stop, join }
    }

    fn run(mut self, stop: Arc<AtomicBool>) {
        log::info!("camera worker '{}' started", self.config.camera_id);

        let frame_interval = if self.config.target_fps == 0 {
            Duration::from_millis(100)
        } else {
            Duration::from_millis(1000 / self.config.target_fps.max(1) as u64)
        };

        let mut tracker = PersonTracker::new(self.config.tracker.clone(), 0, 0);
        let mut evaluator = ZoneEvaluator::new(self.config.suppression_window_ms);
        let mut mapper: Option<CoordinateMapper> = None;
        let mut frame_size = (0u32, 0u32);
        let mut dropped_frames: u64 = 0;

        while !stop.load(Ordering::SeqCst) {
            let started = Instant::now();

            let frame = match self.source.next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!(
                        "camera '{}' failed to capture a frame: {e:#}",
                        self.config.camera_id
                    );
                    std::thread::sleep(frame_interval);
                    continue;
                }
            };

            let (width, height) = frame.image.dimensions();
            if width == 0 || height == 0 {
                continue;
            }
            if frame_size != (width, height) {
                frame_size = (width, height);
                mapper = CoordinateMapper::new(width, height, width, height).ok();
                tracker = PersonTracker::new(self.config.tracker.clone(), width, height);
            }
            let Some(mapper) = mapper.as_ref() else {
                continue;
            };

            let mut detections = self.engine.infer(
                &frame.image,
                self.config.confidence_threshold,
                self.config.nms_threshold,
            );
            tracker.update_with_frame(&mut detections, &frame.image);
            let tracks = tracker.active_tracks();

            let zones = self.zone_cache.snapshot();
            let camera_zones = zones.for_camera(&self.config.camera_id);
            let hits = evaluator.evaluate(&tracks, &camera_zones, mapper, frame.timestamp_ms);

            let mut ctx = FrameContext::new(self.config.camera_id.clone(), frame.index);
            ctx.detections = detections;
            ctx.tracks = tracks;
            ctx.zones = zones;
            ctx.zone_hits = hits;
            ctx.scale_factor = mapper.scale();

            let annotated = self.overlay.process(&frame.image, &ctx);
            let processing_ms = started.elapsed().as_secs_f64() * 1000.0;

            self.emit_events(&ctx, &annotated, frame.timestamp_ms, processing_ms);

            match self.frames_out.try_send(AnnotatedFrame {
                camera_id: self.config.camera_id.clone(),
                frame_index: frame.index,
                timestamp_ms: frame.timestamp_ms,
                image: annotated,
            }) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // Consumer is behind; dropping display frames is fine.
                    dropped_frames += 1;
                    if dropped_frames % 100 == 1 {
                        log::debug!(
                            "camera '{}' dropped {} display frames",
                            self.config.camera_id,
                            dropped_frames
                        );
                    }
                }
                Err(TrySendError::Disconnected(_)) => break,
            }

            let elapsed = started.elapsed();
            if elapsed < frame_interval {
                std::thread::sleep(frame_interval - elapsed);
            }
        }

        log::info!(
            "camera worker '{}' stopped after {} frames",
            self.config.camera_id,
            self.source.stats().frames_captured
        );
    }

    // Each entry transition becomes one SafetyEvent carrying the annotated
    // frame for the snapshot.
    fn emit_events(
        &self,
        ctx: &FrameContext,
        annotated: &RgbImage,
        timestamp_ms: u64,
        processing_ms: f64,
    ) {
        for hit in ctx.zone_hits.iter().filter(|h| h.transition) {
            let Some(track) = ctx.tracks.iter().find(|t| t.id == hit.track_id) else {
                continue;
            };
            let confidence = ctx
                .detections
                .iter()
                .find(|d| d.track_id == Some(hit.track_id))
                .map(|d| d.confidence)
                .unwrap_or(0.0);

            let kind = match hit.zone_kind {
                ZoneKind::Warning => EventKind::WarningZoneEntry,
                ZoneKind::Danger => EventKind::DangerZoneEntry,
            };
            let mut event = SafetyEvent::new(
                self.config.camera_id.clone(),
                kind,
                timestamp_ms,
                confidence,
                track.bbox,
            );
            event.zone_id = Some(hit.zone_id.clone());
            event.track_id = Some(hit.track_id);
            event.processing_ms = processing_ms;
            event.metadata = serde_json::json!({
                "foot": { "x": hit.foot.x, "y": hit.foot.y },
                "frame_index": ctx.frame_index,
            });

            if let Err(e) = self.events_out.try_send(PersistenceRequest {
                event,
                snapshot: Some(annotated.clone()),
            }) {
                log::warn!(
                    "camera '{}' could not queue event for persistence: {e}",
                    self.config.camera_id
                );
            }
        }
    }
}

/// Consumes `PersistenceRequest`s, writes snapshots, and saves events.
///
/// A failed save goes onto a bounded retry queue and is retried on the next
/// loop pass instead of being dropped; the queue overflowing discards the
/// oldest entry with an error log.
pub struct PersistenceWorker {
    store: Box<dyn EventStore>,
    media: MediaWriter,
    requests: Receiver<PersistenceRequest>,
    retry: std::collections::VecDeque<SafetyEvent>,
    retry_cap: usize,
}

impl PersistenceWorker {
    pub fn new(
        store: Box<dyn EventStore>,
        media: MediaWriter,
        requests: Receiver<PersistenceRequest>,
    ) -> Self {
        Self {
            store,
            media,
            requests,
            retry: std::collections::VecDeque::new(),
            retry_cap: 256,
        }
    }

    pub fn spawn(self) -> WorkerHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let join = std::thread::Builder::new()
            .name("persistence".to_string())
            .spawn(move || self.run(stop_flag))
            .unwrap_or_else(|e| {
                log::error!("failed to spawn persistence worker: {e}");
                std::thread::spawn(|| {})
            });
        WorkerHandle { stop, join }
    }

    fn run(mut self, stop: Arc<AtomicBool>) {
        log::info!("persistence worker started");
        while !stop.load(Ordering::SeqCst) {
            self.flush_retries();

            match self.requests.recv_timeout(Duration::from_millis(200)) {
                Ok(request) => self.handle(request),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }

        // Drain whatever is already queued before exiting.
        while let Ok(request) = self.requests.try_recv() {
            self.handle(request);
        }
        self.flush_retries();
        log::info!(
            "persistence worker stopped ({} events still unsaved)",
            self.retry.len()
        );
    }

    fn handle(&mut self, request: PersistenceRequest) {
        let mut event = request.event;

        if let Some(snapshot) = &request.snapshot {
            match self
                .media
                .save_snapshot(&event.camera_id, snapshot, event.timestamp_ms)
            {
                Ok(path) => event.snapshot_path = Some(path.to_string_lossy().into_owned()),
                Err(e) => {
                    // The event is still worth keeping without its snapshot.
                    log::warn!("snapshot write failed for camera '{}': {e:#}", event.camera_id);
                }
            }
        }

        if let Err(e) = self.save(event) {
            log::error!("event save failed: {e:#}");
        }
    }

    fn save(&mut self, event: SafetyEvent) -> Result<()> {
        match self.store.save(&event) {
            Ok(id) => {
                log::info!(
                    "event {} saved: {} on camera '{}' (zone {:?})",
                    id,
                    event.kind.as_str(),
                    event.camera_id,
                    event.zone_id
                );
                Ok(())
            }
            Err(e) => {
                if self.retry.len() >= self.retry_cap {
                    let dropped = self.retry.pop_front();
                    log::error!(
                        "retry queue full; dropping oldest unsaved event (camera '{:?}')",
                        dropped.map(|ev| ev.camera_id)
                    );
                }
                self.retry.push_back(event);
                Err(e)
            }
        }
    }

    fn flush_retries(&mut self) {
        for _ in 0..self.retry.len() {
            let Some(event) = self.retry.pop_front() else {
                break;
            };
            if let Err(e) = self.save(event) {
                log::debug!("retry save failed, keeping event queued: {e:#}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectionEngine, EngineConfig};
    use crate::events::InMemoryEventStore;
    use crate::ingest::{SourceConfig, SyntheticSource};
    use crate::overlay::features::standard_pipeline;
    use crate::zones::{Calibration, CoordinateSpace, Zone, ZoneStyle};
    use crate::Point;
    use anyhow::anyhow;
    use crossbeam_channel::bounded;

    fn danger_zone() -> Zone {
        Zone {
            id: "danger-1".to_string(),
            name: "press area".to_string(),
            kind: ZoneKind::Danger,
            camera_id: "cam-1".to_string(),
            points: vec![
                Point::new(0.4, 0.8),
                Point::new(0.6, 0.8),
                Point::new(0.6, 1.0),
                Point::new(0.4, 1.0),
            ],
            coordinate_space: Some(CoordinateSpace::Relative),
            height_m: 0.0,
            enabled: true,
            style: ZoneStyle::default(),
            calibration: Calibration::default(),
        }
    }

    #[test]
    fn worker_produces_annotated_frames_and_danger_events() {
        let engine = Arc::new(DetectionEngine::new(EngineConfig {
            input_width: 320,
            input_height: 320,
            ..EngineConfig::default()
        }));
        engine.initialize().unwrap();

        let zone_cache = Arc::new(ZoneCache::with_zones(vec![danger_zone()]));
        let source = SyntheticSource::new(SourceConfig {
            url: "stub://pinned".to_string(),
            target_fps: 0,
            width: 320,
            height: 240,
        })
        .pin(0.5, 0.9);

        let (frames_tx, frames_rx) = bounded(8);
        let (events_tx, events_rx) = bounded(8);

        let worker = CameraWorker::new(
            CameraWorkerConfig {
                camera_id: "cam-1".to_string(),
                target_fps: 0,
                suppression_window_ms: 0,
                ..CameraWorkerConfig::default()
            },
            Box::new(source),
            engine,
            zone_cache,
            standard_pipeline(),
            frames_tx,
            events_tx,
        );
        let handle = worker.spawn();

        let frame = frames_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("worker should produce an annotated frame");
        assert_eq!(frame.camera_id, "cam-1");
        assert_eq!(frame.image.dimensions(), (320, 240));

        let request = events_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("pinned blob inside the danger zone should produce an event");
        assert_eq!(request.event.kind, EventKind::DangerZoneEntry);
        assert_eq!(request.event.zone_id.as_deref(), Some("danger-1"));
        assert!(request.snapshot.is_some());

        handle.join();
    }

    #[test]
    fn worker_stops_promptly_when_asked() {
        let engine = Arc::new(DetectionEngine::new(EngineConfig::default()));
        engine.initialize().unwrap();

        let (frames_tx, _frames_rx) = bounded(1);
        let (events_tx, _events_rx) = bounded(1);
        let worker = CameraWorker::new(
            CameraWorkerConfig {
                target_fps: 100,
                ..CameraWorkerConfig::default()
            },
            Box::new(SyntheticSource::new(SourceConfig {
                width: 160,
                height: 120,
                ..SourceConfig::default()
            })),
            engine,
            Arc::new(ZoneCache::new()),
            OverlayPipeline::new(),
            frames_tx,
            events_tx,
        );

        let handle = worker.spawn();
        std::thread::sleep(Duration::from_millis(100));
        let started = Instant::now();
        handle.join();
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    struct FlakyStore {
        inner: InMemoryEventStore,
        failures_left: u32,
    }

    impl EventStore for FlakyStore {
        fn save(&mut self, event: &SafetyEvent) -> Result<i64> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(anyhow!("disk full"));
            }
            self.inner.save(event)
        }
        fn query(&mut self, query: &crate::events::EventQuery) -> Result<Vec<SafetyEvent>> {
            self.inner.query(query)
        }
        fn delete(&mut self, id: i64) -> Result<bool> {
            self.inner.delete(id)
        }
        fn acknowledge(&mut self, id: i64) -> Result<bool> {
            self.inner.acknowledge(id)
        }
    }

    #[test]
    fn persistence_worker_retries_failed_saves() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = bounded(4);
        let mut worker = PersistenceWorker::new(
            Box::new(FlakyStore {
                inner: InMemoryEventStore::new(),
                failures_left: 1,
            }),
            MediaWriter::new(dir.path()),
            rx,
        );

        let event = SafetyEvent::new(
            "cam-1",
            EventKind::DangerZoneEntry,
            1_000,
            0.9,
            crate::BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        );
        tx.send(PersistenceRequest {
            event,
            snapshot: None,
        })
        .unwrap();

        // First handle fails and queues the event; flush succeeds.
        let request = worker.requests.recv().unwrap();
        worker.handle(request);
        assert_eq!(worker.retry.len(), 1);
        worker.flush_retries();
        assert!(worker.retry.is_empty());
        assert_eq!(
            worker
                .store
                .query(&crate::events::EventQuery::default())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn persistence_worker_saves_snapshot_and_event() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = bounded(4);
        let worker = PersistenceWorker::new(
            Box::new(InMemoryEventStore::new()),
            MediaWriter::new(dir.path()),
            rx,
        );

        let event = SafetyEvent::new(
            "cam-1",
            EventKind::WarningZoneEntry,
            1_773_576_000_000,
            0.8,
            crate::BoundingBox::new(5.0, 5.0, 20.0, 40.0),
        );
        tx.send(PersistenceRequest {
            event,
            snapshot: Some(RgbImage::new(32, 32)),
        })
        .unwrap();
        drop(tx);

        let handle = worker.spawn();
        handle.join();

        // The snapshot landed under the dated hierarchy.
        let day_dir = dir.path().join("2026/03/15/cam-1");
        assert!(day_dir.exists());
        assert_eq!(std::fs::read_dir(day_dir).unwrap().count(), 1);
    }
}
