//! End-to-end pipeline scenarios driven by the synthetic frame source and the
//! stub inference backend, so no model weights or cameras are required.

use std::io::Write;
use std::sync::Arc;

use sitewatch_kernel::detect::{DetectionEngine, EngineConfig};
use sitewatch_kernel::events::{EventKind, EventQuery, EventStore, InMemoryEventStore, SafetyEvent};
use sitewatch_kernel::ingest::{FrameSource, SourceConfig, SyntheticSource};
use sitewatch_kernel::mapper::CoordinateMapper;
use sitewatch_kernel::overlay::features::standard_pipeline;
use sitewatch_kernel::overlay::FrameContext;
use sitewatch_kernel::track::{PersonTracker, TrackerConfig};
use sitewatch_kernel::zones::{
    Calibration, CoordinateSpace, Zone, ZoneCache, ZoneEvaluator, ZoneKind, ZoneStyle,
};
use sitewatch_kernel::Point;

fn danger_zone() -> Zone {
    Zone {
        id: "danger-press".to_string(),
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
fn person_inside_danger_zone_produces_exactly_one_entry_event() {
    let engine = DetectionEngine::new(EngineConfig {
        input_width: 320,
        input_height: 320,
        ..EngineConfig::default()
    });
    engine.initialize().expect("stub backend loads");

    let cache = Arc::new(ZoneCache::with_zones(vec![danger_zone()]));
    let mut source = SyntheticSource::new(SourceConfig {
        url: "stub://pinned".to_string(),
        target_fps: 0,
        width: 320,
        height: 240,
    })
    .pin(0.5, 0.9);

    let mut tracker = PersonTracker::new(TrackerConfig::default(), 320, 240);
    let mut evaluator = ZoneEvaluator::new(5_000);
    let mapper = CoordinateMapper::new(320, 240, 320, 240).unwrap();
    let mut overlay = standard_pipeline();
    let mut store = InMemoryEventStore::new();

    // Ten frames with the person standing still inside the zone: the entry
    // transition must fire exactly once.
    for _ in 0..10 {
        let frame = source.next_frame().unwrap();
        let mut detections = engine.infer(&frame.image, 0.5, 0.45);
        assert_eq!(detections.len(), 1, "the blob should always be detected");

        tracker.update(&mut detections);
        let tracks = tracker.active_tracks();
        assert_eq!(tracks.len(), 1, "one stable track for one person");

        let snapshot = cache.snapshot();
        let hits = evaluator.evaluate(
            &tracks,
            &snapshot.for_camera("cam-1"),
            &mapper,
            frame.timestamp_ms,
        );
        assert_eq!(hits.len(), 1, "the foot point is inside the zone");

        for hit in hits.iter().filter(|h| h.transition) {
            let mut event = SafetyEvent::new(
                "cam-1",
                EventKind::DangerZoneEntry,
                frame.timestamp_ms,
                detections[0].confidence,
                tracks[0].bbox,
            );
            event.zone_id = Some(hit.zone_id.clone());
            event.track_id = Some(hit.track_id);
            store.save(&event).unwrap();
        }

        let mut ctx = FrameContext::new("cam-1", frame.index);
        ctx.detections = detections;
        ctx.tracks = tracks;
        ctx.zones = snapshot;
        ctx.zone_hits = hits;
        let rendered = overlay.process(&frame.image, &ctx);
        assert_eq!(rendered.dimensions(), frame.image.dimensions());
    }

    let events = store.query(&EventQuery::default()).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::DangerZoneEntry);
    assert_eq!(events[0].zone_id.as_deref(), Some("danger-press"));

    // Every overlay feature ran clean.
    for (id, stats) in overlay.stats() {
        assert_eq!(stats.errors, 0, "feature '{id}' reported errors");
    }
    // The tracker kept a single identity for the whole run.
    assert_eq!(events[0].track_id, Some(1));
}

#[test]
fn person_outside_every_zone_produces_no_events() {
    let engine = DetectionEngine::new(EngineConfig {
        input_width: 320,
        input_height: 320,
        ..EngineConfig::default()
    });
    engine.initialize().unwrap();

    let cache = ZoneCache::with_zones(vec![danger_zone()]);
    let mut source = SyntheticSource::new(SourceConfig {
        url: "stub://pinned".to_string(),
        target_fps: 0,
        width: 320,
        height: 240,
    })
    .pin(0.15, 0.5);

    let mut tracker = PersonTracker::new(TrackerConfig::default(), 320, 240);
    let mut evaluator = ZoneEvaluator::new(0);
    let mapper = CoordinateMapper::new(320, 240, 320, 240).unwrap();

    for _ in 0..5 {
        let frame = source.next_frame().unwrap();
        let mut detections = engine.infer(&frame.image, 0.5, 0.45);
        tracker.update(&mut detections);
        let hits = evaluator.evaluate(
            &tracker.active_tracks(),
            &cache.snapshot().for_camera("cam-1"),
            &mapper,
            frame.timestamp_ms,
        );
        assert!(hits.is_empty());
    }
}

#[test]
fn undersized_model_file_leaves_the_engine_unloaded() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&vec![0u8; 64 * 1024]).unwrap();

    let engine = DetectionEngine::new(EngineConfig {
        model_path: Some(file.path().to_path_buf()),
        ..EngineConfig::default()
    });

    assert!(engine.initialize().is_err());
    assert!(!engine.is_loaded());

    // An unloaded engine degrades to empty results, never a crash.
    let mut source = SyntheticSource::new(SourceConfig::default()).pin(0.5, 0.9);
    let frame = source.next_frame().unwrap();
    assert!(engine.infer(&frame.image, 0.5, 0.45).is_empty());
}
