//! sitewatchd - workplace safety monitoring daemon
//!
//! This daemon:
//! 1. Ingests frames from each configured camera source
//! 2. Runs person detection, tracking, and zone evaluation per camera
//! 3. Renders the overlay feature chain onto each frame
//! 4. Persists zone-entry events and snapshots through the persistence worker
//! 5. Logs source health and resource usage periodically

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sitewatch_kernel::{
    config::SitewatchConfig,
    detect::{DetectionEngine, EngineConfig},
    events::{MediaWriter, SqliteEventStore},
    ingest::{open_source, SourceConfig},
    monitor::{ProcStatCpuSampler, ResourceMonitor, StubGpuSampler},
    overlay::features::standard_pipeline,
    pipeline::{CameraWorker, CameraWorkerConfig, PersistenceWorker},
    track::TrackerConfig,
    zones::{load_zones, ZoneCache},
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the daemon configuration file (JSON). Overrides SITEWATCH_CONFIG.
    #[arg(long)]
    config: Option<String>,
    /// Capacity of the per-daemon annotated frame channel.
    #[arg(long, default_value_t = 16)]
    frame_queue: usize,
    /// How often to log health and resource stats, in seconds.
    #[arg(long, default_value_t = 10)]
    health_interval_s: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Some(path) = &args.config {
        std::env::set_var("SITEWATCH_CONFIG", path);
    }
    let cfg = SitewatchConfig::load()?;

    log::info!(
        "sitewatchd v{} starting with {} camera(s), db={}",
        env!("CARGO_PKG_VERSION"),
        cfg.cameras.len(),
        cfg.db_path
    );

    // Shared detection engine: one loaded model serves every camera.
    let engine = Arc::new(DetectionEngine::new(EngineConfig {
        model_path: cfg.engine.model_path.clone(),
        input_width: cfg.engine.input_size,
        input_height: cfg.engine.input_size,
        class_names: cfg.engine.class_names.clone(),
    }));
    engine.initialize().context("detection engine failed to load")?;
    log::info!(
        "detection engine ready: backend={:?} path={:?}",
        engine.backend_name(),
        engine.execution_path()
    );

    // Zones are shared copy-on-write; an empty cache is a valid deployment.
    let zone_cache = Arc::new(ZoneCache::new());
    if let Some(path) = &cfg.zones_path {
        let zones = load_zones(path)?;
        log::info!("loaded {} zone(s) from {}", zones.len(), path.display());
        zone_cache.replace_all(zones);
    } else {
        log::warn!("no zones configured; detection and tracking run without zone events");
    }

    // Persistence worker owns the store and media writer.
    let store = SqliteEventStore::open(std::path::Path::new(&cfg.db_path))?;
    let media = MediaWriter::new(&cfg.media_dir);
    let (events_tx, events_rx) = crossbeam_channel::bounded(64);
    let persistence = PersistenceWorker::new(Box::new(store), media, events_rx).spawn();

    // Display frame sink. The daemon itself only drains it; embedding
    // applications take the receiver instead.
    let (frames_tx, frames_rx) = crossbeam_channel::bounded(args.frame_queue.max(1));

    let mut workers = Vec::with_capacity(cfg.cameras.len());
    for camera in &cfg.cameras {
        let source = open_source(SourceConfig {
            url: camera.url.clone(),
            target_fps: camera.target_fps,
            width: camera.width,
            height: camera.height,
        })?;

        let mut overlay = standard_pipeline();
        for (feature_id, feature_cfg) in &cfg.features {
            if !overlay.set_config(feature_id, feature_cfg.clone()) {
                log::warn!("config names unknown overlay feature '{feature_id}'");
            }
        }

        let worker = CameraWorker::new(
            CameraWorkerConfig {
                camera_id: camera.id.clone(),
                confidence_threshold: cfg.engine.confidence_threshold,
                nms_threshold: cfg.engine.nms_threshold,
                target_fps: camera.target_fps,
                suppression_window_ms: cfg.suppression_window_ms,
                tracker: TrackerConfig::default(),
            },
            source,
            Arc::clone(&engine),
            Arc::clone(&zone_cache),
            overlay,
            frames_tx.clone(),
            events_tx.clone(),
        );
        workers.push(worker.spawn());
        log::info!("camera '{}' worker running ({})", camera.id, camera.url);
    }
    drop(frames_tx);
    drop(events_tx);

    let mut monitor = ResourceMonitor::new(12);
    monitor.register(Box::new(ProcStatCpuSampler::new()));
    monitor.register(Box::new(StubGpuSampler));

    let running = Arc::new(AtomicBool::new(true));
    let running_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("shutdown requested");
        running_flag.store(false, Ordering::SeqCst);
    })
    .context("failed to install signal handler")?;

    let health_interval = Duration::from_secs(args.health_interval_s.max(1));
    let mut last_health_log = Instant::now();
    let mut frames_seen: u64 = 0;

    while running.load(Ordering::SeqCst) {
        // Drain annotated frames so the bounded channel keeps moving.
        match frames_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(frame) => {
                frames_seen += 1;
                log::trace!(
                    "frame {} from camera '{}' at {}",
                    frame.frame_index,
                    frame.camera_id,
                    frame.timestamp_ms
                );
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }

        if last_health_log.elapsed() >= health_interval {
            monitor.tick();
            let usage: Vec<String> = monitor
                .averages()
                .iter()
                .map(|(name, avg)| format!("{name}={avg:.0}%"))
                .collect();
            log::info!(
                "health: frames_seen={} zones={} {}",
                frames_seen,
                zone_cache.snapshot().len(),
                usage.join(" ")
            );
            last_health_log = Instant::now();
        }
    }

    log::info!("stopping {} camera worker(s)", workers.len());
    for worker in &workers {
        worker.stop();
    }
    for worker in workers {
        worker.join();
    }
    persistence.join();
    log::info!("sitewatchd stopped");
    Ok(())
}
