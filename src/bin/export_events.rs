//! export_events - query the safety event store from the command line

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use sitewatch_kernel::events::{EventKind, EventQuery, EventStore, SqliteEventStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the sitewatch database.
    #[arg(long, env = "SITEWATCH_DB_PATH", default_value = "sitewatch.db")]
    db_path: PathBuf,
    /// Only events at or after this epoch-millisecond timestamp.
    #[arg(long)]
    since_ms: Option<u64>,
    /// Only events at or before this epoch-millisecond timestamp.
    #[arg(long)]
    until_ms: Option<u64>,
    /// Filter by camera id.
    #[arg(long)]
    camera: Option<String>,
    /// Filter by event kind (person_detected|warning_zone_entry|danger_zone_entry).
    #[arg(long)]
    kind: Option<String>,
    /// Maximum number of events to export.
    #[arg(long, default_value_t = 100)]
    limit: usize,
    /// Write JSON to this file instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Mark this event id acknowledged instead of exporting.
    #[arg(long)]
    acknowledge: Option<i64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut store = SqliteEventStore::open(&args.db_path)?;

    if let Some(id) = args.acknowledge {
        if store.acknowledge(id)? {
            println!("event {id} acknowledged");
            return Ok(());
        }
        return Err(anyhow!("event {id} does not exist"));
    }

    let kind = args.kind.as_deref().map(EventKind::parse).transpose()?;
    let query = EventQuery {
        since_ms: args.since_ms,
        until_ms: args.until_ms,
        camera_id: args.camera,
        kind,
        limit: Some(args.limit),
    };

    let events = store.query(&query)?;
    let json = serde_json::to_string_pretty(&events)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, &json)?;
            println!("{} event(s) written to {}", events.len(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
