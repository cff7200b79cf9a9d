//! Safety event persistence.
//!
//! - `SafetyEvent`: the persisted record for a detection that crossed a
//!   safety threshold
//! - `EventStore`: storage trait with SQLite and in-memory implementations
//! - `MediaWriter`: snapshot files in a dated folder hierarchy

mod media;

pub use media::MediaWriter;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::BoundingBox;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    PersonDetected,
    WarningZoneEntry,
    DangerZoneEntry,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PersonDetected => "person_detected",
            Self::WarningZoneEntry => "warning_zone_entry",
            Self::DangerZoneEntry => "danger_zone_entry",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "person_detected" => Ok(Self::PersonDetected),
            "warning_zone_entry" => Ok(Self::WarningZoneEntry),
            "danger_zone_entry" => Ok(Self::DangerZoneEntry),
            other => Err(anyhow!("unknown event kind '{other}'")),
        }
    }
}

/// One persisted safety occurrence. Immutable after save except for the
/// acknowledged flag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SafetyEvent {
    /// Assigned by the store on save; 0 before.
    pub id: i64,
    pub camera_id: String,
    pub kind: EventKind,
    pub timestamp_ms: u64,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub zone_id: Option<String>,
    pub track_id: Option<u64>,
    pub snapshot_path: Option<String>,
    pub clip_path: Option<String>,
    /// End-to-end frame processing latency when the event fired.
    pub processing_ms: f64,
    pub acknowledged: bool,
    /// Free-form JSON attached by the producer.
    pub metadata: serde_json::Value,
}

impl SafetyEvent {
    pub fn new(
        camera_id: impl Into<String>,
        kind: EventKind,
        timestamp_ms: u64,
        confidence: f32,
        bbox: BoundingBox,
    ) -> Self {
        Self {
            id: 0,
            camera_id: camera_id.into(),
            kind,
            timestamp_ms,
            confidence,
            bbox,
            zone_id: None,
            track_id: None,
            snapshot_path: None,
            clip_path: None,
            processing_ms: 0.0,
            acknowledged: false,
            metadata: serde_json::Value::Null,
        }
    }
}

/// Filter for `EventStore::query`. Unset fields match everything; results are
/// newest first.
#[derive(Clone, Debug, Default)]
pub struct EventQuery {
    pub since_ms: Option<u64>,
    pub until_ms: Option<u64>,
    pub camera_id: Option<String>,
    pub kind: Option<EventKind>,
    pub limit: Option<usize>,
}

impl EventQuery {
    fn matches(&self, event: &SafetyEvent) -> bool {
        if let Some(since) = self.since_ms {
            if event.timestamp_ms < since {
                return false;
            }
        }
        if let Some(until) = self.until_ms {
            if event.timestamp_ms > until {
                return false;
            }
        }
        if let Some(camera) = &self.camera_id {
            if &event.camera_id != camera {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if event.kind != kind {
                return false;
            }
        }
        true
    }
}

pub trait EventStore: Send {
    /// Persist the event, returning the assigned id. Failures are explicit;
    /// the caller decides whether to retry.
    fn save(&mut self, event: &SafetyEvent) -> Result<i64>;

    fn query(&mut self, query: &EventQuery) -> Result<Vec<SafetyEvent>>;

    /// Returns false when the id does not exist.
    fn delete(&mut self, id: i64) -> Result<bool>;

    /// Mark an event acknowledged. Returns false when the id does not exist.
    fn acknowledge(&mut self, id: i64) -> Result<bool>;
}

pub struct SqliteEventStore {
    conn: Connection,
}

impl SqliteEventStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open event db {}", db_path.display()))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS safety_events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              camera_id TEXT NOT NULL,
              kind TEXT NOT NULL,
              timestamp_ms INTEGER NOT NULL,
              confidence REAL NOT NULL,
              bbox_json TEXT NOT NULL,
              zone_id TEXT,
              track_id INTEGER,
              snapshot_path TEXT,
              clip_path TEXT,
              processing_ms REAL NOT NULL,
              acknowledged INTEGER NOT NULL DEFAULT 0,
              metadata_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON safety_events(timestamp_ms);
            CREATE INDEX IF NOT EXISTS idx_events_camera ON safety_events(camera_id);
            "#,
        )?;
        Ok(())
    }

    fn row_to_event(row: &rusqlite::Row<'_>) -> Result<SafetyEvent> {
        let kind_text: String = row.get("kind")?;
        let bbox_json: String = row.get("bbox_json")?;
        let metadata_json: String = row.get("metadata_json")?;
        let timestamp: i64 = row.get("timestamp_ms")?;
        let track_id: Option<i64> = row.get("track_id")?;

        Ok(SafetyEvent {
            id: row.get("id")?,
            camera_id: row.get("camera_id")?,
            kind: EventKind::parse(&kind_text)?,
            timestamp_ms: u64::try_from(timestamp)
                .map_err(|_| anyhow!("negative timestamp in event row"))?,
            confidence: row.get("confidence")?,
            bbox: serde_json::from_str(&bbox_json)?,
            zone_id: row.get("zone_id")?,
            track_id: track_id.map(|id| id as u64),
            snapshot_path: row.get("snapshot_path")?,
            clip_path: row.get("clip_path")?,
            processing_ms: row.get("processing_ms")?,
            acknowledged: row.get::<_, i64>("acknowledged")? != 0,
            metadata: serde_json::from_str(&metadata_json)?,
        })
    }
}

impl EventStore for SqliteEventStore {
    fn save(&mut self, event: &SafetyEvent) -> Result<i64> {
        let timestamp = i64::try_from(event.timestamp_ms)
            .map_err(|_| anyhow!("event timestamp exceeds i64 range"))?;
        let bbox_json = serde_json::to_string(&event.bbox)?;
        let metadata_json = serde_json::to_string(&event.metadata)?;

        self.conn.execute(
            r#"
            INSERT INTO safety_events(
              camera_id, kind, timestamp_ms, confidence, bbox_json, zone_id,
              track_id, snapshot_path, clip_path, processing_ms, acknowledged,
              metadata_json
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                event.camera_id,
                event.kind.as_str(),
                timestamp,
                event.confidence,
                bbox_json,
                event.zone_id,
                event.track_id.map(|id| id as i64),
                event.snapshot_path,
                event.clip_path,
                event.processing_ms,
                event.acknowledged as i64,
                metadata_json,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn query(&mut self, query: &EventQuery) -> Result<Vec<SafetyEvent>> {
        let mut sql = String::from("SELECT * FROM safety_events WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(since) = query.since_ms {
            sql.push_str(&format!(" AND timestamp_ms >= ?{}", args.len() + 1));
            args.push(Box::new(since as i64));
        }
        if let Some(until) = query.until_ms {
            sql.push_str(&format!(" AND timestamp_ms <= ?{}", args.len() + 1));
            args.push(Box::new(until as i64));
        }
        if let Some(camera) = &query.camera_id {
            sql.push_str(&format!(" AND camera_id = ?{}", args.len() + 1));
            args.push(Box::new(camera.clone()));
        }
        if let Some(kind) = query.kind {
            sql.push_str(&format!(" AND kind = ?{}", args.len() + 1));
            args.push(Box::new(kind.as_str().to_string()));
        }
        sql.push_str(" ORDER BY timestamp_ms DESC, id DESC");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let params = rusqlite::params_from_iter(args.iter().map(|a| a.as_ref()));
        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(Self::row_to_event(row)?);
        }
        Ok(out)
    }

    fn delete(&mut self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM safety_events WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    fn acknowledge(&mut self, id: i64) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE safety_events SET acknowledged = 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(affected > 0)
    }
}

/// Vec-backed store for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryEventStore {
    events: Vec<SafetyEvent>,
    next_id: i64,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            next_id: 1,
        }
    }
}

impl EventStore for InMemoryEventStore {
    fn save(&mut self, event: &SafetyEvent) -> Result<i64> {
        let id = self.next_id;
        self.next_id += 1;
        let mut stored = event.clone();
        stored.id = id;
        self.events.push(stored);
        Ok(id)
    }

    fn query(&mut self, query: &EventQuery) -> Result<Vec<SafetyEvent>> {
        let mut out: Vec<SafetyEvent> = self
            .events
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms).then(b.id.cmp(&a.id)));
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn delete(&mut self, id: i64) -> Result<bool> {
        let before = self.events.len();
        self.events.retain(|e| e.id != id);
        Ok(self.events.len() < before)
    }

    fn acknowledge(&mut self, id: i64) -> Result<bool> {
        match self.events.iter_mut().find(|e| e.id == id) {
            Some(event) => {
                event.acknowledged = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
