use anyhow::{anyhow, Context, Result};
use chrono::{TimeZone, Utc};
use image::RgbImage;
use std::path::{Path, PathBuf};

/// Writes event media under `base/YYYY/MM/DD/<camera_id>/`.
///
/// Directories are created on demand so retention jobs can prune whole days.
pub struct MediaWriter {
    base: PathBuf,
}

impl MediaWriter {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Save a JPEG snapshot for an event, returning the written path.
    pub fn save_snapshot(
        &self,
        camera_id: &str,
        frame: &RgbImage,
        timestamp_ms: u64,
    ) -> Result<PathBuf> {
        let dir = self.dated_dir(camera_id, timestamp_ms)?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create media dir {}", dir.display()))?;

        let path = dir.join(format!("{timestamp_ms}.jpg"));
        frame
            .save_with_format(&path, image::ImageFormat::Jpeg)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        Ok(path)
    }

    fn dated_dir(&self, camera_id: &str, timestamp_ms: u64) -> Result<PathBuf> {
        let millis = i64::try_from(timestamp_ms)
            .map_err(|_| anyhow!("timestamp exceeds i64 range"))?;
        let when = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| anyhow!("timestamp {timestamp_ms} out of chrono range"))?;
        Ok(self
            .base
            .join(when.format("%Y/%m/%d").to_string())
            .join(sanitize_component(camera_id)))
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

// Camera ids come from configuration; keep them from escaping the media root
// or injecting separators.
fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
