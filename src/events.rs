//! Visit event store (SPEC_FULL.md §6): one finalized [`VisitRecord`] per
//! completed visit, sharded by local calendar date alongside that date's
//! clips (`clips/YYYY-MM-DD/events_YYYY-MM-DD.json`), stored as a JSON array
//! rather than JSON Lines so a reader can load a whole day with one
//! `serde_json` call.
//!
//! Grounded in the original event log's shard-by-date layout and
//! corrupt-file quarantine discipline; a visit record is only ever written
//! once, on departure, so there's no append-heavy workload that would favor
//! JSON Lines over a plain array.

use crate::error::{EventStoreError, Result};
use crate::time::local_date_string;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisitRecord {
    /// `YYYYMMDD_HHMMSS` derived from the visit's start time, not a random id,
    /// so a visit's record, clips, and thumbnail all share a recognizable key.
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
    pub duration_str: String,
    pub peak_confidence: f64,
    pub thumbnail_path: Option<String>,
    pub arrival_clip_path: Option<String>,
    pub departure_clip_path: Option<String>,
}

pub struct EventStore {
    root: PathBuf,
    timezone: Tz,
}

impl EventStore {
    pub fn new(root: impl Into<PathBuf>, timezone: Tz) -> Self {
        Self {
            root: root.into(),
            timezone,
        }
    }

    fn shard_path(&self, ts: DateTime<Utc>) -> PathBuf {
        let date = local_date_string(ts, self.timezone);
        self.root.join(&date).join(format!("events_{date}.json"))
    }

    /// Appends exactly once per finalized visit: read the day's array, push
    /// the record, write the whole array back. Visits aren't frequent enough
    /// for this read-modify-write to matter.
    pub async fn append(&self, record: &VisitRecord) -> Result<()> {
        let path = self.shard_path(record.start_time);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut records = self.load_path(&path).await?;
        records.push(record.clone());

        let json = serde_json::to_string_pretty(&records)?;
        fs::write(&path, json).await.map_err(|e| EventStoreError::WriteFailed {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
        Ok(())
    }

    /// Loads the shard for a `YYYY-MM-DD` date string.
    pub async fn load(&self, date: &str) -> Result<Vec<VisitRecord>> {
        let path = self.root.join(date).join(format!("events_{date}.json"));
        self.load_path(&path).await
    }

    pub async fn list_today(&self) -> Result<Vec<VisitRecord>> {
        let today = local_date_string(Utc::now(), self.timezone);
        self.load(&today).await
    }

    /// Reads and parses a shard. A missing or empty file is an empty day, not
    /// an error. A file that fails to parse is quarantined (renamed to
    /// `.json.bak`) rather than blocking every later append for that date.
    async fn load_path(&self, path: &Path) -> Result<Vec<VisitRecord>> {
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Vec<VisitRecord>>(&contents) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!(?path, error = %e, "corrupt event shard, quarantining");
                let backup = path.with_extension("json.bak");
                if let Err(rename_err) = fs::rename(path, &backup).await {
                    warn!(?path, error = %rename_err, "failed to quarantine corrupt event shard");
                }
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(id: &str, start: DateTime<Utc>) -> VisitRecord {
        VisitRecord {
            id: id.to_string(),
            start_time: start,
            end_time: Some(start + chrono::Duration::seconds(90)),
            duration_seconds: 90,
            duration_str: "1m 30s".to_string(),
            peak_confidence: 0.874,
            thumbnail_path: Some("clips/2026-01-02/020304_thumb.jpg".to_string()),
            arrival_clip_path: Some("clips/2026-01-02/020304_arrival.mp4".to_string()),
            departure_clip_path: Some("clips/2026-01-02/020534_departure.mp4".to_string()),
        }
    }

    #[tokio::test]
    async fn append_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = EventStore::new(dir.path(), chrono_tz::UTC);
        let ts = DateTime::parse_from_rfc3339("2026-01-02T02:03:04Z").unwrap().with_timezone(&Utc);
        let rec = record("20260102_020304", ts);

        store.append(&rec).await.unwrap();
        let loaded = store.load("2026-01-02").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], rec);
    }

    #[tokio::test]
    async fn appending_a_second_visit_keeps_the_first() {
        let dir = tempdir().unwrap();
        let store = EventStore::new(dir.path(), chrono_tz::UTC);
        let ts = DateTime::parse_from_rfc3339("2026-01-02T02:03:04Z").unwrap().with_timezone(&Utc);

        store.append(&record("20260102_020304", ts)).await.unwrap();
        store.append(&record("20260102_030000", ts + chrono::Duration::minutes(57))).await.unwrap();

        let loaded = store.load("2026-01-02").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "20260102_020304");
        assert_eq!(loaded[1].id, "20260102_030000");
    }

    #[tokio::test]
    async fn missing_shard_returns_empty() {
        let dir = tempdir().unwrap();
        let store = EventStore::new(dir.path(), chrono_tz::UTC);
        let loaded = store.load("2000-01-01").await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn corrupt_shard_is_quarantined_and_treated_as_empty() {
        let dir = tempdir().unwrap();
        let store = EventStore::new(dir.path(), chrono_tz::UTC);
        let date_dir = dir.path().join("2026-01-02");
        fs::create_dir_all(&date_dir).await.unwrap();
        let shard = date_dir.join("events_2026-01-02.json");
        fs::write(&shard, b"{not valid json[[[").await.unwrap();

        let loaded = store.load("2026-01-02").await.unwrap();
        assert!(loaded.is_empty());
        assert!(!shard.exists());
        assert!(date_dir.join("events_2026-01-02.json.bak").exists());
    }
}
