// src/store.rs
// Append-only persistence for snapshots and raw captures. The JSONL log
// is the source of truth; the CSV export is a flattened read-only view
// for the dashboard. Nothing in here updates or deletes history.

use crate::errors::{PersistenceError, TrackerError};
use crate::types::{ItineraryKey, RawCapture, Snapshot};
use chrono::{DateTime, Duration, Timelike, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Stored,
    /// Same key, same run window, identical price. Not an error; reruns
    /// and retries are expected to hit this.
    Deduplicated,
}

pub struct SnapshotStore {
    data_dir: PathBuf,
    raw_dir: PathBuf,
    log_path: PathBuf,
    run_window_minutes: i64,
    // Per-itinerary snapshot history, captured_at ascending
    index: RwLock<HashMap<ItineraryKey, Vec<Snapshot>>>,
    // Serializes same-key appends so dedup sees a consistent last value
    key_locks: DashMap<ItineraryKey, Arc<Mutex<()>>>,
    // Serializes writes to the shared log file
    log_file_lock: Mutex<()>,
}

impl SnapshotStore {
    /// Open (or initialize) the store under `data_dir`. Corrupt log lines
    /// are skipped with a warning; an unreadable log is fatal.
    pub fn open(data_dir: &Path, run_window_minutes: i64) -> Result<Self, TrackerError> {
        let raw_dir = data_dir.join("raw");
        std::fs::create_dir_all(&raw_dir)?;
        let log_path = data_dir.join("snapshots.jsonl");

        let mut index: HashMap<ItineraryKey, Vec<Snapshot>> = HashMap::new();
        let mut loaded = 0usize;
        if log_path.exists() {
            let raw = std::fs::read_to_string(&log_path)?;
            for (line_no, line) in raw.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_log_line(line, line_no + 1) {
                    Ok(snapshot) => {
                        index.entry(snapshot.itinerary_key.clone()).or_default().push(snapshot);
                        loaded += 1;
                    }
                    Err(e) => warn!("🗄️  Skipping bad snapshot log line: {}", e),
                }
            }
        }
        for history in index.values_mut() {
            history.sort_by_key(|s| s.captured_at);
        }

        info!(
            "🗄️  Snapshot store open at {} ({} snapshots, {} itineraries)",
            data_dir.display(),
            loaded,
            index.len()
        );

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            raw_dir,
            log_path,
            run_window_minutes,
            index: RwLock::new(index),
            key_locks: DashMap::new(),
            log_file_lock: Mutex::new(()),
        })
    }

    /// Persist a raw capture under raw/, keyed by target and timestamp.
    /// Failures are logged, never raised; losing a diagnostic artifact
    /// must not fail the observation pipeline.
    pub async fn record_raw_capture(&self, capture: &RawCapture) {
        // Millisecond precision keeps retry attempts from overwriting
        // each other within one second
        let filename = format!(
            "{}_{}.json",
            capture.target_slug,
            capture.fetched_at.format("%Y%m%d_%H%M%S_%3f")
        );
        let path = self.raw_dir.join(filename);
        match serde_json::to_string_pretty(capture) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(&path, json).await {
                    error!("🗄️  Failed to write raw capture {}: {}", path.display(), e);
                }
            }
            Err(e) => error!("🗄️  Failed to serialize raw capture: {}", e),
        }
    }

    /// Append one observation. Same-key appends are serialized so the
    /// dedup check always runs against the latest stored value.
    pub async fn append(&self, candidate: Snapshot) -> Result<AppendOutcome, PersistenceError> {
        let key_lock = self
            .key_locks
            .entry(candidate.itinerary_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = key_lock.lock().await;

        if let Some(last) = self.latest(&candidate.itinerary_key).await {
            let same_window = floor_to_window(last.captured_at, self.run_window_minutes)
                == floor_to_window(candidate.captured_at, self.run_window_minutes);
            // A changed price is never dropped, window or not
            if same_window && (last.price - candidate.price).abs() < f64::EPSILON {
                debug!(
                    "🗄️  Deduplicated {} @ {:.2} (same run window)",
                    candidate.itinerary_key, candidate.price
                );
                return Ok(AppendOutcome::Deduplicated);
            }
        }

        self.write_log_line(&candidate).await?;

        let mut index = self.index.write().await;
        index.entry(candidate.itinerary_key.clone()).or_default().push(candidate);
        Ok(AppendOutcome::Stored)
    }

    async fn write_log_line(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let line = serde_json::to_string(snapshot).map_err(|e| PersistenceError::WriteFailed {
            path: self.log_path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;

        let _file_guard = self.log_file_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await
            .map_err(|e| PersistenceError::WriteFailed {
                path: self.log_path.display().to_string(),
                source: e,
            })?;
        file.write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(|e| PersistenceError::WriteFailed {
                path: self.log_path.display().to_string(),
                source: e,
            })?;
        Ok(())
    }

    /// Full history for a key, captured_at ascending.
    pub async fn history(&self, key: &ItineraryKey) -> Vec<Snapshot> {
        self.index.read().await.get(key).cloned().unwrap_or_default()
    }

    /// Trailing window used by the trend analyzer: at most `max_observations`
    /// of the most recent snapshots no older than `max_age_days`, ascending.
    pub async fn recent_history(
        &self,
        key: &ItineraryKey,
        max_observations: usize,
        max_age_days: i64,
        now: DateTime<Utc>,
    ) -> Vec<Snapshot> {
        let cutoff = now - Duration::days(max_age_days);
        let history = self.history(key).await;
        let recent: Vec<Snapshot> = history
            .into_iter()
            .filter(|s| s.captured_at >= cutoff)
            .collect();
        let skip = recent.len().saturating_sub(max_observations);
        recent.into_iter().skip(skip).collect()
    }

    pub async fn latest(&self, key: &ItineraryKey) -> Option<Snapshot> {
        self.index.read().await.get(key).and_then(|h| h.last().cloned())
    }

    pub async fn tracked_keys(&self) -> Vec<ItineraryKey> {
        self.index.read().await.keys().cloned().collect()
    }

    pub async fn snapshot_count(&self) -> usize {
        self.index.read().await.values().map(|h| h.len()).sum()
    }

    /// Rewrite the flattened CSV export consumed by the dashboard. The
    /// JSONL log stays authoritative; this file is derived output.
    pub async fn export_csv(&self, path: &Path) -> Result<usize, PersistenceError> {
        let index = self.index.read().await;
        let mut rows: Vec<&Snapshot> = index.values().flatten().collect();
        rows.sort_by_key(|s| s.captured_at);

        let mut writer = csv::Writer::from_path(path).map_err(|e| PersistenceError::WriteFailed {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e),
        })?;
        writer
            .write_record([
                "captured_at",
                "itinerary_key",
                "ship",
                "departure_port",
                "nights",
                "sail_date",
                "cabin",
                "price",
                "currency",
                "source_strategy",
            ])
            .map_err(|e| csv_write_error(path, e))?;

        for snapshot in &rows {
            writer
                .write_record([
                    snapshot.captured_at.to_rfc3339(),
                    snapshot.itinerary_key.to_string(),
                    snapshot.ship.clone(),
                    snapshot.departure_port.clone(),
                    snapshot.nights.to_string(),
                    snapshot
                        .sail_date
                        .map(|d| d.to_string())
                        .unwrap_or_default(),
                    snapshot.cabin.as_str().to_string(),
                    format!("{:.2}", snapshot.price),
                    format!("{:?}", snapshot.currency).to_uppercase(),
                    snapshot.source_strategy.clone(),
                ])
                .map_err(|e| csv_write_error(path, e))?;
        }
        writer.flush().map_err(|e| PersistenceError::WriteFailed {
            path: path.display().to_string(),
            source: e,
        })?;

        info!("📊 Exported {} rows to {}", rows.len(), path.display());
        Ok(rows.len())
    }

    pub fn default_csv_path(&self) -> PathBuf {
        self.data_dir.join("cruise_prices.csv")
    }
}

fn csv_write_error(path: &Path, e: csv::Error) -> PersistenceError {
    PersistenceError::WriteFailed {
        path: path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::Other, e),
    }
}

fn parse_log_line(line: &str, line_no: usize) -> Result<Snapshot, PersistenceError> {
    serde_json::from_str(line).map_err(|e| PersistenceError::CorruptLog {
        line: line_no,
        reason: e.to_string(),
    })
}

fn floor_to_window(ts: DateTime<Utc>, window_minutes: i64) -> DateTime<Utc> {
    if window_minutes <= 0 {
        return ts;
    }
    let minutes = ts.hour() as i64 * 60 + ts.minute() as i64;
    let floored = (minutes / window_minutes) * window_minutes;
    ts.date_naive()
        .and_hms_opt((floored / 60) as u32, (floored % 60) as u32, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(ts)
}
