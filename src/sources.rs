//! Snapshot dump discovery for Strikewatch.
//!
//! The fetch side of the system (HTTP directory scraping, download
//! queues) lives outside this crate; what the core needs is a
//! monotonically-discoverable stream of `(filename, parsed dump)` pairs
//! and a way to ask "anything new since timestamp T?". `DirectorySource`
//! provides exactly that over a local directory the fetcher drops files
//! into.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::{parse_snapshot_timestamp, SnapshotFile, WatchResult};

/// One discovered dump: filename, parsed timestamp, parsed content.
#[derive(Debug)]
pub struct DiscoveredSnapshot {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub file: SnapshotFile,
}

/// Watches a directory for snapshot dumps named
/// `YYYY-MM-DD_HH-MM-SS_<suffix>.json` and yields each file at most
/// once, in ascending timestamp order.
pub struct DirectorySource {
    dir: PathBuf,
    /// Timestamp of the newest snapshot handed out so far. Files at or
    /// below this are never re-discovered.
    last_seen: Option<DateTime<Utc>>,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            last_seen: None,
        }
    }

    /// Resume discovery from a known timestamp (e.g. the store's latest
    /// update after a restart).
    pub fn with_last_seen(dir: impl Into<PathBuf>, last_seen: Option<DateTime<Utc>>) -> Self {
        Self {
            dir: dir.into(),
            last_seen,
        }
    }

    /// The newest timestamp handed out so far.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    /// Discover snapshots strictly newer than `last_seen`, ascending by
    /// timestamp.
    ///
    /// Files that do not match the naming pattern are ignored (the
    /// fetcher may drop temp files); files that match but fail to parse
    /// as JSON are logged and skipped, never fatal.
    pub fn poll_new(&mut self) -> WatchResult<Vec<DiscoveredSnapshot>> {
        let mut discovered: Vec<(DateTime<Utc>, String, PathBuf)> = Vec::new();

        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read watch directory {}: {}", self.dir.display(), e);
                return Ok(Vec::new());
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n.to_string(),
                None => continue,
            };

            let timestamp = match parse_snapshot_timestamp(&name) {
                Ok(ts) => ts,
                Err(_) => {
                    debug!("Ignoring non-snapshot file: {}", name);
                    continue;
                }
            };

            if self.last_seen.map(|seen| timestamp <= seen).unwrap_or(false) {
                continue;
            }
            discovered.push((timestamp, name, path));
        }

        discovered.sort_by_key(|(ts, _, _)| *ts);

        let mut snapshots = Vec::with_capacity(discovered.len());
        for (timestamp, name, path) in discovered {
            let file = match read_snapshot_file(&path) {
                Ok(file) => file,
                Err(e) => {
                    warn!("Skipping unparseable snapshot {}: {}", name, e);
                    continue;
                }
            };

            // Only parsed files advance the cursor, so a half-written
            // file is retried on the next cycle.
            self.last_seen = Some(timestamp);
            snapshots.push(DiscoveredSnapshot {
                name,
                timestamp,
                file,
            });
        }

        Ok(snapshots)
    }
}

/// Read and JSON-parse one dump file.
fn read_snapshot_file(path: &Path) -> WatchResult<SnapshotFile> {
    let content = std::fs::read_to_string(path)?;
    let file: SnapshotFile = serde_json::from_str(&content)?;
    Ok(file)
}
