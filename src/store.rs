//! # Snapshot Store
//!
//! Ingests parsed configuration snapshots and maintains the derived
//! indices every other engine reads from: host -> targets, TLD -> hosts,
//! method -> targets, per-host observation timelines, and the
//! latest-known record per target id.
//!
//! History is cumulative: a target that disappears from later snapshots
//! keeps its indexed entries, since the whole point is to track what the
//! campaign has ever aimed at. The full snapshot sequence is retained
//! append-only and drives all history queries as O(snapshots) scans.
//!
//! Indices are published by swapping a fresh `Arc<Indices>` into place
//! only after a whole snapshot has been applied, so a reader holding the
//! previous `Arc` never observes a half-built index.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::tld::extract_tld;
use crate::{Snapshot, SnapshotFile, TargetRecord, WatchResult};

/// The derived index set, immutable after publish.
#[derive(Debug, Clone, Default)]
pub struct Indices {
    /// host -> target ids ever observed on that host.
    pub host_targets: HashMap<String, BTreeSet<String>>,

    /// TLD (two-label rule) -> hosts ever observed under it.
    pub tld_hosts: HashMap<String, BTreeSet<String>>,

    /// HTTP method -> target ids ever observed using it.
    pub method_targets: HashMap<String, BTreeSet<String>>,

    /// host -> ascending snapshot timestamps in which the host appeared.
    pub host_timelines: HashMap<String, Vec<DateTime<Utc>>>,

    /// target id -> most recently observed record.
    pub latest_records: HashMap<String, TargetRecord>,
}

impl Indices {
    /// Fold one snapshot into the index set. Snapshots must be applied in
    /// ascending timestamp order for `latest_records` to be correct.
    fn apply(&mut self, snapshot: &Snapshot) {
        for record in &snapshot.targets {
            self.host_targets
                .entry(record.host.clone())
                .or_default()
                .insert(record.target_id.clone());

            self.tld_hosts
                .entry(extract_tld(&record.host))
                .or_default()
                .insert(record.host.clone());

            if let Some(method) = &record.method {
                self.method_targets
                    .entry(method.clone())
                    .or_default()
                    .insert(record.target_id.clone());
            }

            let timeline = self.host_timelines.entry(record.host.clone()).or_default();
            if timeline.last() != Some(&snapshot.timestamp) {
                timeline.push(snapshot.timestamp);
            }

            self.latest_records
                .insert(record.target_id.clone(), record.clone());
        }
    }
}

/// The snapshot ingestion/indexing engine. Single writer; readers clone
/// the published `Arc<Indices>`.
pub struct SnapshotStore {
    /// Retained snapshots, ascending by timestamp.
    snapshots: Vec<Snapshot>,

    /// Published index set, rebuilt or extended on each ingest.
    indices: Arc<Indices>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            snapshots: Vec::new(),
            indices: Arc::new(Indices::default()),
        }
    }

    /// Ingest a parsed snapshot dump under its filename.
    ///
    /// The timestamp is parsed from `name` before anything else; a
    /// malformed name fails with no index mutation at all. Re-ingesting a
    /// name that carries an already-retained timestamp replaces that
    /// snapshot (and rebuilds the indices), so feeding the same dump
    /// twice cannot double-count.
    ///
    /// Returns the parsed snapshot timestamp.
    pub fn ingest(&mut self, name: &str, file: SnapshotFile) -> WatchResult<DateTime<Utc>> {
        let snapshot = Snapshot::from_file(name, file)?;
        let timestamp = snapshot.timestamp;

        let in_order = self
            .snapshots
            .last()
            .map(|last| timestamp > last.timestamp)
            .unwrap_or(true);

        if in_order {
            // Common case: strictly newer snapshot. Extend a copy of the
            // current indices and publish the copy.
            let mut next = (*self.indices).clone();
            next.apply(&snapshot);
            self.snapshots.push(snapshot);
            self.indices = Arc::new(next);
        } else {
            // Replacement or out-of-order arrival: splice into the sorted
            // sequence and replay everything so latest_records stays
            // consistent with the newest record per target id.
            match self
                .snapshots
                .binary_search_by_key(&timestamp, |s| s.timestamp)
            {
                Ok(pos) => self.snapshots[pos] = snapshot,
                Err(pos) => self.snapshots.insert(pos, snapshot),
            }
            self.rebuild();
        }

        Ok(timestamp)
    }

    /// Rebuild the indices by replaying all retained snapshots in order.
    fn rebuild(&mut self) {
        let mut next = Indices::default();
        for snapshot in &self.snapshots {
            next.apply(snapshot);
        }
        self.indices = Arc::new(next);
    }

    /// The published index set. Cheap to clone and immutable afterwards.
    pub fn indices(&self) -> Arc<Indices> {
        Arc::clone(&self.indices)
    }

    /// Latest-known records of every target ever observed on `host`.
    /// Empty for unknown hosts.
    pub fn targets_for_host(&self, host: &str) -> Vec<TargetRecord> {
        match self.indices.host_targets.get(host) {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.indices.latest_records.get(id))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// All hosts ever observed.
    pub fn active_hosts(&self) -> BTreeSet<String> {
        self.indices.host_targets.keys().cloned().collect()
    }

    /// Hosts ever observed under a TLD (two-label rule).
    pub fn hosts_for_tld(&self, tld: &str) -> BTreeSet<String> {
        self.indices.tld_hosts.get(tld).cloned().unwrap_or_default()
    }

    /// Target ids ever observed using an HTTP method.
    pub fn targets_for_method(&self, method: &str) -> BTreeSet<String> {
        self.indices
            .method_targets
            .get(method)
            .cloned()
            .unwrap_or_default()
    }

    /// Every observation of a target id across the retained snapshots,
    /// ascending by timestamp. Empty if never observed.
    pub fn history_of(&self, target_id: &str) -> Vec<(DateTime<Utc>, TargetRecord)> {
        let mut history = Vec::new();
        for snapshot in &self.snapshots {
            for record in &snapshot.targets {
                if record.target_id == target_id {
                    history.push((snapshot.timestamp, record.clone()));
                }
            }
        }
        history
    }

    /// Timestamp of the newest retained snapshot, if any.
    pub fn latest_update(&self) -> Option<DateTime<Utc>> {
        self.snapshots.last().map(|s| s.timestamp)
    }

    /// Newest retained snapshot.
    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    /// Second-newest retained snapshot, the diff baseline for detectors.
    pub fn previous(&self) -> Option<&Snapshot> {
        self.snapshots.len().checked_sub(2).map(|i| &self.snapshots[i])
    }

    /// Number of retained snapshots.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// The full retained sequence, ascending. Timeline queries scan this.
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// Full teardown: drop all snapshots and indices.
    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.indices = Arc::new(Indices::default());
    }
}
