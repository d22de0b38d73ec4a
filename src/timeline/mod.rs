//! # Timeline Engine
//!
//! Buckets historical target observations into activity windows, tracks
//! per-target configuration changes across buckets, and runs the trend
//! pipeline (outlier removal, gap interpolation, smoothing, regression)
//! over the bucketed target-count series.
//!
//! Bucketing is greedy: observations are sorted by timestamp and a new
//! bucket opens whenever an observation is further than the grouping
//! threshold from the current bucket's anchor (its first observation).
//!
//! Results are cached with a TTL measured from computation time, not
//! from the data timestamps the upstream implementation used, which made
//! old windows permanently "fresh".

pub mod trend;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::store::SnapshotStore;
use crate::{TargetRecord, TimelineConfig};

pub use trend::{TrendAnalysis, TrendDirection, TrendPoint};

// ---------------------------------------------------------------------------
// Field-level configuration diffing
// ---------------------------------------------------------------------------

/// The observable configuration fields of a target. An explicit list,
/// checked one by one; no field-name reflection anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangedField {
    Method,
    Protocol,
    Port,
    Path,
    Ssl,
}

/// One field-level difference between two observations of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChange {
    pub target_id: String,
    pub field: ChangedField,
    pub old_value: String,
    pub new_value: String,
    /// Timestamp of the observation that introduced the new value.
    pub timestamp: DateTime<Utc>,
}

/// Compare the tracked fields of two records of the same target.
/// Returns `(field, old, new)` triples for every difference.
pub fn diff_fields(old: &TargetRecord, new: &TargetRecord) -> Vec<(ChangedField, String, String)> {
    let mut changes = Vec::new();

    if old.method != new.method {
        changes.push((
            ChangedField::Method,
            old.method.clone().unwrap_or_default(),
            new.method.clone().unwrap_or_default(),
        ));
    }
    if old.protocol != new.protocol {
        changes.push((ChangedField::Protocol, old.protocol.clone(), new.protocol.clone()));
    }
    if old.port != new.port {
        changes.push((ChangedField::Port, old.port.to_string(), new.port.to_string()));
    }
    if old.path != new.path {
        changes.push((ChangedField::Path, old.path.clone(), new.path.clone()));
    }
    if old.ssl != new.ssl {
        changes.push((ChangedField::Ssl, old.ssl.to_string(), new.ssl.to_string()));
    }

    changes
}

/// Whether two records agree on every tracked configuration field.
pub fn fields_equal(a: &TargetRecord, b: &TargetRecord) -> bool {
    diff_fields(a, b).is_empty()
}

// ---------------------------------------------------------------------------
// Timeline types
// ---------------------------------------------------------------------------

/// One activity bucket of the timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Anchor: timestamp of the first observation in the bucket.
    pub start: DateTime<Utc>,

    /// Timestamp of the last observation in the bucket.
    pub end: DateTime<Utc>,

    /// Observed targets in this bucket.
    pub target_count: usize,

    /// Distinct hosts in this bucket.
    pub unique_hosts: usize,

    /// Target ids present here but not in the previous bucket.
    pub new_targets: BTreeSet<String>,

    /// Target ids present in the previous bucket but absent here.
    pub removed_targets: BTreeSet<String>,

    /// Field changes for targets present in both buckets.
    pub config_changes: Vec<ConfigChange>,
}

/// A maximal run of field-equal, time-contiguous observations of one
/// target. Contiguity means consecutive observations are no further
/// apart than the grouping threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appearance {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub observation_count: usize,
    /// The configuration held throughout the run.
    pub record: TargetRecord,
}

/// Full derived history of a single target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetHistory {
    pub target_id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub appearances: Vec<Appearance>,
    /// Field changes between consecutive raw observations. Finer-grained
    /// than the appearance runs.
    pub changes: Vec<ConfigChange>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

type WindowKey = (DateTime<Utc>, DateTime<Utc>);

pub struct TimelineEngine {
    config: TimelineConfig,
    timeline_cache: HashMap<WindowKey, (Instant, Arc<Vec<TimelineEntry>>)>,
    history_cache: HashMap<String, (Instant, Option<Arc<TargetHistory>>)>,
}

impl TimelineEngine {
    pub fn new(config: &TimelineConfig) -> Self {
        Self {
            config: config.clone(),
            timeline_cache: HashMap::new(),
            history_cache: HashMap::new(),
        }
    }

    fn grouping_threshold(&self) -> Duration {
        Duration::minutes(self.config.grouping_threshold_mins)
    }

    fn cache_valid(&self, computed_at: &Instant) -> bool {
        computed_at.elapsed().as_secs() < self.config.cache_ttl_secs
    }

    /// The bucketed activity timeline for `[start, end]` (inclusive).
    pub fn timeline(
        &mut self,
        store: &SnapshotStore,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Arc<Vec<TimelineEntry>> {
        if let Some((computed_at, cached)) = self.timeline_cache.get(&(start, end)) {
            if self.cache_valid(computed_at) {
                return Arc::clone(cached);
            }
        }

        let entries = Arc::new(self.build_timeline(store, start, end));
        self.timeline_cache
            .insert((start, end), (Instant::now(), Arc::clone(&entries)));
        entries
    }

    fn build_timeline(
        &self,
        store: &SnapshotStore,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<TimelineEntry> {
        // Gather all observations inside the window. Snapshots are stored
        // ascending, so the result is already timestamp-sorted.
        let mut observations: Vec<(DateTime<Utc>, &TargetRecord)> = Vec::new();
        for snapshot in store.snapshots() {
            if snapshot.timestamp < start || snapshot.timestamp > end {
                continue;
            }
            for record in &snapshot.targets {
                observations.push((snapshot.timestamp, record));
            }
        }
        observations.sort_by_key(|(ts, _)| *ts);

        // Greedy bucketing against each bucket's anchor.
        let threshold = self.grouping_threshold();
        let mut buckets: Vec<Vec<(DateTime<Utc>, &TargetRecord)>> = Vec::new();
        for obs in observations {
            match buckets.last_mut() {
                Some(bucket) if obs.0 - bucket[0].0 <= threshold => bucket.push(obs),
                _ => buckets.push(vec![obs]),
            }
        }

        let mut entries: Vec<TimelineEntry> = Vec::with_capacity(buckets.len());
        let mut previous: Option<BTreeMap<String, (DateTime<Utc>, TargetRecord)>> = None;

        for bucket in buckets {
            // Last observation per target id wins within a bucket.
            let mut current: BTreeMap<String, (DateTime<Utc>, TargetRecord)> = BTreeMap::new();
            let mut hosts: BTreeSet<&str> = BTreeSet::new();
            for (ts, record) in &bucket {
                hosts.insert(record.host.as_str());
                current.insert(record.target_id.clone(), (*ts, (*record).clone()));
            }

            let (new_targets, removed_targets, config_changes) = match &previous {
                Some(prev) => {
                    let new: BTreeSet<String> = current
                        .keys()
                        .filter(|id| !prev.contains_key(*id))
                        .cloned()
                        .collect();
                    let removed: BTreeSet<String> = prev
                        .keys()
                        .filter(|id| !current.contains_key(*id))
                        .cloned()
                        .collect();

                    let mut changes = Vec::new();
                    for (id, (ts, record)) in &current {
                        if let Some((_, prev_record)) = prev.get(id) {
                            for (field, old_value, new_value) in diff_fields(prev_record, record) {
                                changes.push(ConfigChange {
                                    target_id: id.clone(),
                                    field,
                                    old_value,
                                    new_value,
                                    timestamp: *ts,
                                });
                            }
                        }
                    }
                    (new, removed, changes)
                }
                // The first bucket has no baseline; everything is new.
                None => (current.keys().cloned().collect(), BTreeSet::new(), Vec::new()),
            };

            entries.push(TimelineEntry {
                start: bucket[0].0,
                end: bucket[bucket.len() - 1].0,
                target_count: current.len(),
                unique_hosts: hosts.len(),
                new_targets,
                removed_targets,
                config_changes,
            });
            previous = Some(current);
        }

        entries
    }

    /// Derived history of one target: appearance runs plus field changes.
    /// `None` if the target was never observed.
    pub fn target_history(
        &mut self,
        store: &SnapshotStore,
        target_id: &str,
    ) -> Option<Arc<TargetHistory>> {
        if let Some((computed_at, cached)) = self.history_cache.get(target_id) {
            if self.cache_valid(computed_at) {
                return cached.clone();
            }
        }

        let history = self.build_history(store, target_id).map(Arc::new);
        self.history_cache
            .insert(target_id.to_string(), (Instant::now(), history.clone()));
        history
    }

    fn build_history(&self, store: &SnapshotStore, target_id: &str) -> Option<TargetHistory> {
        let raw = store.history_of(target_id);
        let (first, last) = match (raw.first(), raw.last()) {
            (Some(f), Some(l)) => (f.0, l.0),
            _ => return None,
        };

        let threshold = self.grouping_threshold();
        let mut appearances: Vec<Appearance> = Vec::new();
        let mut changes: Vec<ConfigChange> = Vec::new();

        for (ts, record) in &raw {
            let extend_run = appearances.last().map(|run| {
                fields_equal(&run.record, record) && *ts - run.last_seen <= threshold
            });

            match extend_run {
                Some(true) => {
                    let run = appearances.last_mut().expect("run exists");
                    run.last_seen = *ts;
                    run.observation_count += 1;
                }
                _ => appearances.push(Appearance {
                    first_seen: *ts,
                    last_seen: *ts,
                    observation_count: 1,
                    record: record.clone(),
                }),
            }
        }

        for pair in raw.windows(2) {
            let (_, prev_record) = &pair[0];
            let (ts, record) = &pair[1];
            for (field, old_value, new_value) in diff_fields(prev_record, record) {
                changes.push(ConfigChange {
                    target_id: target_id.to_string(),
                    field,
                    old_value,
                    new_value,
                    timestamp: *ts,
                });
            }
        }

        Some(TargetHistory {
            target_id: target_id.to_string(),
            first_seen: first,
            last_seen: last,
            appearances,
            changes,
        })
    }

    /// Run the trend pipeline over the bucketed target-count series of
    /// the window. `max_gap_hours` bounds the spacing between series
    /// points before interpolation kicks in.
    pub fn analyze_trend(
        &mut self,
        store: &SnapshotStore,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        max_gap_hours: f64,
    ) -> TrendAnalysis {
        let entries = self.timeline(store, start, end);
        let points: Vec<TrendPoint> = entries
            .iter()
            .map(|e| TrendPoint {
                timestamp: e.start,
                value: e.target_count as f64,
            })
            .collect();
        trend::analyze(&points, max_gap_hours)
    }

    /// Drop all cached results.
    pub fn invalidate(&mut self) {
        self.timeline_cache.clear();
        self.history_cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SnapshotFile;
    use chrono::TimeZone;

    fn record(id: &str, host: &str, method: &str, port: u16) -> TargetRecord {
        TargetRecord {
            target_id: id.to_string(),
            request_id: format!("req-{id}"),
            host: host.to_string(),
            ip: "10.0.0.1".to_string(),
            protocol: "https".to_string(),
            method: Some(method.to_string()),
            port,
            ssl: true,
            path: "/login".to_string(),
            body: None,
            headers: None,
        }
    }

    fn snapshot_name(hour: u32, minute: u32) -> String {
        format!("2026-03-01_{hour:02}-{minute:02}-00_config.json")
    }

    fn ingest(store: &mut SnapshotStore, hour: u32, minute: u32, records: Vec<TargetRecord>) {
        store
            .ingest(
                &snapshot_name(hour, minute),
                SnapshotFile {
                    targets: Some(records),
                    randoms: Vec::new(),
                },
            )
            .unwrap();
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap(),
        )
    }

    fn engine() -> TimelineEngine {
        TimelineEngine::new(&TimelineConfig {
            grouping_threshold_mins: 15,
            cache_ttl_secs: 1800,
        })
    }

    #[test]
    fn observations_within_threshold_share_a_bucket() {
        let mut store = SnapshotStore::new();
        ingest(&mut store, 10, 0, vec![record("t1", "a.example.com", "GET", 443)]);
        ingest(&mut store, 10, 10, vec![record("t2", "b.example.com", "GET", 443)]);
        // 25 min after the first bucket's anchor: new bucket.
        ingest(&mut store, 10, 25, vec![record("t3", "c.example.com", "GET", 443)]);

        let mut engine = engine();
        let (start, end) = window();
        let entries = engine.timeline(&store, start, end);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].target_count, 2);
        assert_eq!(entries[0].unique_hosts, 2);
        assert_eq!(entries[1].target_count, 1);
    }

    #[test]
    fn new_and_removed_targets_compare_against_previous_bucket() {
        let mut store = SnapshotStore::new();
        ingest(
            &mut store,
            10,
            0,
            vec![
                record("t1", "a.example.com", "GET", 443),
                record("t2", "b.example.com", "GET", 443),
            ],
        );
        ingest(
            &mut store,
            11,
            0,
            vec![
                record("t2", "b.example.com", "GET", 443),
                record("t3", "c.example.com", "GET", 443),
            ],
        );

        let mut engine = engine();
        let (start, end) = window();
        let entries = engine.timeline(&store, start, end);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].new_targets.len(), 2);
        assert!(entries[1].new_targets.contains("t3"));
        assert!(entries[1].removed_targets.contains("t1"));
        assert!(entries[1].config_changes.is_empty());
    }

    #[test]
    fn field_change_between_buckets_is_reported() {
        let mut store = SnapshotStore::new();
        ingest(&mut store, 10, 0, vec![record("t1", "a.example.com", "GET", 443)]);
        ingest(&mut store, 11, 0, vec![record("t1", "a.example.com", "POST", 8443)]);

        let mut engine = engine();
        let (start, end) = window();
        let entries = engine.timeline(&store, start, end);

        let changes = &entries[1].config_changes;
        assert_eq!(changes.len(), 2);
        let method = changes.iter().find(|c| c.field == ChangedField::Method).unwrap();
        assert_eq!(method.old_value, "GET");
        assert_eq!(method.new_value, "POST");
        assert!(changes.iter().any(|c| c.field == ChangedField::Port));
    }

    #[test]
    fn window_bounds_exclude_outside_snapshots() {
        let mut store = SnapshotStore::new();
        ingest(&mut store, 10, 0, vec![record("t1", "a.example.com", "GET", 443)]);

        let mut engine = engine();
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert!(engine.timeline(&store, start, end).is_empty());
    }

    #[test]
    fn appearance_breaks_on_field_change() {
        let mut store = SnapshotStore::new();
        ingest(&mut store, 10, 0, vec![record("t1", "a.example.com", "GET", 443)]);
        ingest(&mut store, 10, 10, vec![record("t1", "a.example.com", "GET", 443)]);
        ingest(&mut store, 10, 20, vec![record("t1", "a.example.com", "POST", 443)]);

        let mut engine = engine();
        let history = engine.target_history(&store, "t1").unwrap();

        assert_eq!(history.appearances.len(), 2);
        assert_eq!(history.appearances[0].observation_count, 2);
        assert_eq!(history.appearances[1].record.method.as_deref(), Some("POST"));
        assert_eq!(history.changes.len(), 1);
        assert_eq!(history.changes[0].field, ChangedField::Method);
    }

    #[test]
    fn appearance_breaks_on_time_gap() {
        let mut store = SnapshotStore::new();
        ingest(&mut store, 10, 0, vec![record("t1", "a.example.com", "GET", 443)]);
        // Same configuration but 45 minutes later: run breaks.
        ingest(&mut store, 10, 45, vec![record("t1", "a.example.com", "GET", 443)]);

        let mut engine = engine();
        let history = engine.target_history(&store, "t1").unwrap();

        assert_eq!(history.appearances.len(), 2);
        assert!(history.changes.is_empty());
        assert!(history.first_seen < history.last_seen);
    }

    #[test]
    fn unknown_target_has_no_history() {
        let store = SnapshotStore::new();
        let mut engine = engine();
        assert!(engine.target_history(&store, "nope").is_none());
    }

    #[test]
    fn growing_bucket_series_trends_upward() {
        let mut store = SnapshotStore::new();
        for (hour, count) in [(8u32, 2usize), (10, 4), (12, 6), (14, 8), (16, 10)] {
            let records = (0..count)
                .map(|i| record(&format!("t{hour}-{i}"), "a.example.com", "GET", 443))
                .collect();
            ingest(&mut store, hour, 0, records);
        }

        let mut engine = engine();
        let (start, end) = window();
        let analysis = engine.analyze_trend(&store, start, end, 6.0);

        assert_eq!(analysis.direction, TrendDirection::Increasing);
        assert!(analysis.confidence > 0.9);
        assert!(analysis.change_rate > 0.0);
    }

    #[test]
    fn cached_timeline_is_reused_within_ttl() {
        let mut store = SnapshotStore::new();
        ingest(&mut store, 10, 0, vec![record("t1", "a.example.com", "GET", 443)]);

        let mut engine = engine();
        let (start, end) = window();
        let first = engine.timeline(&store, start, end);

        // New data arrives; the cached window is still served until the
        // TTL lapses or the caches are invalidated.
        ingest(&mut store, 11, 0, vec![record("t2", "b.example.com", "GET", 443)]);
        let second = engine.timeline(&store, start, end);
        assert!(Arc::ptr_eq(&first, &second));

        engine.invalidate();
        let third = engine.timeline(&store, start, end);
        assert_eq!(third.len(), 2);
    }
}
