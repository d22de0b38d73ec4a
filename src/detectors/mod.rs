//! # Alert Engine Orchestrator
//!
//! Runs the four independent detectors against each new snapshot (and
//! the previous one, when present) and maintains the append-only alert
//! log with time/type filtering and pruning.
//!
//! Detectors are isolated from each other: one detector failing is
//! logged and the remaining detectors still run for the same cycle.

pub mod host_pattern;
pub mod target_change;
pub mod tld_risk;
pub mod volume;

use chrono::{DateTime, Utc};
use log::error;

use crate::alert::{Alert, AlertType};
use crate::{AlertsConfig, Snapshot, WatchResult};

pub use host_pattern::HostPatternDetector;
pub use target_change::TargetChangeDetector;
pub use tld_risk::TldRiskDetector;
pub use volume::VolumeDetector;

/// A rule-based detector comparing a new snapshot against the previous
/// one (or evaluating it standalone). Pure given its inputs; never
/// mutates store state.
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, current: &Snapshot, previous: Option<&Snapshot>)
        -> WatchResult<Vec<Alert>>;
}

/// Orchestrates the detectors and owns the append-only alert log.
pub struct AlertEngine {
    detectors: Vec<Box<dyn Detector>>,
    log: Vec<Alert>,
}

impl AlertEngine {
    /// The standard engine: target-change, host-pattern, volume, and
    /// TLD-risk detectors, in that order.
    pub fn new(config: &AlertsConfig) -> Self {
        Self {
            detectors: vec![
                Box::new(TargetChangeDetector::new()),
                Box::new(HostPatternDetector::new()),
                Box::new(VolumeDetector::new(config)),
                Box::new(TldRiskDetector::new(config)),
            ],
            log: Vec::new(),
        }
    }

    /// An engine with a caller-chosen detector set. Used by tests and
    /// by anyone embedding a subset of the pipeline.
    pub fn with_detectors(detectors: Vec<Box<dyn Detector>>) -> Self {
        Self {
            detectors,
            log: Vec::new(),
        }
    }

    /// Run every detector against the snapshot pair, append all findings
    /// to the log, and return the new alerts.
    ///
    /// A failing detector is logged and skipped; the others still run.
    pub fn process(&mut self, current: &Snapshot, previous: Option<&Snapshot>) -> Vec<Alert> {
        let mut new_alerts = Vec::new();

        for detector in &self.detectors {
            match detector.detect(current, previous) {
                Ok(alerts) => new_alerts.extend(alerts),
                Err(e) => {
                    error!("Detector {} failed: {}", detector.name(), e);
                }
            }
        }

        self.log.extend(new_alerts.iter().cloned());
        new_alerts
    }

    /// The alert log filtered by inclusive time bounds and/or type
    /// membership. All filters optional.
    pub fn alerts(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        types: Option<&[AlertType]>,
    ) -> Vec<Alert> {
        self.log
            .iter()
            .filter(|a| start.map(|s| a.timestamp >= s).unwrap_or(true))
            .filter(|a| end.map(|e| a.timestamp <= e).unwrap_or(true))
            .filter(|a| types.map(|t| t.contains(&a.alert_type)).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Drop every logged alert older than `cutoff`.
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) {
        self.log.retain(|a| a.timestamp >= cutoff);
    }

    /// Drop the whole alert log.
    pub fn clear(&mut self) {
        self.log.clear();
    }

    /// Number of alerts currently retained.
    pub fn alert_count(&self) -> usize {
        self.log.len()
    }
}
