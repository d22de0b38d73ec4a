//! # Volume Detector
//!
//! Watches three size metrics across consecutive snapshots: total
//! targets, unique hosts, unique IPs. A doubling (>= 100%) of any metric
//! is a large spike; >= 50% is significant. Baselines under the minimum
//! are skipped entirely so a 2 -> 4 blip never pages anyone.
//!
//! On the very first snapshot there is nothing to compare against, so
//! only the absolute target-count threshold applies.

use std::collections::BTreeSet;

use crate::alert::{Alert, AlertCategory, AlertContext, AlertType, Severity};
use crate::{AlertsConfig, Snapshot, WatchResult};

use super::Detector;

/// Percentage increase of `current` over `previous`; 0 when the
/// baseline is 0.
fn percentage_increase(previous: usize, current: usize) -> f64 {
    if previous == 0 {
        return 0.0;
    }
    (current as f64 - previous as f64) / previous as f64 * 100.0
}

struct VolumeMetrics {
    total_targets: usize,
    unique_hosts: usize,
    unique_ips: usize,
}

impl VolumeMetrics {
    fn of(snapshot: &Snapshot) -> Self {
        let hosts: BTreeSet<&str> = snapshot.targets.iter().map(|r| r.host.as_str()).collect();
        let ips: BTreeSet<&str> = snapshot.targets.iter().map(|r| r.ip.as_str()).collect();
        Self {
            total_targets: snapshot.targets.len(),
            unique_hosts: hosts.len(),
            unique_ips: ips.len(),
        }
    }
}

pub struct VolumeDetector {
    config: AlertsConfig,
}

impl VolumeDetector {
    pub fn new(config: &AlertsConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn compare_metric(
        &self,
        alert_type: AlertType,
        label: &str,
        significant_severity: Severity,
        previous: usize,
        current: usize,
    ) -> Option<Alert> {
        if previous < self.config.volume_min_baseline {
            return None;
        }

        let pct = percentage_increase(previous, current);
        let (severity, threshold, scale) = if pct >= self.config.large_increase_pct {
            (Severity::High, self.config.large_increase_pct, "large")
        } else if pct >= self.config.significant_increase_pct {
            (
                significant_severity,
                self.config.significant_increase_pct,
                "significant",
            )
        } else {
            return None;
        };

        Some(
            Alert::new(
                alert_type,
                AlertCategory::Volume,
                severity,
                format!("{scale} increase in {label}"),
                format!(
                    "{} went from {} to {} (+{:.0}%)",
                    label, previous, current, pct
                ),
                AlertContext {
                    old_value: Some(previous.to_string()),
                    new_value: Some(current.to_string()),
                    threshold: Some(threshold),
                    current_value: Some(current as f64),
                    ..Default::default()
                },
            )
            .with_metadata("increase_pct", format!("{pct:.1}")),
        )
    }
}

impl Detector for VolumeDetector {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn detect(
        &self,
        current: &Snapshot,
        previous: Option<&Snapshot>,
    ) -> WatchResult<Vec<Alert>> {
        let cur = VolumeMetrics::of(current);

        let prev = match previous {
            Some(p) => VolumeMetrics::of(p),
            None => {
                // First run: absolute threshold on total targets only.
                if cur.total_targets > self.config.volume_absolute_threshold {
                    return Ok(vec![Alert::new(
                        AlertType::TargetVolumeIncrease,
                        AlertCategory::Volume,
                        Severity::Medium,
                        "Large initial target list",
                        format!(
                            "First snapshot carries {} targets (threshold {})",
                            cur.total_targets, self.config.volume_absolute_threshold
                        ),
                        AlertContext {
                            threshold: Some(self.config.volume_absolute_threshold as f64),
                            current_value: Some(cur.total_targets as f64),
                            ..Default::default()
                        },
                    )]);
                }
                return Ok(Vec::new());
            }
        };

        // Significant (>= 50%) increases: MEDIUM for targets and hosts,
        // HIGH for unique IPs: IP fan-out means new infrastructure.
        let checks = [
            (
                AlertType::TargetVolumeIncrease,
                "total targets",
                Severity::Medium,
                prev.total_targets,
                cur.total_targets,
            ),
            (
                AlertType::HostVolumeIncrease,
                "unique hosts",
                Severity::Medium,
                prev.unique_hosts,
                cur.unique_hosts,
            ),
            (
                AlertType::IpVolumeIncrease,
                "unique IPs",
                Severity::High,
                prev.unique_ips,
                cur.unique_ips,
            ),
        ];

        Ok(checks
            .into_iter()
            .filter_map(|(alert_type, label, sev, p, c)| {
                self.compare_metric(alert_type, label, sev, p, c)
            })
            .collect())
    }
}
