//! # TLD Risk Detector
//!
//! Groups both snapshots' targets by TLD (two-label rule) and raises on
//! newly targeted TLDs, per-TLD volume jumps, and, independently of any
//! change, the bare presence of a high-risk TLD in the current
//! snapshot. The last one is a current-state risk flag: a campaign
//! aiming at .gov infrastructure is HIGH every cycle, not only the cycle
//! it started.

use std::collections::{BTreeSet, HashMap};

use crate::alert::{Alert, AlertCategory, AlertContext, AlertType, Severity};
use crate::tld::{extract_tld, is_high_risk};
use crate::{AlertsConfig, Snapshot, WatchResult};

use super::Detector;

struct TldGroup {
    count: usize,
    hosts: BTreeSet<String>,
}

fn group_by_tld(snapshot: &Snapshot) -> HashMap<String, TldGroup> {
    let mut groups: HashMap<String, TldGroup> = HashMap::new();
    for record in &snapshot.targets {
        let entry = groups.entry(extract_tld(&record.host)).or_insert(TldGroup {
            count: 0,
            hosts: BTreeSet::new(),
        });
        entry.count += 1;
        entry.hosts.insert(record.host.clone());
    }
    groups
}

pub struct TldRiskDetector {
    config: AlertsConfig,
}

impl TldRiskDetector {
    pub fn new(config: &AlertsConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn risk_severity(&self, tld: &str) -> Severity {
        if is_high_risk(tld, &self.config.high_risk_tlds) {
            Severity::High
        } else {
            Severity::Medium
        }
    }
}

impl Detector for TldRiskDetector {
    fn name(&self) -> &'static str {
        "tld-risk"
    }

    fn detect(
        &self,
        current: &Snapshot,
        previous: Option<&Snapshot>,
    ) -> WatchResult<Vec<Alert>> {
        let cur_groups = group_by_tld(current);
        let prev_groups = previous.map(group_by_tld);

        let mut alerts = Vec::new();

        if let Some(prev_groups) = &prev_groups {
            for (tld, group) in &cur_groups {
                match prev_groups.get(tld) {
                    None => {
                        alerts.push(
                            Alert::new(
                                AlertType::NewTld,
                                AlertCategory::Tld,
                                self.risk_severity(tld),
                                format!("Campaign expanded into {}", tld),
                                format!(
                                    "TLD {} is newly targeted with {} targets across {} hosts",
                                    tld,
                                    group.count,
                                    group.hosts.len(),
                                ),
                                AlertContext {
                                    tld: Some(tld.clone()),
                                    current_value: Some(group.count as f64),
                                    ..Default::default()
                                },
                            )
                            .with_metadata(
                                "hosts",
                                group.hosts.iter().cloned().collect::<Vec<_>>().join(","),
                            ),
                        );
                    }
                    Some(prev_group) if prev_group.count > 0 => {
                        let pct = (group.count as f64 - prev_group.count as f64)
                            / prev_group.count as f64
                            * 100.0;
                        if pct >= self.config.significant_increase_pct {
                            alerts.push(Alert::new(
                                AlertType::TldVolumeIncrease,
                                AlertCategory::Tld,
                                self.risk_severity(tld),
                                format!("Target volume under {} grew {:.0}%", tld, pct),
                                format!(
                                    "TLD {} went from {} to {} targets",
                                    tld, prev_group.count, group.count
                                ),
                                AlertContext {
                                    tld: Some(tld.clone()),
                                    old_value: Some(prev_group.count.to_string()),
                                    new_value: Some(group.count.to_string()),
                                    threshold: Some(self.config.significant_increase_pct),
                                    current_value: Some(group.count as f64),
                                    ..Default::default()
                                },
                            ));
                        }
                    }
                    Some(_) => {}
                }
            }
        }

        // Current-state risk flag, independent of the diffs above: any
        // high-risk TLD present right now is worth a HIGH alert.
        for (tld, group) in &cur_groups {
            if is_high_risk(tld, &self.config.high_risk_tlds) {
                alerts.push(
                    Alert::new(
                        AlertType::TldVolumeIncrease,
                        AlertCategory::Tld,
                        Severity::High,
                        format!("High-risk TLD {} under attack", tld),
                        format!(
                            "Campaign currently aims {} targets at {} hosts under {}",
                            group.count,
                            group.hosts.len(),
                            tld,
                        ),
                        AlertContext {
                            tld: Some(tld.clone()),
                            current_value: Some(group.count as f64),
                            ..Default::default()
                        },
                    )
                    .with_metadata("high_risk", "true"),
                );
            }
        }

        Ok(alerts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TargetRecord;
    use chrono::Utc;

    fn config() -> AlertsConfig {
        AlertsConfig {
            volume_absolute_threshold: 100,
            volume_min_baseline: 5,
            large_increase_pct: 100.0,
            significant_increase_pct: 50.0,
            high_risk_tlds: vec![
                ".gov".to_string(),
                ".mil".to_string(),
                ".edu".to_string(),
                ".bank".to_string(),
                ".fin".to_string(),
                ".emergency".to_string(),
            ],
        }
    }

    fn record(id: &str, host: &str) -> TargetRecord {
        TargetRecord {
            target_id: id.to_string(),
            request_id: format!("req-{id}"),
            host: host.to_string(),
            ip: "10.0.0.1".to_string(),
            protocol: "https".to_string(),
            method: Some("GET".to_string()),
            port: 443,
            ssl: true,
            path: "/".to_string(),
            body: None,
            headers: None,
        }
    }

    fn snapshot(targets: Vec<TargetRecord>) -> Snapshot {
        Snapshot {
            timestamp: Utc::now(),
            targets,
            randoms: Vec::new(),
        }
    }

    #[test]
    fn new_ordinary_tld_is_medium() {
        let prev = snapshot(vec![record("t1", "a.example.com")]);
        let cur = snapshot(vec![
            record("t1", "a.example.com"),
            record("t2", "shop.example.net"),
        ]);

        let alerts = TldRiskDetector::new(&config()).detect(&cur, Some(&prev)).unwrap();
        let new_tld = alerts.iter().find(|a| a.alert_type == AlertType::NewTld).unwrap();
        assert_eq!(new_tld.severity, Severity::Medium);
        assert_eq!(new_tld.context.tld.as_deref(), Some(".example.net"));
    }

    #[test]
    fn new_high_risk_tld_is_high() {
        let prev = snapshot(vec![record("t1", "a.example.com")]);
        let cur = snapshot(vec![
            record("t1", "a.example.com"),
            record("t2", "portal.ministry.gov"),
        ]);

        let alerts = TldRiskDetector::new(&config()).detect(&cur, Some(&prev)).unwrap();
        let new_tld = alerts.iter().find(|a| a.alert_type == AlertType::NewTld).unwrap();
        assert_eq!(new_tld.severity, Severity::High);
    }

    #[test]
    fn fifty_percent_growth_within_a_tld_is_reported() {
        let prev = snapshot(vec![
            record("t1", "a.example.com"),
            record("t2", "b.example.com"),
        ]);
        let cur = snapshot(vec![
            record("t1", "a.example.com"),
            record("t2", "b.example.com"),
            record("t3", "c.example.com"),
        ]);

        let alerts = TldRiskDetector::new(&config()).detect(&cur, Some(&prev)).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::TldVolumeIncrease);
        assert_eq!(alerts[0].severity, Severity::Medium);
        assert_eq!(alerts[0].context.old_value.as_deref(), Some("2"));
        assert_eq!(alerts[0].context.new_value.as_deref(), Some("3"));
    }

    /// High-risk presence alone raises HIGH, even with no previous
    /// snapshot and no change at all.
    #[test]
    fn high_risk_presence_always_raises_high() {
        let cur = snapshot(vec![record("t1", "portal.ministry.gov")]);
        let alerts = TldRiskDetector::new(&config()).detect(&cur, None).unwrap();

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::TldVolumeIncrease);
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(alerts[0].metadata["high_risk"], "true");

        // Unchanged between snapshots: the risk flag still fires.
        let prev = snapshot(vec![record("t1", "portal.ministry.gov")]);
        let alerts = TldRiskDetector::new(&config()).detect(&cur, Some(&prev)).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::High);
    }

    #[test]
    fn gov_cc_sld_is_not_high_risk() {
        let cur = snapshot(vec![record("t1", "mail.example.gov.lv")]);
        let alerts = TldRiskDetector::new(&config()).detect(&cur, None).unwrap();
        assert!(alerts.is_empty());
    }

    #[test]
    fn empty_snapshot_is_quiet() {
        let alerts = TldRiskDetector::new(&config())
            .detect(&snapshot(vec![]), Some(&snapshot(vec![])))
            .unwrap();
        assert!(alerts.is_empty());
    }
}
