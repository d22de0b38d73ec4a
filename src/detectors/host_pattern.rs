//! # Host Pattern Detector
//!
//! Standalone detector over the current snapshot only: fan-out between
//! hosts and IPs. Several targets on one host means the host is being
//! worked over; one host resolving to several IPs smells like fast-flux
//! infrastructure; one IP serving several hosts is shared attacker
//! infrastructure.

use std::collections::{BTreeSet, HashMap};

use crate::alert::{Alert, AlertCategory, AlertContext, AlertType, Severity};
use crate::{Snapshot, WatchResult};

use super::Detector;

/// Fan-out above which a MULTIPLE_* alert escalates from MEDIUM to HIGH.
const FAN_OUT_HIGH: usize = 3;

pub struct HostPatternDetector;

impl HostPatternDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HostPatternDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for HostPatternDetector {
    fn name(&self) -> &'static str {
        "host-pattern"
    }

    fn detect(
        &self,
        current: &Snapshot,
        _previous: Option<&Snapshot>,
    ) -> WatchResult<Vec<Alert>> {
        let mut host_targets: HashMap<&str, BTreeSet<&str>> = HashMap::new();
        let mut host_ips: HashMap<&str, BTreeSet<&str>> = HashMap::new();
        let mut ip_hosts: HashMap<&str, BTreeSet<&str>> = HashMap::new();

        for record in &current.targets {
            host_targets
                .entry(record.host.as_str())
                .or_default()
                .insert(record.target_id.as_str());
            host_ips
                .entry(record.host.as_str())
                .or_default()
                .insert(record.ip.as_str());
            ip_hosts
                .entry(record.ip.as_str())
                .or_default()
                .insert(record.host.as_str());
        }

        let mut alerts = Vec::new();

        for (host, ids) in &host_targets {
            if ids.len() > 1 {
                let severity = if ids.len() > FAN_OUT_HIGH {
                    Severity::High
                } else {
                    Severity::Medium
                };
                alerts.push(
                    Alert::new(
                        AlertType::MultipleTargetsHost,
                        AlertCategory::HostPattern,
                        severity,
                        format!("{} targets aimed at {}", ids.len(), host),
                        format!("Host {} carries {} distinct targets", host, ids.len()),
                        AlertContext {
                            host: Some(host.to_string()),
                            current_value: Some(ids.len() as f64),
                            ..Default::default()
                        },
                    )
                    .with_metadata("target_ids", ids.iter().cloned().collect::<Vec<_>>().join(",")),
                );
            }
        }

        for (host, ips) in &host_ips {
            if ips.len() > 1 {
                alerts.push(
                    Alert::new(
                        AlertType::HostIpChange,
                        AlertCategory::HostPattern,
                        Severity::High,
                        format!("Host {} maps to {} IPs", host, ips.len()),
                        format!(
                            "Host {} is configured with multiple IPs in one snapshot: {}",
                            host,
                            ips.iter().cloned().collect::<Vec<_>>().join(", "),
                        ),
                        AlertContext {
                            host: Some(host.to_string()),
                            current_value: Some(ips.len() as f64),
                            ..Default::default()
                        },
                    ),
                );
            }
        }

        for (ip, hosts) in &ip_hosts {
            if hosts.len() > 1 {
                let severity = if hosts.len() > FAN_OUT_HIGH {
                    Severity::High
                } else {
                    Severity::Medium
                };
                alerts.push(
                    Alert::new(
                        AlertType::MultipleHostsIp,
                        AlertCategory::HostPattern,
                        severity,
                        format!("IP {} serves {} hosts", ip, hosts.len()),
                        format!(
                            "IP {} backs multiple hosts: {}",
                            ip,
                            hosts.iter().cloned().collect::<Vec<_>>().join(", "),
                        ),
                        AlertContext {
                            ip: Some(ip.to_string()),
                            current_value: Some(hosts.len() as f64),
                            ..Default::default()
                        },
                    ),
                );
            }
        }

        Ok(alerts)
    }
}
