//! # Target Change Detector
//!
//! Diffs the targets of two consecutive snapshots by target id. A target
//! present in both raises one alert per changed configuration field;
//! targets only in the current snapshot are new appearances, targets
//! only in the previous one have disappeared.
//!
//! Method, protocol, and ssl flips are HIGH (they change what the
//! campaign is actually doing); port and path moves are MEDIUM.
//! Without a previous snapshot there is nothing to diff: no-op.

use std::collections::HashMap;

use crate::alert::{Alert, AlertCategory, AlertContext, AlertType, Severity};
use crate::timeline::{diff_fields, ChangedField};
use crate::{Snapshot, TargetRecord, WatchResult};

use super::Detector;

pub struct TargetChangeDetector;

impl TargetChangeDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TargetChangeDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn field_alert(record: &TargetRecord, field: ChangedField, old: String, new: String) -> Alert {
    let (alert_type, severity, label) = match field {
        ChangedField::Method => (AlertType::MethodChange, Severity::High, "method"),
        ChangedField::Protocol => (AlertType::ProtocolChange, Severity::High, "protocol"),
        ChangedField::Ssl => (AlertType::SslChange, Severity::High, "ssl"),
        ChangedField::Port => (AlertType::PortChange, Severity::Medium, "port"),
        ChangedField::Path => (AlertType::PathChange, Severity::Medium, "path"),
    };

    Alert::new(
        alert_type,
        AlertCategory::TargetChange,
        severity,
        format!("Target {} changed {}", record.target_id, label),
        format!(
            "Target {} on {} changed {}: {:?} -> {:?}",
            record.target_id, record.host, label, old, new
        ),
        AlertContext {
            target_id: Some(record.target_id.clone()),
            host: Some(record.host.clone()),
            ip: Some(record.ip.clone()),
            old_value: Some(old),
            new_value: Some(new),
            ..Default::default()
        },
    )
}

impl Detector for TargetChangeDetector {
    fn name(&self) -> &'static str {
        "target-change"
    }

    fn detect(
        &self,
        current: &Snapshot,
        previous: Option<&Snapshot>,
    ) -> WatchResult<Vec<Alert>> {
        let previous = match previous {
            Some(p) => p,
            None => return Ok(Vec::new()),
        };

        let prev_by_id: HashMap<&str, &TargetRecord> = previous
            .targets
            .iter()
            .map(|r| (r.target_id.as_str(), r))
            .collect();
        let cur_by_id: HashMap<&str, &TargetRecord> = current
            .targets
            .iter()
            .map(|r| (r.target_id.as_str(), r))
            .collect();

        let mut alerts = Vec::new();

        for (id, record) in &cur_by_id {
            match prev_by_id.get(id) {
                Some(prev_record) => {
                    for (field, old, new) in diff_fields(prev_record, record) {
                        alerts.push(field_alert(record, field, old, new));
                    }
                }
                None => {
                    alerts.push(Alert::new(
                        AlertType::TargetAppeared,
                        AlertCategory::TargetChange,
                        Severity::High,
                        format!("New target {}", record.target_id),
                        format!(
                            "Target {} appeared: {} {} ({}:{}{})",
                            record.target_id,
                            record.method.as_deref().unwrap_or("-"),
                            record.protocol,
                            record.host,
                            record.port,
                            record.path,
                        ),
                        AlertContext {
                            target_id: Some(record.target_id.clone()),
                            host: Some(record.host.clone()),
                            ip: Some(record.ip.clone()),
                            ..Default::default()
                        },
                    ));
                }
            }
        }

        for (id, record) in &prev_by_id {
            if !cur_by_id.contains_key(id) {
                alerts.push(Alert::new(
                    AlertType::TargetDisappeared,
                    AlertCategory::TargetChange,
                    Severity::Medium,
                    format!("Target {} disappeared", record.target_id),
                    format!(
                        "Target {} on {} is no longer in the campaign list",
                        record.target_id, record.host
                    ),
                    AlertContext {
                        target_id: Some(record.target_id.clone()),
                        host: Some(record.host.clone()),
                        ip: Some(record.ip.clone()),
                        ..Default::default()
                    },
                ));
            }
        }

        Ok(alerts)
    }
}
