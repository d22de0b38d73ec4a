//! # Alert Model
//!
//! Typed, severity-ranked alerts emitted by the detectors. An alert is
//! immutable once created; its lifecycle ends only via the alert log's
//! prune/clear operations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed enumeration of everything the detectors can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    MethodChange,
    ProtocolChange,
    PortChange,
    SslChange,
    PathChange,
    TargetAppeared,
    TargetDisappeared,
    MultipleTargetsHost,
    HostIpChange,
    MultipleHostsIp,
    TargetVolumeIncrease,
    HostVolumeIncrease,
    IpVolumeIncrease,
    NewTld,
    TldVolumeIncrease,
}

/// Which detector family produced an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertCategory {
    TargetChange,
    HostPattern,
    Volume,
    Tld,
}

/// Severity ladder. Ordering is derived so `Critical > High > ... > Info`
/// comparisons work directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// Structured context attached to an alert. All fields optional; each
/// detector fills what it knows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tld: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_value: Option<f64>,
}

/// A single detector finding. Created only by detectors; immutable
/// afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub alert_type: AlertType,
    pub category: AlertCategory,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub context: AlertContext,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Process-wide monotonic suffix keeping alert ids unique even when many
/// alerts share a millisecond.
static ALERT_SEQ: AtomicU64 = AtomicU64::new(0);

impl Alert {
    pub fn new(
        alert_type: AlertType,
        category: AlertCategory,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
        context: AlertContext,
    ) -> Self {
        let timestamp = Utc::now();
        let seq = ALERT_SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("{:?}-{}-{}", alert_type, timestamp.timestamp_millis(), seq),
            alert_type,
            category,
            severity,
            timestamp,
            title: title.into(),
            description: description.into(),
            context,
            metadata: HashMap::new(),
        }
    }

    /// Attach a free-form metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_matches_the_ladder() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Info);
    }

    #[test]
    fn ids_are_unique_within_a_burst() {
        let a = Alert::new(
            AlertType::NewTld,
            AlertCategory::Tld,
            Severity::Medium,
            "t",
            "d",
            AlertContext::default(),
        );
        let b = Alert::new(
            AlertType::NewTld,
            AlertCategory::Tld,
            Severity::Medium,
            "t",
            "d",
            AlertContext::default(),
        );
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn serializes_with_screaming_snake_case_tags() {
        let alert = Alert::new(
            AlertType::MethodChange,
            AlertCategory::TargetChange,
            Severity::High,
            "Method changed",
            "GET -> POST",
            AlertContext {
                old_value: Some("GET".into()),
                new_value: Some("POST".into()),
                ..Default::default()
            },
        );
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["alert_type"], "METHOD_CHANGE");
        assert_eq!(json["category"], "TARGET_CHANGE");
        assert_eq!(json["severity"], "HIGH");
        assert!(json.get("metadata").is_none());
    }
}
