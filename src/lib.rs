//! # Strikewatch - Core Library
//!
//! Defense-side monitoring daemon for attack-campaign target lists.
//!
//! Strikewatch ingests periodic full-snapshot dumps of a campaign's target
//! configuration (host/IP/protocol/port/path records), maintains historical
//! indices over them, computes aggregate statistics and activity timelines,
//! and runs rule-based detectors that compare consecutive snapshots to raise
//! alerts about newly appeared targets, configuration drift, volume spikes,
//! and risky top-level-domain targeting.
//!
//! ## Design Philosophy
//! - **Watch only.** Strikewatch observes dumped configuration; it never
//!   touches the targets themselves.
//! - Snapshots are immutable once ingested; all derived views (statistics,
//!   timelines, alerts) are rebuilt from the snapshot sequence.
//! - One scheduled loop drives ingestion; readers always see a fully
//!   published index, never a partial rebuild.

pub mod alert;
pub mod alerter;
pub mod detectors;
pub mod sources;
pub mod stats;
pub mod store;
pub mod timeline;
pub mod tld;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Unified error type for Strikewatch.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed snapshot name: {0}")]
    MalformedName(String),

    #[error("Snapshot parse error: {0}")]
    SnapshotParse(String),

    #[error("Detector error: {0}")]
    Detector(String),

    #[error("Alert delivery failed: {0}")]
    Delivery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

pub type WatchResult<T> = Result<T, WatchError>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Top-level configuration for Strikewatch.
///
/// Loaded from `strikewatch.toml` in the working directory or a path
/// supplied via CLI flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// General daemon settings.
    pub general: GeneralConfig,

    /// Statistics engine tuning knobs.
    pub statistics: StatisticsConfig,

    /// Timeline engine tuning knobs.
    pub timeline: TimelineConfig,

    /// Alert detector thresholds.
    pub alerts: AlertsConfig,

    /// Alert output settings.
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory watched for new snapshot dumps
    /// (`YYYY-MM-DD_HH-MM-SS_<suffix>.json`).
    pub watch_dir: PathBuf,

    /// Path where Strikewatch persists its state (PID file, alert log).
    pub data_dir: PathBuf,

    /// Poll interval in seconds during peak hours.
    pub peak_interval_secs: u64,

    /// Poll interval in seconds outside peak hours.
    pub off_peak_interval_secs: u64,

    /// Peak windows as `[start_hour, end_hour)` pairs in UTC.
    /// The interval is re-derived from the wall clock on every cycle.
    pub peak_hours: Vec<(u8, u8)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsConfig {
    /// How long (in seconds) a computed statistics snapshot stays valid.
    /// Validity is wall-clock only; ingest does not invalidate the cache.
    pub cache_ttl_secs: u64,

    /// Ports considered "common" in the port distribution.
    pub common_ports: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineConfig {
    /// Gap (in minutes) beyond which observations start a new activity
    /// bucket, and beyond which a target's appearance run breaks.
    pub grouping_threshold_mins: i64,

    /// How long (in seconds) cached timeline/history results stay valid,
    /// measured from computation time.
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Absolute target-count threshold used when no previous snapshot
    /// exists (first run).
    pub volume_absolute_threshold: usize,

    /// Minimum previous-snapshot value for a volume metric to be compared
    /// at all. Guards against noise on small populations.
    pub volume_min_baseline: usize,

    /// Percentage increase treated as a large spike.
    pub large_increase_pct: f64,

    /// Percentage increase treated as a significant spike.
    pub significant_increase_pct: f64,

    /// TLD suffixes always treated as elevated severity when targeted.
    pub high_risk_tlds: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Path to the JSONL alert log.
    pub alert_log_path: PathBuf,

    /// Optional webhook URL for real-time alert delivery.
    pub webhook_url: Option<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig {
                watch_dir: PathBuf::from("./dumps"),
                data_dir: PathBuf::from("./strikewatch-data"),
                peak_interval_secs: 120,
                off_peak_interval_secs: 600,
                peak_hours: vec![(8, 11), (18, 22)],
            },
            statistics: StatisticsConfig {
                cache_ttl_secs: 300,
                common_ports: vec![80, 443, 8080, 8443],
            },
            timeline: TimelineConfig {
                grouping_threshold_mins: 15,
                cache_ttl_secs: 1800,
            },
            alerts: AlertsConfig {
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
            },
            output: OutputConfig {
                alert_log_path: PathBuf::from("./strikewatch-data/alerts.jsonl"),
                webhook_url: None,
            },
        }
    }
}

impl WatchConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> WatchResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: WatchConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Write the default configuration to a TOML file.
    pub fn write_default(path: &std::path::Path) -> WatchResult<()> {
        let config = Self::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| WatchError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Core Types
// ---------------------------------------------------------------------------

/// Body payload descriptor attached to a target. The value may embed
/// `$_<ruleId>` placeholders resolved against the snapshot's RandomRules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodySpec {
    #[serde(rename = "type")]
    pub body_type: String,
    pub value: String,
}

/// A single attack configuration record from a snapshot dump.
///
/// This is the atomic unit the whole system indexes and diffs. Identity
/// across snapshots is by `target_id` equality only; nothing validates
/// that the same id refers to the same logical target over time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRecord {
    /// Unique within one snapshot; the cross-snapshot identity key.
    pub target_id: String,

    /// Campaign-side request identifier. Pass-through.
    pub request_id: String,

    /// Target hostname (may be a bare label like "localhost").
    pub host: String,

    /// Resolved or configured IP address, as dumped.
    pub ip: String,

    /// Protocol label from the dump ("http", "https", "tcp", ...).
    pub protocol: String,

    /// HTTP method when applicable.
    #[serde(default)]
    pub method: Option<String>,

    /// Target port.
    pub port: u16,

    /// Whether the campaign marks this target for TLS.
    pub ssl: bool,

    /// Request path. May embed `$_<ruleId>` placeholders.
    pub path: String,

    /// Optional body descriptor.
    #[serde(default)]
    pub body: Option<BodySpec>,

    /// Optional request headers.
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
}

/// Random-generation rule referenced by target paths/bodies via `$_<id>`.
/// Carried through the pipeline untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomRule {
    pub name: String,
    pub id: String,
    #[serde(default)]
    pub digit: bool,
    #[serde(default)]
    pub upper: bool,
    #[serde(default)]
    pub lower: bool,
    pub min_len: u32,
    pub max_len: u32,
}

/// Wire shape of one snapshot dump file.
///
/// `targets` is nullable in the dump format; a null list is treated as
/// an empty snapshot, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub targets: Option<Vec<TargetRecord>>,
    #[serde(default)]
    pub randoms: Vec<RandomRule>,
}

/// One timestamped, immutable ingest of the full target list.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Parsed from the dump filename. Drives all ordering.
    pub timestamp: DateTime<Utc>,

    /// Full target list at this point in time.
    pub targets: Vec<TargetRecord>,

    /// Random rules, pass-through.
    pub randoms: Vec<RandomRule>,
}

impl Snapshot {
    /// Build a snapshot from a parsed dump file and its filename.
    ///
    /// Fails with `WatchError::MalformedName` when the filename does not
    /// carry a `YYYY-MM-DD_HH-MM-SS_<suffix>` timestamp.
    pub fn from_file(name: &str, file: SnapshotFile) -> WatchResult<Self> {
        let timestamp = parse_snapshot_timestamp(name)?;
        Ok(Self {
            timestamp,
            targets: file.targets.unwrap_or_default(),
            randoms: file.randoms,
        })
    }

    /// Number of targets in this snapshot.
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }
}

// ---------------------------------------------------------------------------
// Snapshot filename parsing
// ---------------------------------------------------------------------------

fn timestamp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Anchored at the start; a suffix after the timestamp is required.
        Regex::new(r"^(\d{4}-\d{2}-\d{2})_(\d{2})-(\d{2})-(\d{2})_").expect("valid regex")
    })
}

/// Parse the snapshot timestamp encoded in a dump filename
/// (`YYYY-MM-DD_HH-MM-SS_<suffix>`, extension ignored).
pub fn parse_snapshot_timestamp(name: &str) -> WatchResult<DateTime<Utc>> {
    let caps = timestamp_pattern()
        .captures(name)
        .ok_or_else(|| WatchError::MalformedName(name.to_string()))?;

    let datetime = format!("{} {}:{}:{}", &caps[1], &caps[2], &caps[3], &caps[4]);
    let naive = NaiveDateTime::parse_from_str(&datetime, "%Y-%m-%d %H:%M:%S")
        .map_err(|_| WatchError::MalformedName(name.to_string()))?;

    Ok(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_well_formed_snapshot_name() {
        let ts = parse_snapshot_timestamp("2026-03-01_14-30-00_config.json").unwrap();
        assert_eq!(ts.hour(), 14);
        assert_eq!(ts.minute(), 30);
    }

    #[test]
    fn rejects_malformed_names() {
        for name in [
            "config.json",
            "2026-03-01.json",
            "2026-03-01_143000_config.json",
            "notadate_14-30-00_config.json",
            "2026-13-99_99-99-99_config.json",
        ] {
            assert!(
                matches!(parse_snapshot_timestamp(name), Err(WatchError::MalformedName(_))),
                "expected MalformedName for {name}"
            );
        }
    }

    #[test]
    fn null_target_list_is_empty_snapshot() {
        let file: SnapshotFile =
            serde_json::from_str(r#"{"targets": null, "randoms": []}"#).unwrap();
        let snap = Snapshot::from_file("2026-03-01_00-00-00_c.json", file).unwrap();
        assert_eq!(snap.target_count(), 0);
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = WatchConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: WatchConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.statistics.cache_ttl_secs, 300);
        assert_eq!(back.timeline.grouping_threshold_mins, 15);
        assert_eq!(back.alerts.volume_absolute_threshold, 100);
        assert_eq!(back.general.peak_hours.len(), 2);
    }
}
