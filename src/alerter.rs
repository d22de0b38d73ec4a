//! # Alert Delivery
//!
//! Writes detector alerts to a JSONL file (always) and optionally POSTs
//! them to a webhook. One JSON object per line keeps the log trivially
//! greppable and jq-able.
//!
//! Webhook failures are logged and swallowed: a dead Slack hook must
//! never stall the watch loop.

use std::io::Write;
use std::path::Path;

use crate::alert::{Alert, Severity};
use crate::{WatchError, WatchResult};

/// Append one alert to the JSONL alert log, creating the file and its
/// parent directories on first use.
pub fn log_alert(log_path: &Path, alert: &Alert) -> WatchResult<()> {
    let json_line = serde_json::to_string(alert)?;

    if let Some(parent) = log_path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    writeln!(file, "{}", json_line)?;
    file.flush()?;

    log::warn!(
        "[ALERT] {:?} | {:?} | {} | {}",
        alert.severity,
        alert.alert_type,
        alert.timestamp.to_rfc3339(),
        alert.title,
    );

    Ok(())
}

/// POST an alert to a webhook as JSON.
///
/// Compatible with Slack, Discord, PagerDuty, and generic endpoints: the
/// payload carries a `text` summary line plus the full alert. Timeout 5
/// seconds; delivery failures are logged, not propagated.
pub fn send_webhook(webhook_url: &str, alert: &Alert) -> WatchResult<()> {
    if !webhook_url.starts_with("https://") && !webhook_url.starts_with("http://") {
        return Err(WatchError::Delivery(format!(
            "Webhook URL must start with http:// or https://, got: {}",
            webhook_url
        )));
    }

    let payload = serde_json::json!({
        "text": format!("Strikewatch: [{:?}] {}", alert.severity, alert.title),
        "alert": alert,
    });
    let payload_str = serde_json::to_string(&payload)?;

    let agent = ureq::AgentBuilder::new()
        .timeout(std::time::Duration::from_secs(5))
        .build();
    let result = agent
        .post(webhook_url)
        .set("Content-Type", "application/json")
        .send_string(&payload_str);

    match result {
        Ok(response) => {
            log::info!(
                "[WEBHOOK] POST to {} succeeded (status {}): {}",
                webhook_url,
                response.status(),
                alert.title,
            );
        }
        Err(e) => {
            log::warn!(
                "[WEBHOOK] POST to {} failed: {} (alert {} still logged locally)",
                webhook_url,
                e,
                alert.id,
            );
        }
    }

    Ok(())
}

/// Whether an alert is severe enough for webhook delivery.
pub fn webhook_worthy(alert: &Alert) -> bool {
    alert.severity >= Severity::High
}
