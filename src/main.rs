//! # Strikewatch - CLI Entry Point
//!
//! Command-line interface for the Strikewatch daemon.
//!
//! Commands:
//! - `start`       - Start the watch daemon
//! - `status`      - Show current daemon status
//! - `stop`        - Stop the running daemon
//! - `init-config` - Generate a default configuration file

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Timelike;
use strikewatch::alerter;
use strikewatch::detectors::AlertEngine;
use strikewatch::sources::DirectorySource;
use strikewatch::store::SnapshotStore;
use strikewatch::{GeneralConfig, WatchConfig, WatchError, WatchResult};

/// Strikewatch - campaign target-list monitoring daemon.
///
/// Watches a directory for target-list snapshot dumps, indexes them,
/// and raises alerts on new targets, configuration drift, volume
/// spikes, and risky TLD targeting.
#[derive(Parser, Debug)]
#[command(name = "strikewatch")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "strikewatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the Strikewatch daemon.
    Start,

    /// Show current daemon status.
    Status,

    /// Stop the running daemon.
    Stop,

    /// Generate a default configuration file.
    InitConfig,
}

#[tokio::main]
async fn main() -> WatchResult<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => cmd_start(&cli.config).await,
        Commands::Status => cmd_status(&cli.config).await,
        Commands::Stop => cmd_stop(&cli.config).await,
        Commands::InitConfig => cmd_init_config(&cli.config),
    }
}

/// Pick the poll interval for the given wall-clock hour. Re-evaluated
/// every cycle, never fixed at start.
fn interval_for_hour(config: &GeneralConfig, hour: u32) -> std::time::Duration {
    let in_peak = config
        .peak_hours
        .iter()
        .any(|&(start, end)| hour >= start as u32 && hour < end as u32);
    let secs = if in_peak {
        config.peak_interval_secs
    } else {
        config.off_peak_interval_secs
    };
    std::time::Duration::from_secs(secs)
}

/// Start the Strikewatch daemon.
///
/// The main loop:
/// 1. Load configuration
/// 2. Initialize the snapshot source, store, and alert engine
/// 3. Write PID file, install shutdown handler
/// 4. Enter the poll-ingest-detect-report loop
async fn cmd_start(config_path: &Path) -> WatchResult<()> {
    info!("Strikewatch starting...");

    let config = if config_path.exists() {
        info!("Loading configuration from: {}", config_path.display());
        WatchConfig::from_file(config_path)?
    } else {
        info!("No config file found, using defaults. Run 'init-config' to generate one.");
        WatchConfig::default()
    };

    std::fs::create_dir_all(&config.general.data_dir)?;

    let pid_path = config.general.data_dir.join("strikewatch.pid");
    write_pid_file(&pid_path)?;
    info!("PID file written to: {}", pid_path.display());

    // Graceful shutdown: flag observed at the top of each cycle, so an
    // in-flight ingest/detect pass always completes.
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!("Could not install signal handler: {}. Use kill to stop.", e);
    }

    let mut source = DirectorySource::new(&config.general.watch_dir);
    let mut store = SnapshotStore::new();
    let mut engine = AlertEngine::new(&config.alerts);
    info!(
        "Watching {} (peak interval {}s, off-peak {}s)",
        config.general.watch_dir.display(),
        config.general.peak_interval_secs,
        config.general.off_peak_interval_secs,
    );

    let mut cycles: u64 = 0;
    let mut total_alerts: u64 = 0;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            info!("Shutdown signal received. Stopping gracefully...");
            break;
        }

        // Discover and process every new dump, oldest first. A bad dump
        // is logged and skipped; the loop never dies over one file.
        match source.poll_new() {
            Ok(discovered) => {
                for dump in discovered {
                    let name = dump.name;
                    if let Err(e) = store.ingest(&name, dump.file) {
                        error!("Ingest of {} failed: {}", name, e);
                        continue;
                    }
                    info!(
                        "Ingested {} ({} snapshots retained)",
                        name,
                        store.snapshot_count()
                    );

                    let current = match store.latest() {
                        Some(s) => s,
                        None => continue,
                    };
                    let alerts = engine.process(current, store.previous());
                    total_alerts += alerts.len() as u64;

                    for alert in &alerts {
                        if let Err(e) = alerter::log_alert(&config.output.alert_log_path, alert) {
                            error!("Failed to write alert {}: {}", alert.id, e);
                        }
                        if let Some(url) = &config.output.webhook_url {
                            if alerter::webhook_worthy(alert) {
                                if let Err(e) = alerter::send_webhook(url, alert) {
                                    warn!("Webhook delivery failed: {}", e);
                                }
                            }
                        }
                    }

                    if !alerts.is_empty() {
                        info!("{} raised {} alerts", name, alerts.len());
                    }
                }
            }
            Err(e) => {
                error!("Snapshot discovery failed: {}", e);
            }
        }

        cycles += 1;

        // The interval depends on the time of day, so derive it fresh
        // each cycle.
        let interval = interval_for_hour(&config.general, chrono::Utc::now().hour());
        tokio::time::sleep(interval).await;
    }

    if let Err(e) = std::fs::remove_file(&pid_path) {
        warn!("Could not remove PID file: {}", e);
    }

    info!(
        "Strikewatch stopped. {} cycles, {} snapshots, {} alerts.",
        cycles,
        store.snapshot_count(),
        total_alerts,
    );

    Ok(())
}

/// Show the current status of the running daemon.
async fn cmd_status(config_path: &Path) -> WatchResult<()> {
    let config = if config_path.exists() {
        WatchConfig::from_file(config_path)?
    } else {
        WatchConfig::default()
    };

    let pid_path = config.general.data_dir.join("strikewatch.pid");

    match read_pid_file(&pid_path) {
        Some(pid) => {
            if is_process_running(pid) {
                println!("Strikewatch is RUNNING (PID: {})", pid);
            } else {
                println!(
                    "Strikewatch is NOT RUNNING (stale PID file, PID {} not found)",
                    pid
                );
                println!(
                    "  The daemon may have crashed. Remove {} to clear.",
                    pid_path.display()
                );
            }
        }
        None => {
            println!("Strikewatch is NOT RUNNING (no PID file)");
        }
    }

    if config.general.data_dir.exists() {
        println!("Data directory: {}", config.general.data_dir.display());

        if config.output.alert_log_path.exists() {
            let metadata = std::fs::metadata(&config.output.alert_log_path)?;
            let lines = std::fs::read_to_string(&config.output.alert_log_path)
                .map(|c| c.lines().count())
                .unwrap_or(0);
            println!(
                "Alert log: {} ({} alerts, {} bytes)",
                config.output.alert_log_path.display(),
                lines,
                metadata.len()
            );
        } else {
            println!("Alert log: not found (no alerts raised yet)");
        }
    } else {
        println!("No data directory found. Run 'strikewatch start' first.");
    }

    println!();
    println!("Configuration:");
    println!("  Watch directory: {}", config.general.watch_dir.display());
    println!(
        "  Poll interval: {}s peak / {}s off-peak",
        config.general.peak_interval_secs, config.general.off_peak_interval_secs
    );
    println!("  Peak hours (UTC): {:?}", config.general.peak_hours);
    println!(
        "  High-risk TLDs: {}",
        config.alerts.high_risk_tlds.join(", ")
    );
    if let Some(url) = &config.output.webhook_url {
        println!("  Webhook: {}", url);
    }

    Ok(())
}

/// Stop the running daemon.
async fn cmd_stop(config_path: &Path) -> WatchResult<()> {
    let config = if config_path.exists() {
        WatchConfig::from_file(config_path)?
    } else {
        WatchConfig::default()
    };

    let pid_path = config.general.data_dir.join("strikewatch.pid");

    match read_pid_file(&pid_path) {
        Some(pid) => {
            if !is_process_running(pid) {
                println!("Process {} is not running (stale PID file). Cleaning up.", pid);
                let _ = std::fs::remove_file(&pid_path);
                return Ok(());
            }

            println!("Sending stop signal to Strikewatch (PID: {})...", pid);

            #[cfg(unix)]
            {
                use std::process::Command;
                let status = Command::new("kill")
                    .args(["-TERM", &pid.to_string()])
                    .status();
                match status {
                    Ok(s) if s.success() => {
                        println!("Stop signal sent. Daemon should shut down gracefully.");
                    }
                    Ok(s) => {
                        println!("Kill command exited with: {}. You may need to stop it manually.", s);
                    }
                    Err(e) => {
                        println!("Failed to send signal: {}. Try: kill {} manually.", e, pid);
                    }
                }
            }

            #[cfg(windows)]
            {
                use std::process::Command;
                let status = Command::new("taskkill")
                    .args(["/PID", &pid.to_string()])
                    .status();
                match status {
                    Ok(s) if s.success() => {
                        println!("Stop signal sent. Daemon should shut down gracefully.");
                    }
                    Ok(s) => {
                        println!("taskkill exited with: {}. You may need to stop it manually.", s);
                    }
                    Err(e) => {
                        println!("Failed to send signal: {}. Try: taskkill /PID {} manually.", e, pid);
                    }
                }
            }
        }
        None => {
            println!("No PID file found at {}. Is the daemon running?", pid_path.display());
        }
    }

    Ok(())
}

/// Generate a default configuration file.
fn cmd_init_config(config_path: &Path) -> WatchResult<()> {
    if config_path.exists() {
        return Err(WatchError::Config(format!(
            "Configuration file already exists: {}. Remove it first or use a different path.",
            config_path.display()
        )));
    }

    WatchConfig::write_default(config_path)?;
    println!("Default configuration written to: {}", config_path.display());
    println!();
    println!("Key settings to configure:");
    println!("  [general]    - watch_dir must point at the snapshot dump directory");
    println!("  [general]    - peak_hours / intervals tune the polling cadence");
    println!("  [alerts]     - volume thresholds and the high-risk TLD list");
    println!("  [output]     - alert log path and optional webhook URL");

    Ok(())
}

// ---------------------------------------------------------------------------
// PID file management
// ---------------------------------------------------------------------------

/// Write the current process PID to a file.
fn write_pid_file(path: &Path) -> WatchResult<()> {
    let pid = std::process::id();
    std::fs::write(path, pid.to_string())?;
    Ok(())
}

/// Read a PID from a PID file. Returns None if file doesn't exist or is invalid.
fn read_pid_file(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()?
        .trim()
        .parse::<u32>()
        .ok()
}

/// Check if a process with the given PID is still running.
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use std::process::Command;
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    {
        use std::process::Command;
        let output = Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH"])
            .output();
        match output {
            Ok(out) => {
                let stdout = String::from_utf8_lossy(&out.stdout);
                !stdout.contains("No tasks") && stdout.contains(&pid.to_string())
            }
            Err(_) => false,
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        false
    }
}
