//! `hotbridged` - USB hotplug daemon.
//!
//! Watches sysfs for device attach and detach, persists every change to the
//! event log and delivers it to the sandboxed plugins whose manifests admit
//! the device. Runs until interrupted.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing::{info, warn};

use hotbridge_config::{Config, LoadOptions, LogBackend};
use hotbridge_events::{EventLog, FileEventLog, MemoryEventLog};
use hotbridge_kernel::{HostConfig, PluginHost, sysfs_config};
use hotbridge_monitor::SysfsSource;
use hotbridge_telemetry::{LogConfig, LogFormat};

/// Hotbridge daemon - USB hotplug routing to sandboxed plugins.
#[derive(Parser)]
#[command(name = "hotbridged")]
#[command(
    author,
    version,
    about = "Hotbridge daemon - routes USB hotplug events to sandboxed plugins"
)]
struct Args {
    /// Configuration file (replaces `~/.hotbridge/config.toml`).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Additional plugin directory. May be repeated.
    #[arg(long = "plugin-dir")]
    plugin_dirs: Vec<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    /// Print the final health report as JSON on shutdown.
    #[arg(long)]
    health_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let loaded = Config::load(&LoadOptions {
        explicit_path: args.config.clone(),
        ..LoadOptions::default()
    })
    .context("failed to load configuration")?;
    let config = loaded.config;

    init_logging(&config, &args);
    for file in &loaded.loaded_files {
        info!(file = %file, "loaded configuration");
    }

    let log = open_event_log(&config, &loaded.home_dir).await?;
    let host = PluginHost::builder()
        .config(HostConfig::from_config(&config))
        .event_log(log)
        .source(Box::new(SysfsSource::new(sysfs_config(&config))))
        .start()
        .await
        .context("failed to start plugin host")?;

    let mut dirs = config.orchestrator.resolve_plugin_dirs(&loaded.home_dir);
    dirs.extend(args.plugin_dirs);
    let loaded_ids = host.load_discovered(&dirs).await;
    let mut running = 0usize;
    for id in &loaded_ids {
        match host.start_plugin(id).await {
            Ok(()) => running = running.saturating_add(1),
            Err(e) => warn!(plugin_id = %id, error = %e, "plugin failed to start"),
        }
    }

    println!(
        "{}",
        format!(
            "hotbridged running ({running}/{} plugins started)",
            loaded_ids.len()
        )
        .cyan()
        .bold()
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
    println!("{}", "Shutting down...".yellow());

    let report = host.health().await;
    host.shutdown().await;

    if args.health_json {
        println!("{}", report.to_json()?);
    }
    if report.healthy {
        println!("{}", "hotbridged stopped".green());
    } else {
        println!("{}", "hotbridged stopped (unhealthy at shutdown)".red());
    }
    Ok(())
}

fn init_logging(config: &Config, args: &Args) {
    let level = if args.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let format = if args.json_logs {
        LogFormat::Json
    } else {
        config.logging.format.parse().unwrap_or(LogFormat::Compact)
    };
    let log_config = LogConfig::new(level)
        .with_format(format)
        .with_directives(config.logging.directives.iter().cloned());
    if let Err(e) = hotbridge_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }
}

async fn open_event_log(config: &Config, home: &std::path::Path) -> Result<Arc<dyn EventLog>> {
    let log: Arc<dyn EventLog> = match config.event_log.backend {
        LogBackend::Memory => {
            warn!("using in-memory event log, events are lost on exit");
            Arc::new(MemoryEventLog::new())
        },
        LogBackend::File => {
            let dir = config.event_log.resolve_directory(home);
            let log = FileEventLog::open(&dir)
                .await
                .with_context(|| format!("failed to open event log at {}", dir.display()))?;
            info!(directory = %dir.display(), "event log opened");
            Arc::new(log)
        },
    };
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeated_plugin_dirs() {
        let args = Args::parse_from([
            "hotbridged",
            "--plugin-dir",
            "/opt/a",
            "--plugin-dir",
            "/opt/b",
            "--json-logs",
        ]);
        assert_eq!(args.plugin_dirs, vec![PathBuf::from("/opt/a"), PathBuf::from("/opt/b")]);
        assert!(args.json_logs);
        assert!(args.config.is_none());
    }
}
