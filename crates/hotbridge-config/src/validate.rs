//! Post-merge configuration validation.
//!
//! Validates that deserialized [`Config`](crate::Config) values are within
//! acceptable ranges.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_monitor(config)?;
    validate_publisher(config)?;
    validate_router(config)?;
    validate_sandbox(config)?;
    validate_orchestrator(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

/// Longest debounce window accepted (one minute).
const MAX_DEBOUNCE_MS: u64 = 60_000;

fn validate_monitor(config: &Config) -> ConfigResult<()> {
    let m = &config.monitor;
    if m.debounce_ms > MAX_DEBOUNCE_MS {
        return Err(invalid(
            "monitor.debounce_ms",
            format!("debounce window must not exceed {MAX_DEBOUNCE_MS} ms"),
        ));
    }
    if m.sysfs_root.trim().is_empty() {
        return Err(invalid("monitor.sysfs_root", "must not be empty"));
    }
    if m.rescan_interval_ms == 0 {
        return Err(invalid("monitor.rescan_interval_ms", "must be greater than 0"));
    }
    if m.retry_initial_ms > m.retry_max_ms {
        return Err(invalid(
            "monitor.retry_initial_ms",
            format!(
                "retry_initial_ms ({}) must not exceed retry_max_ms ({})",
                m.retry_initial_ms, m.retry_max_ms
            ),
        ));
    }
    Ok(())
}

fn validate_publisher(config: &Config) -> ConfigResult<()> {
    let p = &config.publisher;
    if p.buffer_capacity == 0 {
        return Err(invalid("publisher.buffer_capacity", "must be greater than 0"));
    }
    if p.backoff_initial_ms == 0 {
        return Err(invalid("publisher.backoff_initial_ms", "must be greater than 0"));
    }
    if p.backoff_initial_ms > p.backoff_max_ms {
        return Err(invalid(
            "publisher.backoff_initial_ms",
            format!(
                "backoff_initial_ms ({}) must not exceed backoff_max_ms ({})",
                p.backoff_initial_ms, p.backoff_max_ms
            ),
        ));
    }
    Ok(())
}

fn validate_router(config: &Config) -> ConfigResult<()> {
    let r = &config.router;
    if r.batch_size == 0 {
        return Err(invalid("router.batch_size", "must be greater than 0"));
    }
    if r.retry_backoff_ms > r.retry_backoff_max_ms {
        return Err(invalid(
            "router.retry_backoff_ms",
            format!(
                "retry_backoff_ms ({}) must not exceed retry_backoff_max_ms ({})",
                r.retry_backoff_ms, r.retry_backoff_max_ms
            ),
        ));
    }
    Ok(())
}

/// Upper bound on the sandbox memory ceiling (4 GiB, the wasm32 limit).
const MAX_MEMORY_MB: u64 = 4096;

fn validate_sandbox(config: &Config) -> ConfigResult<()> {
    let s = &config.sandbox;
    if s.memory_max_mb == 0 || s.memory_max_mb > MAX_MEMORY_MB {
        return Err(invalid(
            "sandbox.memory_max_mb",
            format!("must be between 1 and {MAX_MEMORY_MB}"),
        ));
    }
    if s.hook_timeout_ms == 0 {
        return Err(invalid("sandbox.hook_timeout_ms", "must be greater than 0"));
    }
    Ok(())
}

fn validate_orchestrator(config: &Config) -> ConfigResult<()> {
    let o = &config.orchestrator;
    if o.health_interval_ms == 0 {
        return Err(invalid(
            "orchestrator.health_interval_ms",
            "must be greater than 0",
        ));
    }
    if o.quarantine_threshold == 0 {
        return Err(invalid(
            "orchestrator.quarantine_threshold",
            "must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;
    if !matches!(
        l.level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported level '{}'; expected one of: trace, debug, info, warn, error",
                l.level
            ),
        ));
    }
    if !matches!(l.format.as_str(), "pretty" | "compact" | "json" | "full") {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported format '{}'; expected one of: pretty, compact, json, full",
                l.format
            ),
        ));
    }
    Ok(())
}
