//! `HOTBRIDGE_*` environment overrides.
//!
//! Environment variables are the last layer applied before validation and
//! replace whatever the files set. Values are coerced to the type already
//! present at the target path in the merged tree.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
}

const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "HOTBRIDGE_DEBOUNCE_MS",
        field_path: "monitor.debounce_ms",
    },
    EnvMapping {
        var_name: "HOTBRIDGE_SYSFS_ROOT",
        field_path: "monitor.sysfs_root",
    },
    EnvMapping {
        var_name: "HOTBRIDGE_DEVNODE_ROOT",
        field_path: "monitor.devnode_root",
    },
    EnvMapping {
        var_name: "HOTBRIDGE_BUFFER_CAPACITY",
        field_path: "publisher.buffer_capacity",
    },
    EnvMapping {
        var_name: "HOTBRIDGE_LOG_BACKEND",
        field_path: "event_log.backend",
    },
    EnvMapping {
        var_name: "HOTBRIDGE_LOG_DIR",
        field_path: "event_log.directory",
    },
    EnvMapping {
        var_name: "HOTBRIDGE_MAX_RETRIES",
        field_path: "router.max_retries",
    },
    EnvMapping {
        var_name: "HOTBRIDGE_HOOK_TIMEOUT_MS",
        field_path: "sandbox.hook_timeout_ms",
    },
    EnvMapping {
        var_name: "HOTBRIDGE_MEMORY_MAX_MB",
        field_path: "sandbox.memory_max_mb",
    },
    EnvMapping {
        var_name: "HOTBRIDGE_QUARANTINE_THRESHOLD",
        field_path: "orchestrator.quarantine_threshold",
    },
    EnvMapping {
        var_name: "HOTBRIDGE_PLUGIN_DIRS",
        field_path: "orchestrator.plugin_dirs",
    },
    EnvMapping {
        var_name: "HOTBRIDGE_LOG_LEVEL",
        field_path: "logging.level",
    },
    EnvMapping {
        var_name: "HOTBRIDGE_LOG_FORMAT",
        field_path: "logging.format",
    },
];

/// Snapshot the process environment, keeping only `HOTBRIDGE_*` variables.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with("HOTBRIDGE_"))
        .collect()
}

/// Apply environment overrides to the merged tree.
///
/// Returns the number of variables applied.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] if a value cannot be coerced to the
/// type of the field it overrides.
pub fn apply_env_overrides<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<usize> {
    let mut count: usize = 0;
    for mapping in ENV_MAPPINGS {
        let Some(raw) = env_vars.get(mapping.var_name) else {
            continue;
        };
        debug!(
            var = mapping.var_name,
            field = mapping.field_path,
            "applying env var override"
        );
        set_field(merged, mapping.field_path, raw).map_err(|message| ConfigError::EnvError {
            var_name: mapping.var_name.to_owned(),
            message,
        })?;
        count = count.saturating_add(1);
    }
    Ok(count)
}

fn set_field(root: &mut toml::Value, path: &str, raw: &str) -> Result<(), String> {
    let (parent_path, leaf) = path.rsplit_once('.').unwrap_or(("", path));

    let mut current = root;
    for segment in parent_path.split('.').filter(|s| !s.is_empty()) {
        let table = current
            .as_table_mut()
            .ok_or_else(|| format!("'{segment}' is not a table"))?;
        current = table
            .entry(segment.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }

    let table = current
        .as_table_mut()
        .ok_or_else(|| format!("parent of '{leaf}' is not a table"))?;
    let value = coerce(table.get(leaf), raw)?;
    table.insert(leaf.to_owned(), value);
    Ok(())
}

/// Coerce `raw` to the shape of the existing value.
fn coerce(existing: Option<&toml::Value>, raw: &str) -> Result<toml::Value, String> {
    match existing {
        Some(toml::Value::Integer(_)) => raw
            .trim()
            .parse::<i64>()
            .map(toml::Value::Integer)
            .map_err(|e| format!("expected an integer: {e}")),
        Some(toml::Value::Boolean(_)) => raw
            .trim()
            .parse::<bool>()
            .map(toml::Value::Boolean)
            .map_err(|e| format!("expected true or false: {e}")),
        Some(toml::Value::Array(_)) => Ok(toml::Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| toml::Value::String(s.to_owned()))
                .collect(),
        )),
        _ => Ok(toml::Value::String(raw.to_owned())),
    }
}
