//! Config file discovery and layered loading.
//!
//! Implements the `Config::load()` algorithm:
//! 1. Parse `defaults.toml` → base
//! 2. Merge `/etc/hotbridge/config.toml` (system)
//! 3. Merge `~/.hotbridge/config.toml` (user), or an explicit file instead
//! 4. Apply `HOTBRIDGE_*` environment overrides
//! 5. Deserialize merged tree → `Config`
//! 6. Validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{apply_env_overrides, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// System-wide config location.
const SYSTEM_CONFIG_PATH: &str = "/etc/hotbridge/config.toml";

/// A validated configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The merged, validated configuration.
    pub config: Config,
    /// Files that contributed, in merge order.
    pub loaded_files: Vec<String>,
    /// Home directory used for `~` expansion and the user layer.
    pub home_dir: PathBuf,
}

/// Where to look for configuration files.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file. Replaces the user layer and must exist.
    pub explicit_path: Option<PathBuf>,
    /// Home directory override. The user layer is read from
    /// `{home}/.hotbridge/config.toml`.
    pub home_override: Option<PathBuf>,
    /// Skip the system layer (tests and sandboxes).
    pub skip_system: bool,
}

/// Load the configuration with layered precedence using the process
/// environment.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any config file is malformed, an environment
/// override cannot be applied, or the merged configuration fails validation.
pub fn load(options: &LoadOptions) -> ConfigResult<LoadedConfig> {
    load_with_env(options, &collect_env_vars())
}

/// Same as [`load`] with an explicit environment snapshot.
///
/// # Errors
///
/// See [`load`].
pub fn load_with_env<S: ::std::hash::BuildHasher>(
    options: &LoadOptions,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<LoadedConfig> {
    let home_dir = match &options.home_override {
        Some(h) => h.clone(),
        None => home_directory()?,
    };

    // 1. Embedded defaults.
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;
    let mut loaded_files = Vec::new();

    // 2. System config.
    if !options.skip_system {
        let system_path = PathBuf::from(SYSTEM_CONFIG_PATH);
        if let Some(overlay) = try_load_file(&system_path)? {
            deep_merge(&mut merged, &overlay);
            loaded_files.push(system_path.display().to_string());
            info!(path = %system_path.display(), "loaded system config");
        }
    }

    // 3. Explicit file, or the user config.
    if let Some(path) = &options.explicit_path {
        let overlay = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
            path: path.display().to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })?;
        deep_merge(&mut merged, &overlay);
        loaded_files.push(path.display().to_string());
        info!(path = %path.display(), "loaded explicit config");
    } else {
        let user_path = home_dir.join(".hotbridge").join("config.toml");
        if let Some(overlay) = try_load_file(&user_path)? {
            deep_merge(&mut merged, &overlay);
            loaded_files.push(user_path.display().to_string());
            info!(path = %user_path.display(), "loaded user config");
        }
    }

    // 4. Environment overrides.
    let env_count = apply_env_overrides(&mut merged, env_vars)?;
    if env_count > 0 {
        debug!(count = env_count, "applied environment variable overrides");
    }

    // 5. Deserialize.
    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    // 6. Validate.
    validate::validate(&config)?;

    Ok(LoadedConfig {
        config,
        loaded_files,
        home_dir,
    })
}

/// Load a config from a specific file path (no layering, no environment).
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed, or fails
/// validation.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let overlay = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
        path: path.display().to_string(),
        source: std::io::Error::from(std::io::ErrorKind::NotFound),
    })?;
    let config: Config = overlay
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            path: path.display().to_string(),
            source: e,
        })?;
    validate::validate(&config)?;
    Ok(config)
}

/// Recursively deep-merge `overlay` into `base`.
///
/// Tables merge per key; scalars and arrays from the overlay replace the
/// base value.
pub fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                if let Some(base_val) = base_table.get_mut(key) {
                    deep_merge(base_val, overlay_val);
                } else {
                    base_table.insert(key.clone(), overlay_val.clone());
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
        },
    }
}

/// Try to load a file, returning `None` if the file doesn't exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len(),
            ),
        });
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(value))
}

fn home_directory() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogBackend;

    fn isolated(home: &Path) -> LoadOptions {
        LoadOptions {
            explicit_path: None,
            home_override: Some(home.to_path_buf()),
            skip_system: true,
        }
    }

    #[test]
    fn test_defaults_deserialize_to_config() {
        let config: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_defaults_only() {
        let home = tempfile::tempdir().unwrap();
        let loaded = load_with_env(&isolated(home.path()), &HashMap::new()).unwrap();
        assert_eq!(loaded.config, Config::default());
        assert!(loaded.loaded_files.is_empty());
    }

    #[test]
    fn test_user_layer_then_env() {
        let home = tempfile::tempdir().unwrap();
        let dir = home.path().join(".hotbridge");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("config.toml"),
            "[monitor]\ndebounce_ms = 100\n[event_log]\nbackend = \"memory\"\n",
        )
        .unwrap();

        let env = HashMap::from([("HOTBRIDGE_DEBOUNCE_MS".to_owned(), "400".to_owned())]);
        let loaded = load_with_env(&isolated(home.path()), &env).unwrap();
        assert_eq!(loaded.config.monitor.debounce_ms, 400);
        assert_eq!(loaded.config.event_log.backend, LogBackend::Memory);
        assert_eq!(loaded.loaded_files.len(), 1);
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let home = tempfile::tempdir().unwrap();
        let options = LoadOptions {
            explicit_path: Some(home.path().join("missing.toml")),
            ..isolated(home.path())
        };
        let result = load_with_env(&options, &HashMap::new());
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_invalid_value_rejected_after_merge() {
        let home = tempfile::tempdir().unwrap();
        let path = home.path().join("hb.toml");
        std::fs::write(&path, "[router]\nbatch_size = 0\n").unwrap();
        let options = LoadOptions {
            explicit_path: Some(path),
            ..isolated(home.path())
        };
        let result = load_with_env(&options, &HashMap::new());
        assert!(matches!(
            result,
            Err(ConfigError::ValidationError { ref field, .. }) if field == "router.batch_size"
        ));
    }

    #[test]
    fn test_deep_merge_keeps_siblings() {
        let mut base: toml::Value = toml::from_str("[a]\nx = 1\ny = 2\n").unwrap();
        let overlay: toml::Value = toml::from_str("[a]\ny = 3\n").unwrap();
        deep_merge(&mut base, &overlay);
        assert_eq!(base["a"]["x"].as_integer(), Some(1));
        assert_eq!(base["a"]["y"].as_integer(), Some(3));
    }

    #[test]
    fn test_oversized_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("huge.toml");
        let data = "x = \"".to_owned() + &"a".repeat(1_100_000) + "\"";
        std::fs::write(&file_path, data).unwrap();

        let result = try_load_file(&file_path);
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }
}
