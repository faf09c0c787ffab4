#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Configuration for the Hotbridge host.
//!
//! A single [`Config`] type covers the device monitor, publisher, event log,
//! router, sandbox limits, orchestrator and logging.
//!
//! # Usage
//!
//! ```rust,no_run
//! use hotbridge_config::{Config, LoadOptions};
//!
//! let loaded = Config::load(&LoadOptions::default()).unwrap();
//! println!("debounce: {:?}", loaded.config.monitor.debounce());
//! ```
//!
//! # Configuration Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Environment variables** (`HOTBRIDGE_*`)
//! 2. **Explicit file** (`--config`) or **user** (`~/.hotbridge/config.toml`)
//! 3. **System** (`/etc/hotbridge/config.toml`)
//! 4. **Embedded defaults** (`defaults.toml` compiled into binary)
//!
//! This crate has no dependencies on other internal hotbridge crates.
//! Conversion into component settings happens where the host is assembled.

/// Environment variable overrides.
pub mod env;
/// Configuration error types.
pub mod error;
/// Configuration file discovery and loading.
pub mod loader;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{LoadOptions, LoadedConfig};
pub use types::*;

impl Config {
    /// Load configuration with full precedence chain.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any config file is malformed or the final
    /// configuration fails validation.
    pub fn load(options: &LoadOptions) -> ConfigResult<LoadedConfig> {
        loader::load(options)
    }

    /// Load configuration from a single file (no layering).
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, parsed, or fails
    /// validation.
    pub fn load_file(path: &std::path::Path) -> ConfigResult<Self> {
        loader::load_file(path)
    }
}
