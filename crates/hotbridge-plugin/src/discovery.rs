//! Plugin manifest discovery and loading.
//!
//! A plugin lives in its own directory containing either `plugin.json` or
//! `Plugin.toml`. TOML manifests are converted to the same document tree as
//! JSON ones and validated identically.

use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{ManifestError, ManifestResult};
use crate::validate::{ValidatedManifest, validate_manifest};

/// JSON manifest file name.
pub const JSON_MANIFEST: &str = "plugin.json";

/// TOML manifest file name.
pub const TOML_MANIFEST: &str = "Plugin.toml";

/// Manifests larger than this are rejected before parsing.
pub const MAX_MANIFEST_BYTES: u64 = 1024 * 1024;

/// A validated manifest and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedManifest {
    /// The manifest file.
    pub manifest_path: PathBuf,
    /// Directory entry paths are resolved against.
    pub plugin_dir: PathBuf,
    /// Validation result.
    pub validated: ValidatedManifest,
}

/// Find the manifest file for `path`, which may be the file itself or the
/// plugin directory.
///
/// # Errors
///
/// Returns [`ManifestError::NotFound`] if a directory has no manifest.
pub fn resolve_manifest_path(path: &Path) -> ManifestResult<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    [JSON_MANIFEST, TOML_MANIFEST]
        .into_iter()
        .map(|name| path.join(name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| ManifestError::NotFound(path.to_path_buf()))
}

/// Read, parse and validate the manifest at `path`.
///
/// # Errors
///
/// Returns an error if the file is missing, too large, malformed or fails
/// validation.
pub fn load_manifest(path: &Path) -> ManifestResult<LoadedManifest> {
    let manifest_path = resolve_manifest_path(path)?;
    let content = read_limited(&manifest_path)?;

    let is_toml = manifest_path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let doc: serde_json::Value = if is_toml {
        let value: toml::Value =
            toml::from_str(&content).map_err(|e| ManifestError::Parse {
                path: manifest_path.clone(),
                message: e.to_string(),
            })?;
        serde_json::to_value(value).map_err(|e| ManifestError::Parse {
            path: manifest_path.clone(),
            message: e.to_string(),
        })?
    } else {
        serde_json::from_str(&content).map_err(|e| ManifestError::Parse {
            path: manifest_path.clone(),
            message: e.to_string(),
        })?
    };

    let validated = validate_manifest(&doc).map_err(|errors| ManifestError::Invalid {
        path: manifest_path.clone(),
        errors,
    })?;

    let plugin_dir = manifest_path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    debug!(
        path = %manifest_path.display(),
        plugin_id = %validated.id(),
        "loaded plugin manifest"
    );
    Ok(LoadedManifest {
        manifest_path,
        plugin_dir,
        validated,
    })
}

fn read_limited(path: &Path) -> ManifestResult<String> {
    let io_err = |source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = std::fs::File::open(path).map_err(io_err)?;
    let size = file.metadata().map_err(io_err)?.len();
    if size > MAX_MANIFEST_BYTES {
        return Err(ManifestError::TooLarge {
            path: path.to_path_buf(),
            size,
            limit: MAX_MANIFEST_BYTES,
        });
    }
    let mut content = String::new();
    file.take(MAX_MANIFEST_BYTES)
        .read_to_string(&mut content)
        .map_err(io_err)?;
    Ok(content)
}

/// Scan directories for plugins.
///
/// Each immediate subdirectory holding a manifest is one plugin. Invalid
/// manifests are logged and skipped so one broken plugin does not hide the
/// others.
#[must_use]
pub fn discover_manifests(dirs: &[PathBuf]) -> Vec<LoadedManifest> {
    let mut found = Vec::new();
    for dir in dirs {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "cannot scan plugin directory");
                continue;
            },
        };
        let mut candidates: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        candidates.sort();

        for candidate in candidates {
            match load_manifest(&candidate) {
                Ok(loaded) => found.push(loaded),
                Err(ManifestError::NotFound(_)) => {},
                Err(e) => warn!(path = %candidate.display(), error = %e, "skipping plugin"),
            }
        }
    }
    info!(count = found.len(), "discovered plugin manifests");
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "name": "usb-scanner-plugin",
        "version": "1.0.0",
        "entry": "scanner.wasm",
        "permissions": {"usb": {"vendor_ids": ["0x04A9"]}},
        "hooks": {"onUSBAttach": true}
    }"#;

    const TOML: &str = r#"
name = "usb-logger"
version = "0.3.1"
entry = "builtin:logger"

[permissions.usb]
device_classes = [8]

[hooks]
onUSBAttach = true
onUSBDetach = "detached"
"#;

    #[test]
    fn loads_json_and_toml_from_directories() {
        let root = tempfile::tempdir().unwrap();
        let a = root.path().join("a");
        let b = root.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        std::fs::write(a.join(JSON_MANIFEST), JSON).unwrap();
        std::fs::write(b.join(TOML_MANIFEST), TOML).unwrap();

        let found = discover_manifests(&[root.path().to_path_buf()]);
        let names: Vec<&str> = found.iter().map(|m| m.validated.id().as_str()).collect();
        assert_eq!(names, vec!["usb-scanner-plugin", "usb-logger"]);
        assert_eq!(found[1].plugin_dir, b);
    }

    #[test]
    fn invalid_manifests_are_skipped_during_discovery() {
        let root = tempfile::tempdir().unwrap();
        let bad = root.path().join("bad");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join(JSON_MANIFEST), r#"{"name": "bad"}"#).unwrap();
        std::fs::create_dir_all(root.path().join("empty")).unwrap();

        assert!(discover_manifests(&[root.path().to_path_buf()]).is_empty());
        let err = load_manifest(&bad).unwrap_err();
        assert!(err.validation_errors().unwrap().has_path("permissions"));
    }

    #[test]
    fn oversized_manifest_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(JSON_MANIFEST);
        let padding = " ".repeat(usize::try_from(MAX_MANIFEST_BYTES).unwrap() + 1);
        std::fs::write(&path, padding).unwrap();
        assert!(matches!(
            load_manifest(&path),
            Err(ManifestError::TooLarge { .. })
        ));
    }

    #[test]
    fn missing_manifest_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_manifest(dir.path()),
            Err(ManifestError::NotFound(_))
        ));
    }
}
