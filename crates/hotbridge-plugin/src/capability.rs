//! Capability gate for plugin host calls.
//!
//! A plugin has no ambient authority: every file or queue operation it asks
//! the host to perform is checked against the grants in its manifest.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use crate::error::{SandboxError, SandboxResult};
use crate::manifest::{FsGrant, FsMode, Permissions, PluginId};

/// Enforces a plugin's declared filesystem and queue permissions.
#[derive(Debug)]
pub struct CapabilityGate {
    plugin_id: PluginId,
    grants: Vec<(PathBuf, FsMode)>,
    queues: BTreeSet<String>,
    denials: AtomicU64,
}

impl CapabilityGate {
    /// Build a gate from a plugin's permissions.
    #[must_use]
    pub fn new(plugin_id: PluginId, permissions: &Permissions) -> Self {
        let grants = permissions
            .filesystem
            .iter()
            .map(|FsGrant { path, mode }| (resolve_physical(path), *mode))
            .collect();
        Self {
            plugin_id,
            grants,
            queues: permissions.queue.iter().cloned().collect(),
            denials: AtomicU64::new(0),
        }
    }

    /// Plugin this gate belongs to.
    #[must_use]
    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }

    /// Check a read and return the resolved path to use.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::PermissionDenied`] if no grant allows reading
    /// the path.
    pub fn check_read(&self, requested: &str) -> SandboxResult<PathBuf> {
        self.check_path(requested, FsMode::allows_read, "read")
    }

    /// Check a write and return the resolved path to use.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::PermissionDenied`] if no grant allows writing
    /// the path.
    pub fn check_write(&self, requested: &str) -> SandboxResult<PathBuf> {
        self.check_path(requested, FsMode::allows_write, "write")
    }

    /// Check a push to a named queue.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::PermissionDenied`] if the queue is not declared.
    pub fn check_queue(&self, name: &str) -> SandboxResult<()> {
        if self.queues.contains(name) {
            Ok(())
        } else {
            Err(self.deny(format!("queue '{name}' not declared in manifest")))
        }
    }

    /// Denied requests so far.
    #[must_use]
    pub fn denials(&self) -> u64 {
        self.denials.load(Ordering::Relaxed)
    }

    fn check_path(
        &self,
        requested: &str,
        allows: fn(FsMode) -> bool,
        verb: &str,
    ) -> SandboxResult<PathBuf> {
        let path = Path::new(requested);
        if !path.is_absolute() || path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(self.deny(format!(
                "{verb} of '{requested}' rejected: path must be absolute without '..'"
            )));
        }
        let resolved = resolve_physical(path);
        let granted = self
            .grants
            .iter()
            .any(|(root, mode)| allows(*mode) && resolved.starts_with(root));
        if granted {
            Ok(resolved)
        } else {
            Err(self.deny(format!(
                "{verb} access to '{requested}' not declared in manifest"
            )))
        }
    }

    fn deny(&self, reason: String) -> SandboxError {
        self.denials.fetch_add(1, Ordering::Relaxed);
        warn!(plugin_id = %self.plugin_id, reason = %reason, "capability denied");
        SandboxError::PermissionDenied(reason)
    }
}

/// Canonicalize the longest existing ancestor of `path` and re-append the
/// components that do not exist yet, so symlinks cannot lead outside a grant.
fn resolve_physical(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut missing = Vec::new();
    loop {
        if std::fs::symlink_metadata(&existing).is_ok() {
            let mut resolved = std::fs::canonicalize(&existing).unwrap_or(existing);
            for comp in missing.into_iter().rev() {
                resolved.push(comp);
            }
            return resolved;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent.to_path_buf();
            },
            _ => return path.to_path_buf(),
        }
    }
}
