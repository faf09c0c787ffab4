//! WASM runtime powered by Extism.
//!
//! The guest module gets no ambient capabilities: WASI is enabled without
//! preopened directories or allowed hosts, and the only way to touch the
//! host is the `hb_*` functions below, each gated by the plugin's
//! [`CapabilityGate`].
//!
//! | Host function | Arguments | Returns |
//! |---|---|---|
//! | `hb_log` | level, message | nothing |
//! | `hb_read_file` | path | file bytes |
//! | `hb_write_file` | path, bytes | nothing |
//! | `hb_queue_push` | queue name, JSON payload | nothing |

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use extism::{CancelHandle, CurrentPlugin, Error, Manifest, PluginBuilder, UserData, Val, Wasm};
use tracing::{debug, info};

use crate::capability::CapabilityGate;
use crate::error::{SandboxError, SandboxResult};
use crate::manifest::{HookKind, PluginId};
use crate::queue::QueueHub;
use crate::sandbox::runtime::{InterruptHandle, Invocation, PluginRuntime, RuntimeContext};

/// WASM page size.
const PAGE_BYTES: u64 = 64 * 1024;

/// Maximum path length accepted from a guest.
const MAX_PATH_LEN: u64 = 4 * 1024;

/// Maximum log message length accepted from a guest.
const MAX_LOG_MESSAGE_LEN: u64 = 64 * 1024;

/// Maximum file or queue payload accepted from a guest.
const MAX_PAYLOAD_LEN: u64 = 4 * 1024 * 1024;

/// State shared with host functions through [`UserData`].
struct HostState {
    plugin_id: PluginId,
    gate: Arc<CapabilityGate>,
    queues: QueueHub,
}

/// Runtime executing a WASM module.
pub struct WasmRuntime {
    plugin_id: PluginId,
    plugin: Arc<Mutex<extism::Plugin>>,
    cancel: CancelHandle,
}

impl WasmRuntime {
    /// Load and instantiate the module named by the manifest entry.
    ///
    /// Every declared hook must resolve to an export of the module.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Load`] if the module cannot be read or
    /// instantiated, or lacks a declared hook export.
    pub async fn load(ctx: &RuntimeContext) -> SandboxResult<Self> {
        let wasm_path = resolve_entry(&ctx.plugin_dir, &ctx.manifest.entry)?;
        let wasm_bytes = tokio::fs::read(&wasm_path).await.map_err(|e| {
            SandboxError::Load(format!("failed to read {}: {e}", wasm_path.display()))
        })?;

        let pages = u32::try_from(ctx.limits.memory_max_bytes / PAGE_BYTES).unwrap_or(u32::MAX);
        let timeout = ctx.limits.hook_timeout;
        let exports: Vec<String> = ctx
            .manifest
            .hooks
            .declared()
            .filter_map(|h| ctx.manifest.hooks.export(h).map(str::to_string))
            .collect();
        let state = HostState {
            plugin_id: ctx.plugin_id.clone(),
            gate: Arc::clone(&ctx.gate),
            queues: ctx.queues.clone(),
        };

        let plugin = tokio::task::spawn_blocking(move || {
            let manifest = Manifest::new([Wasm::data(wasm_bytes)])
                .with_timeout(timeout)
                .with_memory_max(pages);
            let builder = PluginBuilder::new(manifest).with_wasi(true);
            let builder = register_host_functions(builder, UserData::new(state));
            let plugin = builder
                .build()
                .map_err(|e| SandboxError::Load(format!("failed to build plugin: {e}")))?;
            if let Some(missing) = exports.iter().find(|e| !plugin.function_exists(e.as_str())) {
                return Err(SandboxError::Load(format!(
                    "declared hook export '{missing}' not found in module"
                )));
            }
            Ok(plugin)
        })
        .await
        .map_err(|e| SandboxError::Load(format!("plugin build task failed: {e}")))??;

        info!(plugin_id = %ctx.plugin_id, path = %wasm_path.display(), "loaded WASM plugin");
        let cancel = plugin.cancel_handle();
        Ok(Self {
            plugin_id: ctx.plugin_id.clone(),
            plugin: Arc::new(Mutex::new(plugin)),
            cancel,
        })
    }
}

fn resolve_entry(plugin_dir: &Path, entry: &str) -> SandboxResult<std::path::PathBuf> {
    let relative = Path::new(entry);
    if relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(SandboxError::Load(format!(
            "entry '{entry}' must be a path inside the plugin directory"
        )));
    }
    Ok(plugin_dir.join(relative))
}

#[async_trait]
impl PluginRuntime for WasmRuntime {
    fn kind(&self) -> &'static str {
        "wasm"
    }

    async fn call(
        &mut self,
        hook: HookKind,
        export: &str,
        input: Vec<u8>,
        invocation: &Invocation,
    ) -> SandboxResult<Vec<u8>> {
        let plugin = Arc::clone(&self.plugin);
        let export = export.to_string();
        // The guest runs on a blocking thread; stop it when the call is cancelled.
        let watcher = {
            let cancel = self.cancel.clone();
            let token = invocation.token().clone();
            tokio::spawn(async move {
                token.cancelled().await;
                let _ = cancel.cancel();
            })
        };
        let _watcher_guard = AbortOnDrop(watcher);
        let joined = tokio::task::spawn_blocking(move || {
            let mut guard = plugin.lock().map_err(|e| SandboxError::Crashed {
                hook,
                message: format!("plugin lock poisoned: {e}"),
            })?;
            guard
                .call::<&[u8], Vec<u8>>(&export, input.as_slice())
                .map_err(|e| SandboxError::HookFailed {
                    hook,
                    message: e.to_string(),
                })
        })
        .await;
        match joined {
            Ok(result) => result,
            Err(e) => Err(SandboxError::Crashed {
                hook,
                message: e.to_string(),
            }),
        }
    }

    fn interrupt_handle(&self) -> Option<InterruptHandle> {
        let cancel = self.cancel.clone();
        Some(InterruptHandle::new(move || {
            let _ = cancel.cancel();
        }))
    }

    async fn shutdown(&mut self) {
        debug!(plugin_id = %self.plugin_id, "releasing WASM instance");
    }
}

struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn register_host_functions(builder: PluginBuilder, user_data: UserData<HostState>) -> PluginBuilder {
    builder
        .with_function(
            "hb_log",
            [extism::PTR, extism::PTR],
            [],
            user_data.clone(),
            hb_log_impl,
        )
        .with_function(
            "hb_read_file",
            [extism::PTR],
            [extism::PTR],
            user_data.clone(),
            hb_read_file_impl,
        )
        .with_function(
            "hb_write_file",
            [extism::PTR, extism::PTR],
            [],
            user_data.clone(),
            hb_write_file_impl,
        )
        .with_function(
            "hb_queue_push",
            [extism::PTR, extism::PTR],
            [],
            user_data,
            hb_queue_push_impl,
        )
}

/// Read guest memory, refusing allocations above `limit`.
#[allow(clippy::cast_sign_loss)]
fn guest_bytes(plugin: &mut CurrentPlugin, val: &Val, limit: u64) -> Result<Vec<u8>, Error> {
    let ptr = match val {
        Val::I64(v) => *v as u64,
        Val::I32(v) => u64::from(*v as u32),
        _ => return Err(Error::msg("expected memory pointer value")),
    };
    let len = plugin.memory_length(ptr)?;
    if len > limit {
        return Err(Error::msg(format!(
            "guest value of {len} bytes exceeds limit of {limit} bytes"
        )));
    }
    #[allow(clippy::cast_possible_wrap)]
    let safe_val = Val::I64(ptr as i64);
    plugin.memory_get_val(&safe_val)
}

fn guest_string(plugin: &mut CurrentPlugin, val: &Val, limit: u64) -> Result<String, Error> {
    let bytes = guest_bytes(plugin, val, limit)?;
    String::from_utf8(bytes).map_err(|e| Error::msg(format!("guest string is not UTF-8: {e}")))
}

fn input<'a>(inputs: &'a [Val], index: usize) -> Result<&'a Val, Error> {
    inputs
        .get(index)
        .ok_or_else(|| Error::msg(format!("missing argument {index}")))
}

fn with_state<T>(
    user_data: &UserData<HostState>,
    f: impl FnOnce(&HostState) -> T,
) -> Result<T, Error> {
    let ud = user_data.get()?;
    let state = ud
        .lock()
        .map_err(|e| Error::msg(format!("host state lock poisoned: {e}")))?;
    Ok(f(&state))
}

#[allow(clippy::needless_pass_by_value)]
fn hb_log_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    _outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let level = guest_string(plugin, input(inputs, 0)?, 64)?;
    let message = guest_string(plugin, input(inputs, 1)?, MAX_LOG_MESSAGE_LEN)?;
    let plugin_id = with_state(&user_data, |s| s.plugin_id.clone())?;

    match level.to_ascii_lowercase().as_str() {
        "trace" => tracing::trace!(plugin_id = %plugin_id, "{message}"),
        "debug" => tracing::debug!(plugin_id = %plugin_id, "{message}"),
        "warn" | "warning" => tracing::warn!(plugin_id = %plugin_id, "{message}"),
        "error" | "err" => tracing::error!(plugin_id = %plugin_id, "{message}"),
        _ => tracing::info!(plugin_id = %plugin_id, "{message}"),
    }
    Ok(())
}

#[allow(clippy::needless_pass_by_value)]
fn hb_read_file_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let path = guest_string(plugin, input(inputs, 0)?, MAX_PATH_LEN)?;
    let resolved = with_state(&user_data, |s| s.gate.check_read(&path))?
        .map_err(|e| Error::msg(e.to_string()))?;

    let metadata = std::fs::metadata(&resolved)
        .map_err(|e| Error::msg(format!("stat {}: {e}", resolved.display())))?;
    if metadata.len() > MAX_PAYLOAD_LEN {
        return Err(Error::msg(format!(
            "file {} exceeds {MAX_PAYLOAD_LEN} bytes",
            resolved.display()
        )));
    }
    let data = std::fs::read(&resolved)
        .map_err(|e| Error::msg(format!("read {}: {e}", resolved.display())))?;

    let mem = plugin.memory_new(data)?;
    let out = outputs
        .get_mut(0)
        .ok_or_else(|| Error::msg("missing output slot"))?;
    *out = plugin.memory_to_val(mem);
    Ok(())
}

#[allow(clippy::needless_pass_by_value)]
fn hb_write_file_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    _outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let path = guest_string(plugin, input(inputs, 0)?, MAX_PATH_LEN)?;
    let data = guest_bytes(plugin, input(inputs, 1)?, MAX_PAYLOAD_LEN)?;
    let resolved = with_state(&user_data, |s| s.gate.check_write(&path))?
        .map_err(|e| Error::msg(e.to_string()))?;
    std::fs::write(&resolved, data)
        .map_err(|e| Error::msg(format!("write {}: {e}", resolved.display())))
}

#[allow(clippy::needless_pass_by_value)]
fn hb_queue_push_impl(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    _outputs: &mut [Val],
    user_data: UserData<HostState>,
) -> Result<(), Error> {
    let queue = guest_string(plugin, input(inputs, 0)?, MAX_PATH_LEN)?;
    let raw = guest_bytes(plugin, input(inputs, 1)?, MAX_PAYLOAD_LEN)?;
    let payload: serde_json::Value = serde_json::from_slice(&raw)
        .map_err(|e| Error::msg(format!("queue payload is not JSON: {e}")))?;
    with_state(&user_data, |s| {
        s.gate
            .check_queue(&queue)
            .map(|()| s.queues.push(&queue, &s.plugin_id, payload))
    })?
    .map(|_| ())
    .map_err(|e| Error::msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_must_stay_inside_plugin_dir() {
        let dir = Path::new("/plugins/scanner");
        assert_eq!(
            resolve_entry(dir, "scanner.wasm").unwrap(),
            dir.join("scanner.wasm")
        );
        assert!(resolve_entry(dir, "../other/evil.wasm").is_err());
        assert!(resolve_entry(dir, "/tmp/evil.wasm").is_err());
    }

    #[tokio::test]
    async fn missing_module_is_a_load_error() {
        use crate::manifest::{HookSet, Permissions, PluginManifest};
        use crate::sandbox::SandboxConfig;

        let dir = tempfile::tempdir().unwrap();
        let manifest = Arc::new(PluginManifest {
            name: PluginId::from_static("ghost"),
            version: semver::Version::new(0, 1, 0),
            entry: "ghost.wasm".into(),
            permissions: Permissions::default(),
            hooks: HookSet::new(),
        });
        let ctx = RuntimeContext::new(
            manifest,
            dir.path(),
            SandboxConfig::default(),
            QueueHub::default(),
        );
        let err = WasmRuntime::load(&ctx).await.err().unwrap();
        assert!(matches!(err, SandboxError::Load(_)));
    }
}
