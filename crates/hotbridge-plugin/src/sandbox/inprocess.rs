//! In-process runtime for trusted built-in plugins.
//!
//! Built-in plugins implement [`PluginHooks`] and run inside the host
//! process, but they still go through the sandbox task: payloads are
//! serialized, calls are serialized per plugin, deadlines apply, panics are
//! caught, and host access goes through the same [`CapabilityGate`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use hotbridge_core::HotplugEvent;
use tracing::debug;

use crate::capability::CapabilityGate;
use crate::error::{SandboxError, SandboxResult};
use crate::manifest::{HookKind, PluginId};
use crate::queue::QueueHub;
use crate::sandbox::HookPayload;
use crate::sandbox::runtime::{Invocation, PluginRuntime, RuntimeContext};

/// Result of a built-in hook. The error string is reported as a hook failure.
pub type HookResult = Result<(), String>;

/// The four hook slots of a built-in plugin. Unimplemented slots succeed.
#[async_trait]
pub trait PluginHooks: Send + Sync {
    /// Plugin is starting.
    async fn on_load(&self, _host: &HostContext) -> HookResult {
        Ok(())
    }

    /// Plugin is stopping.
    async fn on_unload(&self, _host: &HostContext) -> HookResult {
        Ok(())
    }

    /// A matching device was attached.
    async fn on_usb_attach(&self, _event: &HotplugEvent, _host: &HostContext) -> HookResult {
        Ok(())
    }

    /// A matching device was detached.
    async fn on_usb_detach(&self, _event: &HotplugEvent, _host: &HostContext) -> HookResult {
        Ok(())
    }

    /// Bytes held by the plugin, if it tracks them.
    fn memory_usage(&self) -> Option<u64> {
        None
    }
}

/// Host surface available to built-in hooks. Every call is checked against
/// the plugin's declared permissions.
///
/// Long-running hooks should watch [`HostContext::cancelled`]: it fires at
/// the call's deadline and when the sandbox is terminated.
#[derive(Debug, Clone)]
pub struct HostContext {
    gate: Arc<CapabilityGate>,
    queues: QueueHub,
    invocation: Invocation,
}

impl HostContext {
    /// Create a context for a plugin, not bound to any call.
    #[must_use]
    pub fn new(gate: Arc<CapabilityGate>, queues: QueueHub) -> Self {
        Self {
            gate,
            queues,
            invocation: Invocation::detached(),
        }
    }

    /// The same context bound to one call.
    #[must_use]
    pub fn for_invocation(&self, invocation: Invocation) -> Self {
        Self {
            gate: Arc::clone(&self.gate),
            queues: self.queues.clone(),
            invocation,
        }
    }

    /// Plugin this context belongs to.
    #[must_use]
    pub fn plugin_id(&self) -> &PluginId {
        self.gate.plugin_id()
    }

    /// Instant the current call must finish by.
    #[must_use]
    pub fn deadline(&self) -> Option<tokio::time::Instant> {
        self.invocation.deadline()
    }

    /// Whether the current call has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.invocation.is_cancelled()
    }

    /// Resolves once the current call is cancelled.
    pub async fn cancelled(&self) {
        self.invocation.cancelled().await;
    }

    /// Cancellation token of the current call, for handing to spawned work.
    #[must_use]
    pub fn cancellation_token(&self) -> tokio_util::sync::CancellationToken {
        self.invocation.token().clone()
    }

    /// Read a file under a declared path.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::PermissionDenied`] outside declared paths, or
    /// a hook failure if the read itself fails.
    pub async fn read_file(&self, path: impl AsRef<Path>) -> SandboxResult<Vec<u8>> {
        let requested = path.as_ref().to_string_lossy();
        let resolved = self.gate.check_read(&requested)?;
        tokio::fs::read(&resolved)
            .await
            .map_err(|e| SandboxError::Payload(format!("read {}: {e}", resolved.display())))
    }

    /// Write a file under a declared path.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::PermissionDenied`] outside declared paths.
    pub async fn write_file(&self, path: impl AsRef<Path>, data: &[u8]) -> SandboxResult<()> {
        let requested = path.as_ref().to_string_lossy();
        let resolved = self.gate.check_write(&requested)?;
        tokio::fs::write(&resolved, data)
            .await
            .map_err(|e| SandboxError::Payload(format!("write {}: {e}", resolved.display())))
    }

    /// Push a message to a declared queue. Returns the subscriber count.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::PermissionDenied`] for undeclared queues.
    pub fn push(&self, queue: &str, payload: serde_json::Value) -> SandboxResult<usize> {
        self.gate.check_queue(queue)?;
        Ok(self.queues.push(queue, self.gate.plugin_id(), payload))
    }
}

/// Runtime backed by a [`PluginHooks`] implementation.
pub struct InProcessRuntime {
    hooks: Arc<dyn PluginHooks>,
    host: HostContext,
}

impl InProcessRuntime {
    /// Wrap `hooks` for the plugin described by `ctx`.
    #[must_use]
    pub fn new(hooks: Arc<dyn PluginHooks>, ctx: &RuntimeContext) -> Self {
        Self {
            hooks,
            host: HostContext::new(Arc::clone(&ctx.gate), ctx.queues.clone()),
        }
    }
}

#[async_trait]
impl PluginRuntime for InProcessRuntime {
    fn kind(&self) -> &'static str {
        "in-process"
    }

    async fn call(
        &mut self,
        hook: HookKind,
        _export: &str,
        input: Vec<u8>,
        invocation: &Invocation,
    ) -> SandboxResult<Vec<u8>> {
        let host = self.host.for_invocation(invocation.clone());
        let payload: HookPayload =
            serde_json::from_slice(&input).map_err(|e| SandboxError::Payload(e.to_string()))?;
        let event = || {
            payload
                .event
                .as_ref()
                .ok_or_else(|| SandboxError::Payload(format!("{hook} payload has no event")))
        };

        let result = match hook {
            HookKind::OnLoad => self.hooks.on_load(&host).await,
            HookKind::OnUnload => self.hooks.on_unload(&host).await,
            HookKind::OnUsbAttach => self.hooks.on_usb_attach(event()?, &host).await,
            HookKind::OnUsbDetach => self.hooks.on_usb_detach(event()?, &host).await,
        };
        debug!(plugin_id = %host.plugin_id(), hook = %hook, ok = result.is_ok(), "built-in hook returned");
        result
            .map(|()| Vec::new())
            .map_err(|message| SandboxError::HookFailed { hook, message })
    }

    fn memory_usage(&self) -> Option<u64> {
        self.hooks.memory_usage()
    }
}
