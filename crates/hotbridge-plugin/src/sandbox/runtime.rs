//! Execution backends hosted inside a sandbox.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::capability::CapabilityGate;
use crate::error::SandboxResult;
use crate::manifest::{HookKind, PluginId, PluginManifest};
use crate::queue::QueueHub;
use crate::sandbox::SandboxConfig;

/// One loaded plugin entry point.
///
/// The sandbox task owns the runtime exclusively, so calls are never
/// concurrent. Input and output are serialized payloads; nothing else
/// crosses the boundary.
#[async_trait]
pub trait PluginRuntime: Send {
    /// Short backend name for logs.
    fn kind(&self) -> &'static str;

    /// Call `export` for `hook` with a JSON payload and return its raw result.
    ///
    /// The future may be dropped at any await point when the deadline
    /// passes. `invocation` is cancelled at the deadline and when the
    /// sandbox terminates, so work running outside the future can stop too.
    async fn call(
        &mut self,
        hook: HookKind,
        export: &str,
        input: Vec<u8>,
        invocation: &Invocation,
    ) -> SandboxResult<Vec<u8>>;

    /// Bytes currently held by the plugin, when the backend can tell.
    fn memory_usage(&self) -> Option<u64> {
        None
    }

    /// Handle that aborts a call running outside the async task, if any.
    fn interrupt_handle(&self) -> Option<InterruptHandle> {
        None
    }

    /// Release backend resources.
    async fn shutdown(&mut self) {}
}

/// Aborts an in-flight call from another thread.
#[derive(Clone)]
pub struct InterruptHandle(Arc<dyn Fn() + Send + Sync>);

impl InterruptHandle {
    /// Wrap an interrupt callback.
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Interrupt the running call. Harmless if nothing is running.
    pub fn interrupt(&self) {
        (self.0)();
    }
}

impl fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptHandle").finish_non_exhaustive()
    }
}

/// Cancellation and deadline of one hook call.
#[derive(Debug, Clone)]
pub struct Invocation {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Invocation {
    /// A call cancelled through `cancel` and due by `deadline`.
    #[must_use]
    pub fn new(cancel: CancellationToken, deadline: Instant) -> Self {
        Self {
            cancel,
            deadline: Some(deadline),
        }
    }

    /// A call due `timeout` from now.
    #[must_use]
    pub fn with_timeout(cancel: CancellationToken, timeout: std::time::Duration) -> Self {
        Self {
            cancel,
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// A call with no deadline that is only cancelled explicitly.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Instant the call must finish by.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. Zero once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Option<std::time::Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// The call's cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the call has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the call is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Cancel the call.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Everything a factory may use to build a runtime for one plugin.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    /// Plugin identity.
    pub plugin_id: PluginId,
    /// Validated manifest.
    pub manifest: Arc<PluginManifest>,
    /// Directory the entry reference is resolved against.
    pub plugin_dir: PathBuf,
    /// Resource limits.
    pub limits: SandboxConfig,
    /// The plugin's capability gate.
    pub gate: Arc<CapabilityGate>,
    /// Named queues reachable through the gate.
    pub queues: QueueHub,
}

impl RuntimeContext {
    /// Build a context, deriving the gate from the manifest permissions.
    #[must_use]
    pub fn new(
        manifest: Arc<PluginManifest>,
        plugin_dir: impl Into<PathBuf>,
        limits: SandboxConfig,
        queues: QueueHub,
    ) -> Self {
        let plugin_id = manifest.name.clone();
        let gate = Arc::new(CapabilityGate::new(plugin_id.clone(), &manifest.permissions));
        Self {
            plugin_id,
            manifest,
            plugin_dir: plugin_dir.into(),
            limits,
            gate,
            queues,
        }
    }
}

/// Builds runtimes from manifest entry references.
#[async_trait]
pub trait RuntimeFactory: Send + Sync + fmt::Debug {
    /// Load the entry point named by `ctx.manifest.entry`.
    async fn create(&self, ctx: &RuntimeContext) -> SandboxResult<Box<dyn PluginRuntime>>;
}
