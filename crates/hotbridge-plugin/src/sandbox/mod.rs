//! Plugin sandbox manager.
//!
//! Each plugin runs behind its own sandbox task which exclusively owns the
//! plugin's [`PluginRuntime`]. Callers talk to it only through a
//! [`SandboxHandle`]:
//!
//! ```text
//! SandboxHandle::invoke ──mpsc──→ sandbox task ──→ runtime.call (deadline)
//!        ▲                               │
//!        └──────────── oneshot ──────────┘
//! ```
//!
//! The channel serializes invocations for one plugin while different
//! plugins run concurrently. Every call carries a deadline and an
//! [`Invocation`] whose token is a child of the sandbox's: it is cancelled
//! when the deadline passes or the sandbox terminates. Panics, traps,
//! deadline breaches and memory ceiling violations come back as
//! [`SandboxError`]s and never propagate into the host.

mod factory;
mod inprocess;
mod runtime;
mod wasm;

pub use factory::{BUILTIN_PREFIX, StandardRuntimes};
pub use inprocess::{HookResult, HostContext, InProcessRuntime, PluginHooks};
pub use runtime::{InterruptHandle, Invocation, PluginRuntime, RuntimeContext, RuntimeFactory};
pub use wasm::WasmRuntime;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use hotbridge_core::HotplugEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{SandboxError, SandboxResult};
use crate::filter::DeviceFilter;
use crate::manifest::{HookKind, HookSet, PluginId};

/// Resource limits applied to every sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Memory ceiling in bytes.
    pub memory_max_bytes: u64,
    /// Per-invocation deadline.
    pub hook_timeout: Duration,
    /// Time an in-flight hook gets to finish on termination.
    pub grace_period: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_max_bytes: 64 * 1024 * 1024,
            hook_timeout: Duration::from_secs(5),
            grace_period: Duration::from_secs(2),
        }
    }
}

/// Message sent into the sandbox for one hook call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookPayload {
    /// Hook being invoked.
    pub hook: HookKind,
    /// The event, for device hooks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<HotplugEvent>,
}

/// Result reported by a guest: empty output or `{"ok": true}` for success,
/// `{"error": "..."}` for failure.
#[derive(Debug, Deserialize)]
struct GuestResult {
    #[serde(default)]
    error: Option<String>,
}

/// How a sandbox ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The task finished within the grace period.
    Graceful,
    /// The task was aborted after the grace period.
    Forced,
    /// The sandbox had already stopped.
    AlreadyStopped,
}

/// Counters for one sandbox.
#[derive(Debug, Default)]
struct Counters {
    invocations: AtomicU64,
    faults: AtomicU64,
    deadline_breaches: AtomicU64,
    denied: AtomicU64,
}

/// Point-in-time sandbox counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxStats {
    /// Hook calls executed.
    pub invocations: u64,
    /// Calls that ended in a sandbox fault.
    pub faults: u64,
    /// Calls aborted at their deadline.
    pub deadline_breaches: u64,
    /// Calls refused at the boundary.
    pub denied: u64,
}

enum Command {
    Invoke {
        hook: HookKind,
        export: String,
        payload: Vec<u8>,
        reply: oneshot::Sender<SandboxResult<()>>,
    },
}

/// Handle to a running sandbox.
///
/// Only hooks declared in the manifest can be invoked, and device hooks
/// only for events the plugin's filter admits.
pub struct SandboxHandle {
    plugin_id: PluginId,
    runtime_kind: &'static str,
    hooks: HookSet,
    filter: DeviceFilter,
    config: SandboxConfig,
    tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    interrupt: Option<InterruptHandle>,
    counters: Arc<Counters>,
}

impl SandboxHandle {
    /// Load the plugin's entry point through `factory` and start its task.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Load`] if the runtime cannot be created.
    /// Nothing is left running in that case.
    pub async fn spawn(
        factory: &dyn RuntimeFactory,
        ctx: RuntimeContext,
        filter: DeviceFilter,
    ) -> SandboxResult<Self> {
        let runtime = factory.create(&ctx).await?;
        Ok(Self::start(runtime, &ctx, filter))
    }

    /// Start a sandbox task around an already created runtime.
    #[must_use]
    pub fn start(
        runtime: Box<dyn PluginRuntime>,
        ctx: &RuntimeContext,
        filter: DeviceFilter,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let counters = Arc::new(Counters::default());
        let interrupt = runtime.interrupt_handle();
        let runtime_kind = runtime.kind();

        let task = tokio::spawn(run_sandbox(
            runtime,
            rx,
            cancel.clone(),
            TaskContext {
                plugin_id: ctx.plugin_id.clone(),
                limits: ctx.limits,
                interrupt: interrupt.clone(),
                counters: Arc::clone(&counters),
            },
        ));
        info!(plugin_id = %ctx.plugin_id, runtime = runtime_kind, "sandbox started");

        Self {
            plugin_id: ctx.plugin_id.clone(),
            runtime_kind,
            hooks: ctx.manifest.hooks.clone(),
            filter,
            config: ctx.limits,
            tx,
            cancel,
            task: Mutex::new(Some(task)),
            interrupt,
            counters,
        }
    }

    /// Plugin this sandbox hosts.
    #[must_use]
    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }

    /// Backend name.
    #[must_use]
    pub fn runtime_kind(&self) -> &'static str {
        self.runtime_kind
    }

    /// Declared hooks.
    #[must_use]
    pub fn hooks(&self) -> &HookSet {
        &self.hooks
    }

    /// Whether the task is still accepting calls.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed() && !self.cancel.is_cancelled()
    }

    /// Invoke a lifecycle hook. Undeclared hooks succeed without running.
    ///
    /// # Errors
    ///
    /// Returns the sandbox error raised by the call.
    pub async fn invoke_lifecycle(&self, hook: HookKind) -> SandboxResult<()> {
        if hook.is_device_hook() {
            return Err(self.refuse(format!("{hook} requires an event")));
        }
        self.invoke(hook, None).await
    }

    /// Deliver a device event to the matching hook.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::PermissionDenied`] if the event falls outside
    /// the plugin's filter or the hook is not declared, otherwise the error
    /// raised by the call.
    pub async fn deliver(&self, event: &HotplugEvent) -> SandboxResult<()> {
        let hook = HookKind::for_action(event.descriptor().action());
        if !self.hooks.declares(hook) {
            return Err(self.refuse(format!("{hook} is not declared")));
        }
        if !self.filter.matches(event.descriptor()) {
            return Err(self.refuse(format!(
                "device {} is outside the declared usb permission",
                event.descriptor().key()
            )));
        }
        self.invoke(hook, Some(event.clone())).await
    }

    async fn invoke(&self, hook: HookKind, event: Option<HotplugEvent>) -> SandboxResult<()> {
        let Some(export) = self.hooks.export(hook) else {
            return Ok(());
        };
        let payload = serde_json::to_vec(&HookPayload { hook, event })
            .map_err(|e| SandboxError::Payload(e.to_string()))?;

        let (reply, response) = oneshot::channel();
        self.tx
            .send(Command::Invoke {
                hook,
                export: export.to_string(),
                payload,
                reply,
            })
            .await
            .map_err(|_| SandboxError::Terminated)?;
        response.await.map_err(|_| SandboxError::Terminated)?
    }

    fn refuse(&self, reason: String) -> SandboxError {
        self.counters.denied.fetch_add(1, Ordering::Relaxed);
        warn!(plugin_id = %self.plugin_id, reason = %reason, "hook call refused");
        SandboxError::PermissionDenied(reason)
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> SandboxStats {
        SandboxStats {
            invocations: self.counters.invocations.load(Ordering::Relaxed),
            faults: self.counters.faults.load(Ordering::Relaxed),
            deadline_breaches: self.counters.deadline_breaches.load(Ordering::Relaxed),
            denied: self.counters.denied.load(Ordering::Relaxed),
        }
    }

    /// Stop the sandbox: cancel the in-flight invocation, give its hook the
    /// grace period to finish, then abort the task. Resources are released
    /// and the channel is closed either way.
    pub async fn terminate(&self) -> Termination {
        self.cancel.cancel();
        let Some(mut task) = self.task.lock().await.take() else {
            return Termination::AlreadyStopped;
        };

        let outcome = if tokio::time::timeout(self.config.grace_period, &mut task)
            .await
            .is_ok()
        {
            Termination::Graceful
        } else {
            warn!(plugin_id = %self.plugin_id, "grace period elapsed, forcing sandbox termination");
            if let Some(interrupt) = &self.interrupt {
                interrupt.interrupt();
            }
            task.abort();
            let _ = task.await;
            Termination::Forced
        };
        info!(plugin_id = %self.plugin_id, outcome = ?outcome, "sandbox terminated");
        outcome
    }
}

impl std::fmt::Debug for SandboxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxHandle")
            .field("plugin_id", &self.plugin_id)
            .field("runtime", &self.runtime_kind)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Drop for SandboxHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct TaskContext {
    plugin_id: PluginId,
    limits: SandboxConfig,
    interrupt: Option<InterruptHandle>,
    counters: Arc<Counters>,
}

async fn run_sandbox(
    mut runtime: Box<dyn PluginRuntime>,
    mut rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    ctx: TaskContext,
) {
    loop {
        let command = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            command = rx.recv() => command,
        };
        let Some(Command::Invoke {
            hook,
            export,
            payload,
            reply,
        }) = command
        else {
            break;
        };

        ctx.counters.invocations.fetch_add(1, Ordering::Relaxed);
        let invocation = Invocation::with_timeout(cancel.child_token(), ctx.limits.hook_timeout);
        let result = execute(runtime.as_mut(), hook, &export, payload, &invocation, &ctx).await;
        invocation.cancel();
        if let Err(e) = &result {
            ctx.counters.faults.fetch_add(1, Ordering::Relaxed);
            warn!(plugin_id = %ctx.plugin_id, hook = %hook, error = %e, "hook faulted");
        }
        let _ = reply.send(result);
    }

    rx.close();
    while let Ok(Command::Invoke { reply, .. }) = rx.try_recv() {
        let _ = reply.send(Err(SandboxError::Terminated));
    }
    runtime.shutdown().await;
    debug!(plugin_id = %ctx.plugin_id, "sandbox task exited");
}

async fn execute(
    runtime: &mut dyn PluginRuntime,
    hook: HookKind,
    export: &str,
    payload: Vec<u8>,
    invocation: &Invocation,
    ctx: &TaskContext,
) -> SandboxResult<()> {
    let call = AssertUnwindSafe(runtime.call(hook, export, payload, invocation)).catch_unwind();
    let output = match tokio::time::timeout(ctx.limits.hook_timeout, call).await {
        Err(_) => {
            invocation.cancel();
            ctx.counters.deadline_breaches.fetch_add(1, Ordering::Relaxed);
            if let Some(interrupt) = &ctx.interrupt {
                interrupt.interrupt();
            }
            return Err(SandboxError::DeadlineExceeded {
                hook,
                deadline: ctx.limits.hook_timeout,
            });
        },
        Ok(Err(panic)) => {
            return Err(SandboxError::Crashed {
                hook,
                message: panic_message(panic.as_ref()),
            });
        },
        Ok(Ok(result)) => result?,
    };

    if let Some(used) = runtime.memory_usage()
        && used > ctx.limits.memory_max_bytes
    {
        return Err(SandboxError::MemoryExceeded {
            used,
            limit: ctx.limits.memory_max_bytes,
        });
    }

    decode_result(hook, &output)
}

fn decode_result(hook: HookKind, output: &[u8]) -> SandboxResult<()> {
    if output.iter().all(u8::is_ascii_whitespace) {
        return Ok(());
    }
    match serde_json::from_slice::<GuestResult>(output) {
        Ok(GuestResult {
            error: Some(message),
        }) => Err(SandboxError::HookFailed { hook, message }),
        Ok(_) => Ok(()),
        Err(e) => Err(SandboxError::HookFailed {
            hook,
            message: format!("unreadable hook result: {e}"),
        }),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "plugin panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Permissions, PluginManifest, UsbPermission};
    use crate::queue::QueueHub;
    use crate::sandbox::factory::StandardRuntimes;
    use crate::sandbox::inprocess::{HookResult, HostContext, PluginHooks};
    use async_trait::async_trait;
    use hotbridge_core::{
        BusLocation, DeviceAction, DeviceClass, DeviceDescriptor, ProductId, VendorId,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[derive(Default)]
    struct TestHooks {
        attaches: AtomicUsize,
        delay: Option<Duration>,
        panic_on_attach: bool,
        fail_on_load: bool,
        memory: Option<u64>,
        /// Watch the call's cancellation instead of sleeping blindly.
        cooperative: bool,
        saw_cancel: Arc<AtomicBool>,
        saw_deadline: std::sync::Mutex<Option<tokio::time::Instant>>,
    }

    #[async_trait]
    impl PluginHooks for TestHooks {
        async fn on_load(&self, _host: &HostContext) -> HookResult {
            if self.fail_on_load {
                return Err("init failed".into());
            }
            Ok(())
        }

        async fn on_usb_attach(&self, _event: &HotplugEvent, host: &HostContext) -> HookResult {
            if self.panic_on_attach {
                panic!("boom");
            }
            *self.saw_deadline.lock().unwrap() = host.deadline();
            if self.cooperative {
                let token = host.cancellation_token();
                let saw_cancel = Arc::clone(&self.saw_cancel);
                tokio::spawn(async move {
                    token.cancelled().await;
                    saw_cancel.store(true, Ordering::SeqCst);
                });
                tokio::select! {
                    () = host.cancelled() => return Err("cancelled".into()),
                    () = tokio::time::sleep(self.delay.unwrap_or_default()) => {},
                }
            } else if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.attaches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn memory_usage(&self) -> Option<u64> {
            self.memory
        }
    }

    fn manifest(hooks: HookSet) -> Arc<PluginManifest> {
        Arc::new(PluginManifest {
            name: PluginId::from_static("usb-scanner-plugin"),
            version: semver::Version::new(1, 0, 0),
            entry: "builtin:test".into(),
            permissions: Permissions {
                usb: Some(UsbPermission {
                    vendor_ids: vec![VendorId::new(0x04A9)],
                    ..UsbPermission::default()
                }),
                ..Permissions::default()
            },
            hooks,
        })
    }

    fn event(vid: u16, action: DeviceAction) -> HotplugEvent {
        HotplugEvent::new(
            1,
            DeviceDescriptor::new(
                action,
                VendorId::new(vid),
                ProductId::new(0x220E),
                DeviceClass::IMAGE,
                BusLocation::parse("1-1").unwrap(),
            ),
        )
    }

    async fn spawn(hooks: Arc<TestHooks>, limits: SandboxConfig) -> SandboxHandle {
        let factory = StandardRuntimes::new().with_builtin("test", hooks);
        let manifest = manifest(
            HookSet::new()
                .with_default(HookKind::OnLoad)
                .with_default(HookKind::OnUsbAttach),
        );
        let filter = DeviceFilter::compile(manifest.permissions.usb.as_ref());
        let ctx = RuntimeContext::new(manifest, "/nonexistent", limits, QueueHub::default());
        SandboxHandle::spawn(&factory, ctx, filter).await.unwrap()
    }

    fn limits(timeout_ms: u64) -> SandboxConfig {
        SandboxConfig {
            memory_max_bytes: 1024,
            hook_timeout: Duration::from_millis(timeout_ms),
            grace_period: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn delivers_matching_event() {
        let hooks = Arc::new(TestHooks::default());
        let sandbox = spawn(hooks.clone(), limits(1000)).await;
        sandbox.invoke_lifecycle(HookKind::OnLoad).await.unwrap();
        sandbox
            .deliver(&event(0x04A9, DeviceAction::Attach))
            .await
            .unwrap();
        assert_eq!(hooks.attaches.load(Ordering::SeqCst), 1);
        assert_eq!(sandbox.stats().invocations, 2);
    }

    #[tokio::test]
    async fn refuses_events_outside_filter_or_undeclared() {
        let hooks = Arc::new(TestHooks::default());
        let sandbox = spawn(hooks.clone(), limits(1000)).await;

        let err = sandbox
            .deliver(&event(0x03F0, DeviceAction::Attach))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::PermissionDenied(_)));
        let err = sandbox
            .deliver(&event(0x04A9, DeviceAction::Detach))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::PermissionDenied(_)));

        assert_eq!(hooks.attaches.load(Ordering::SeqCst), 0);
        assert_eq!(sandbox.stats().denied, 2);
        assert_eq!(sandbox.stats().invocations, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_breach_is_a_sandbox_fault() {
        let hooks = Arc::new(TestHooks {
            delay: Some(Duration::from_secs(10)),
            ..TestHooks::default()
        });
        let sandbox = spawn(hooks.clone(), limits(50)).await;
        let err = sandbox
            .deliver(&event(0x04A9, DeviceAction::Attach))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::DeadlineExceeded { .. }));
        assert_eq!(err.kind(), hotbridge_core::FaultKind::SandboxFault);
        assert_eq!(sandbox.stats().deadline_breaches, 1);
        assert_eq!(hooks.attaches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_work_spawned_by_the_hook() {
        let hooks = Arc::new(TestHooks {
            delay: Some(Duration::from_secs(10)),
            cooperative: true,
            ..TestHooks::default()
        });
        let started = tokio::time::Instant::now();
        let sandbox = spawn(hooks.clone(), limits(50)).await;
        let err = sandbox
            .deliver(&event(0x04A9, DeviceAction::Attach))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::DeadlineExceeded { .. }));

        let deadline = (*hooks.saw_deadline.lock().unwrap()).expect("deadline is set");
        assert!(deadline > started);
        assert!(deadline <= tokio::time::Instant::now());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(hooks.saw_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_cancels_in_flight_hook() {
        let hooks = Arc::new(TestHooks {
            delay: Some(Duration::from_secs(3)),
            cooperative: true,
            ..TestHooks::default()
        });
        let sandbox = Arc::new(spawn(hooks.clone(), limits(10_000)).await);
        let in_flight = {
            let sandbox = Arc::clone(&sandbox);
            tokio::spawn(async move { sandbox.deliver(&event(0x04A9, DeviceAction::Attach)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!hooks.saw_cancel.load(Ordering::SeqCst));

        // The hook returns as soon as it sees the cancellation, well inside the grace period.
        assert_eq!(sandbox.terminate().await, Termination::Graceful);
        assert_eq!(
            in_flight.await.unwrap(),
            Err(SandboxError::HookFailed {
                hook: HookKind::OnUsbAttach,
                message: "cancelled".into()
            })
        );
        tokio::task::yield_now().await;
        assert!(hooks.saw_cancel.load(Ordering::SeqCst));
        assert_eq!(hooks.attaches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panics_are_contained() {
        let hooks = Arc::new(TestHooks {
            panic_on_attach: true,
            ..TestHooks::default()
        });
        let sandbox = spawn(hooks, limits(1000)).await;
        let err = sandbox
            .deliver(&event(0x04A9, DeviceAction::Attach))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Crashed { ref message, .. } if message == "boom"));
        // Still serving afterwards.
        sandbox.invoke_lifecycle(HookKind::OnLoad).await.unwrap();
    }

    #[tokio::test]
    async fn memory_ceiling_is_enforced() {
        let hooks = Arc::new(TestHooks {
            memory: Some(4096),
            ..TestHooks::default()
        });
        let sandbox = spawn(hooks, limits(1000)).await;
        let err = sandbox.invoke_lifecycle(HookKind::OnLoad).await.unwrap_err();
        assert!(matches!(
            err,
            SandboxError::MemoryExceeded {
                used: 4096,
                limit: 1024
            }
        ));
    }

    #[tokio::test]
    async fn hook_errors_are_reported() {
        let hooks = Arc::new(TestHooks {
            fail_on_load: true,
            ..TestHooks::default()
        });
        let sandbox = spawn(hooks, limits(1000)).await;
        let err = sandbox.invoke_lifecycle(HookKind::OnLoad).await.unwrap_err();
        assert_eq!(
            err,
            SandboxError::HookFailed {
                hook: HookKind::OnLoad,
                message: "init failed".into()
            }
        );
    }

    #[tokio::test]
    async fn undeclared_lifecycle_hook_is_a_no_op() {
        let hooks = Arc::new(TestHooks::default());
        let sandbox = spawn(hooks, limits(1000)).await;
        sandbox.invoke_lifecycle(HookKind::OnUnload).await.unwrap();
        assert_eq!(sandbox.stats().invocations, 0);
    }

    #[tokio::test]
    async fn terminate_is_graceful_when_idle_and_closes_channel() {
        let hooks = Arc::new(TestHooks::default());
        let sandbox = spawn(hooks, limits(1000)).await;
        assert_eq!(sandbox.terminate().await, Termination::Graceful);
        assert!(!sandbox.is_running());
        assert_eq!(
            sandbox.invoke_lifecycle(HookKind::OnLoad).await.unwrap_err(),
            SandboxError::Terminated
        );
        assert_eq!(sandbox.terminate().await, Termination::AlreadyStopped);
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_forces_stuck_hook_after_grace_period() {
        let hooks = Arc::new(TestHooks {
            delay: Some(Duration::from_secs(3)),
            ..TestHooks::default()
        });
        let sandbox = Arc::new(spawn(hooks, limits(10_000)).await);
        let in_flight = {
            let sandbox = Arc::clone(&sandbox);
            tokio::spawn(async move { sandbox.deliver(&event(0x04A9, DeviceAction::Attach)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(sandbox.terminate().await, Termination::Forced);
        assert_eq!(in_flight.await.unwrap(), Err(SandboxError::Terminated));
    }

    #[test]
    fn guest_results_are_decoded() {
        assert!(decode_result(HookKind::OnLoad, b"").is_ok());
        assert!(decode_result(HookKind::OnLoad, br#"{"ok":true}"#).is_ok());
        assert!(matches!(
            decode_result(HookKind::OnLoad, br#"{"error":"bad"}"#),
            Err(SandboxError::HookFailed { ref message, .. }) if message == "bad"
        ));
        assert!(decode_result(HookKind::OnLoad, b"garbage").is_err());
    }

    #[test]
    fn payload_shape() {
        let payload = HookPayload {
            hook: HookKind::OnUsbAttach,
            event: Some(event(0x04A9, DeviceAction::Attach)),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["hook"], "onUSBAttach");
        assert_eq!(json["event"]["vendor_id"], "0x04A9");
        assert_eq!(json["event"]["action"], "attach");

        let lifecycle = serde_json::to_value(HookPayload {
            hook: HookKind::OnLoad,
            event: None,
        })
        .unwrap();
        assert!(lifecycle.get("event").is_none());
    }
}
