//! Mock plugin implementations for testing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hotbridge_core::HotplugEvent;
use hotbridge_plugin::{HookKind, HookResult, HostContext, PluginHooks};

/// One recorded hook call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Hook that ran.
    pub hook: HookKind,
    /// Event passed to a device hook.
    pub event: Option<HotplugEvent>,
}

/// Built-in plugin that records every hook call.
///
/// Device hooks can be slowed down or made to fail, which is how tests
/// simulate deadline breaches and delivery failures. Uses
/// `std::sync::Mutex` so assertions need no runtime.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    calls: Mutex<Vec<Invocation>>,
    device_delay: Option<Duration>,
    failures_left: AtomicU32,
    fail_on_load: bool,
    forward_to: Option<String>,
}

impl RecordingHooks {
    /// A plugin that accepts everything immediately.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A plugin whose device hooks sleep for `delay` before returning.
    #[must_use]
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            device_delay: Some(delay),
            ..Self::default()
        })
    }

    /// A plugin whose next `times` device hook calls fail.
    #[must_use]
    pub fn failing(times: u32) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicU32::new(times),
            ..Self::default()
        })
    }

    /// A plugin whose `onLoad` fails.
    #[must_use]
    pub fn failing_on_load() -> Arc<Self> {
        Arc::new(Self {
            fail_on_load: true,
            ..Self::default()
        })
    }

    /// A plugin that pushes every device event to `queue`.
    #[must_use]
    pub fn forwarding(queue: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            forward_to: Some(queue.into()),
            ..Self::default()
        })
    }

    /// Every call so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.lock().clone()
    }

    /// Number of calls to `hook`.
    #[must_use]
    pub fn count(&self, hook: HookKind) -> usize {
        self.lock().iter().filter(|c| c.hook == hook).count()
    }

    /// Events received by device hooks, in order.
    #[must_use]
    pub fn events(&self) -> Vec<HotplugEvent> {
        self.lock().iter().filter_map(|c| c.event.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Invocation>> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record(&self, hook: HookKind, event: Option<&HotplugEvent>) {
        self.lock().push(Invocation {
            hook,
            event: event.cloned(),
        });
    }

    async fn device_hook(
        &self,
        hook: HookKind,
        event: &HotplugEvent,
        host: &HostContext,
    ) -> HookResult {
        if let Some(delay) = self.device_delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(format!("{hook} rejected event {}", event.sequence()));
        }
        if let Some(queue) = &self.forward_to {
            let payload = serde_json::to_value(event).map_err(|e| e.to_string())?;
            host.push(queue, payload).map_err(|e| e.to_string())?;
        }
        self.record(hook, Some(event));
        Ok(())
    }
}

#[async_trait]
impl PluginHooks for RecordingHooks {
    async fn on_load(&self, _host: &HostContext) -> HookResult {
        if self.fail_on_load {
            return Err("initialization failed".to_string());
        }
        self.record(HookKind::OnLoad, None);
        Ok(())
    }

    async fn on_unload(&self, _host: &HostContext) -> HookResult {
        self.record(HookKind::OnUnload, None);
        Ok(())
    }

    async fn on_usb_attach(&self, event: &HotplugEvent, host: &HostContext) -> HookResult {
        self.device_hook(HookKind::OnUsbAttach, event, host).await
    }

    async fn on_usb_detach(&self, event: &HotplugEvent, host: &HostContext) -> HookResult {
        self.device_hook(HookKind::OnUsbDetach, event, host).await
    }
}
