//! Delivery targets and subscriptions.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use hotbridge_core::{Fault, HotplugEvent};
use hotbridge_plugin::{DeviceFilter, HookKind, HookSet, PluginId, SandboxHandle};

/// Where the router hands a matched event.
///
/// `deliver` resolves only once the plugin has acknowledged the event or
/// the attempt has failed.
#[async_trait]
pub trait DeliveryTarget: Send + Sync {
    /// Deliver one event and wait for the acknowledgment.
    async fn deliver(&self, event: &HotplugEvent) -> Result<(), Fault>;
}

#[async_trait]
impl DeliveryTarget for SandboxHandle {
    async fn deliver(&self, event: &HotplugEvent) -> Result<(), Fault> {
        SandboxHandle::deliver(self, event).await.map_err(|e| e.fault())
    }
}

/// Router-side association of a plugin with its filter and target.
#[derive(Clone)]
pub struct Subscription {
    plugin_id: PluginId,
    filter: DeviceFilter,
    hooks: HookSet,
    target: Arc<dyn DeliveryTarget>,
}

impl Subscription {
    /// Create a subscription.
    #[must_use]
    pub fn new(
        plugin_id: PluginId,
        filter: DeviceFilter,
        hooks: HookSet,
        target: Arc<dyn DeliveryTarget>,
    ) -> Self {
        Self {
            plugin_id,
            filter,
            hooks,
            target,
        }
    }

    /// Subscription for a running sandbox, using the sandbox's declared hooks.
    #[must_use]
    pub fn for_sandbox(sandbox: Arc<SandboxHandle>, filter: DeviceFilter) -> Self {
        let plugin_id = sandbox.plugin_id().clone();
        let hooks = sandbox.hooks().clone();
        Self::new(plugin_id, filter, hooks, sandbox)
    }

    /// Subscribed plugin.
    #[must_use]
    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }

    /// Whether the event should be delivered: the filter admits the device
    /// and the plugin declares the hook for its action.
    #[must_use]
    pub fn matches(&self, event: &HotplugEvent) -> bool {
        let descriptor = event.descriptor();
        self.hooks
            .declares(HookKind::for_action(descriptor.action()))
            && self.filter.matches(descriptor)
    }

    pub(crate) fn target(&self) -> &Arc<dyn DeliveryTarget> {
        &self.target
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("plugin_id", &self.plugin_id)
            .field("filter", &self.filter)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}
