//! Integration tests for fault isolation between plugins.
//!
//! A plugin that hangs, panics or keeps failing must not delay or disturb
//! delivery to any other plugin, and must never take the host down.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::{Harness, test_config, wait_until};
use hotbridge_core::{FaultKind, HotplugEvent};
use hotbridge_kernel::PluginState;
use hotbridge_plugin::{HookKind, HookResult, HostContext, PluginHooks, StandardRuntimes};
use hotbridge_test::{RecordingHooks, SCANNER_PRODUCT, SCANNER_VENDOR, attach, manifest_json};

const SLOW: &str = "slow-scanner";
const FAST: &str = "fast-scanner";

#[tokio::test]
async fn deadline_breach_is_isolated_to_the_slow_plugin() {
    let slow = RecordingHooks::slow(Duration::from_secs(30));
    let fast = RecordingHooks::new();
    let harness = Harness::start(&[(SLOW, slow.clone()), (FAST, fast.clone())]).await;
    let slow_id = harness
        .install(&manifest_json(SLOW, &["0x04A9"], &[]))
        .await;
    harness
        .install(&manifest_json(FAST, &["0x04A9"], &[]))
        .await;

    let started = Instant::now();
    harness
        .host
        .publisher()
        .publish(attach(SCANNER_VENDOR, SCANNER_PRODUCT))
        .await
        .unwrap();
    wait_until(Duration::from_secs(5), || fast.events().len() == 1).await;
    let latency = started.elapsed();
    assert!(
        latency < Duration::from_millis(300),
        "fast plugin waited {latency:?} behind the slow one"
    );

    // The slow plugin is charged with a sandbox fault and degrades.
    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.host.plugin_state(&slow_id).await != PluginState::Degraded {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    let report = harness.host.health().await;
    let health = report.plugin(&slow_id).unwrap();
    assert_eq!(health.last_error.as_ref().unwrap().kind, FaultKind::SandboxFault);
    assert!(health.sandbox.as_ref().unwrap().deadline_breaches >= 1);
    assert!(slow.events().is_empty());
    assert!(!report.healthy);

    // Unaffected plugins keep receiving events.
    harness
        .host
        .publisher()
        .publish(attach(SCANNER_VENDOR, SCANNER_PRODUCT))
        .await
        .unwrap();
    wait_until(Duration::from_secs(5), || fast.events().len() == 2).await;
    harness.shutdown().await;
}

/// A plugin whose device hooks panic.
struct Panicking;

#[async_trait]
impl PluginHooks for Panicking {
    async fn on_usb_attach(&self, _event: &HotplugEvent, _host: &HostContext) -> HookResult {
        panic!("driver exploded");
    }
}

#[tokio::test]
async fn panicking_plugin_does_not_affect_the_host() {
    let fast = RecordingHooks::new();
    let runtimes = StandardRuntimes::new()
        .with_builtin("panicky", Arc::new(Panicking))
        .with_builtin(FAST, fast.clone());
    let harness = Harness::with_runtimes(test_config(), None, runtimes).await;
    let panicky = harness
        .install(&manifest_json("panicky", &["0x04A9"], &[]))
        .await;
    harness
        .install(&manifest_json(FAST, &["0x04A9"], &[]))
        .await;

    harness
        .host
        .publisher()
        .publish(attach(SCANNER_VENDOR, SCANNER_PRODUCT))
        .await
        .unwrap();
    wait_until(Duration::from_secs(5), || fast.events().len() == 1).await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.host.plugin_state(&panicky).await != PluginState::Degraded {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    let report = harness.host.health().await;
    let fault = report.plugin(&panicky).unwrap().last_error.clone().unwrap();
    assert_eq!(fault.kind, FaultKind::SandboxFault);
    assert!(fault.message.contains("driver exploded"), "{}", fault.message);
    assert_eq!(fast.count(HookKind::OnUsbAttach), 1);

    // The host still answers and stops cleanly.
    assert_eq!(harness.host.plugin_ids().len(), 2);
    harness.shutdown().await;
}
