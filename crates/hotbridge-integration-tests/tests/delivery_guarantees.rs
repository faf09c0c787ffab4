//! Integration tests for at-least-once delivery across host restarts.
//!
//! The file event log keeps per-plugin offsets, so a plugin loaded into a
//! fresh host resumes after the last event it acknowledged.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::{Harness, test_config, wait_until};
use hotbridge_events::{EventLog, EventPublisher, FileEventLog, PublisherConfig};
use hotbridge_test::{RecordingHooks, SCANNER_PRODUCT, SCANNER_VENDOR, attach, detach, scanner_manifest};

const PLUGIN: &str = "usb-scanner-plugin";

async fn open_log(dir: &std::path::Path) -> Arc<dyn EventLog> {
    Arc::new(FileEventLog::open(dir).await.unwrap())
}

fn sequences(hooks: &RecordingHooks) -> BTreeSet<u64> {
    hooks.events().iter().map(|e| e.sequence()).collect()
}

#[tokio::test]
async fn events_after_last_acknowledged_offset_are_redelivered_after_restart() {
    let state = tempfile::tempdir().unwrap();

    // First host consumes three events, then goes away.
    let first = RecordingHooks::new();
    let harness =
        Harness::build(test_config(), Some(open_log(state.path()).await), &[(PLUGIN, first.clone())])
            .await;
    harness.install(&scanner_manifest()).await;
    for _ in 0..3 {
        harness
            .host
            .publisher()
            .publish(attach(SCANNER_VENDOR, SCANNER_PRODUCT))
            .await
            .unwrap();
    }
    harness.drain().await;
    assert_eq!(sequences(&first), BTreeSet::from([1, 2, 3]));
    harness.shutdown().await;

    // Devices keep changing while no host is running.
    {
        let log = open_log(state.path()).await;
        let publisher = EventPublisher::new(log, PublisherConfig::default()).await.unwrap();
        publisher.publish(detach(SCANNER_VENDOR, SCANNER_PRODUCT)).await.unwrap();
        publisher.publish(attach(SCANNER_VENDOR, SCANNER_PRODUCT)).await.unwrap();
        assert!(publisher.flush().await);
    }

    // A new host picks up exactly where the plugin left off.
    let second = RecordingHooks::new();
    let harness =
        Harness::build(test_config(), Some(open_log(state.path()).await), &[(PLUGIN, second.clone())])
            .await;
    harness.install(&scanner_manifest()).await;
    wait_until(Duration::from_secs(5), || second.events().len() >= 2).await;
    harness.drain().await;

    let redelivered = sequences(&second);
    assert!(redelivered.contains(&4) && redelivered.contains(&5), "lost events: {redelivered:?}");
    assert!(redelivered.iter().all(|s| *s >= 4), "replayed acknowledged events: {redelivered:?}");
    harness.shutdown().await;
}

#[tokio::test]
async fn failed_delivery_is_redelivered_after_restart() {
    let hooks = RecordingHooks::failing(3);
    let mut config = test_config();
    config.router.retry.max_attempts = 1;
    let harness = Harness::build(config, None, &[(PLUGIN, hooks.clone())]).await;
    let id = harness.install(&scanner_manifest()).await;

    harness
        .host
        .publisher()
        .publish(attach(SCANNER_VENDOR, SCANNER_PRODUCT))
        .await
        .unwrap();

    // Fails until the route gives up and the plugin degrades.
    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.host.plugin_state(&id).await != hotbridge_kernel::PluginState::Degraded {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(hooks.events().is_empty());
    assert_eq!(harness.host.router().cursor(&id).await.unwrap(), Some(0));

    // Keep restarting until the remaining failures are used up.
    tokio::time::timeout(Duration::from_secs(5), async {
        while hooks.events().is_empty() {
            if harness.host.plugin_state(&id).await == hotbridge_kernel::PluginState::Degraded {
                harness.host.restart_plugin(&id).await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(hooks.events().len(), 1);
    assert_eq!(hooks.events()[0].sequence(), 1);
    harness.shutdown().await;
}
