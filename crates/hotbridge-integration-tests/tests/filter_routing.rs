//! Integration tests for manifest-driven event filtering.
//!
//! Events are published into the log and routed to plugins whose compiled
//! device filters decide what they receive.

mod common;

use std::time::Duration;

use common::{Harness, wait_until};
use hotbridge_core::{
    BusLocation, DeviceAction, DeviceClass, DeviceDescriptor, ProductId, VendorId,
};
use hotbridge_plugin::HookKind;
use hotbridge_test::{RecordingHooks, SCANNER_PRODUCT, SCANNER_VENDOR, attach, manifest_json};
use serde_json::json;

fn descriptor(vendor: u16, product: u16, class: DeviceClass, port: usize) -> DeviceDescriptor {
    DeviceDescriptor::new(
        DeviceAction::Attach,
        VendorId::new(vendor),
        ProductId::new(product),
        class,
        BusLocation::new(1, port.to_string()).unwrap(),
    )
}

/// Reference rule: every non-empty filter component must match.
fn admits(vendors: &[u16], products: &[u16], classes: &[u8], d: &DeviceDescriptor) -> bool {
    (vendors.is_empty() || vendors.contains(&d.vendor_id().value()))
        && (products.is_empty() || products.contains(&d.product_id().value()))
        && (classes.is_empty() || classes.contains(&d.device_class().0))
}

#[tokio::test]
async fn plugins_receive_exactly_the_events_their_filter_admits() {
    struct Case {
        name: &'static str,
        vendors: &'static [u16],
        products: &'static [u16],
        classes: &'static [u8],
    }
    let cases = [
        Case { name: "canon-any", vendors: &[0x04A9], products: &[], classes: &[] },
        Case { name: "canon-lide", vendors: &[0x04A9], products: &[0x220E], classes: &[] },
        Case { name: "hp-or-canon", vendors: &[0x03F0, 0x04A9], products: &[], classes: &[] },
        Case { name: "imaging", vendors: &[], products: &[], classes: &[0x06] },
        Case { name: "everything", vendors: &[], products: &[], classes: &[] },
    ];

    let hooks: Vec<_> = cases.iter().map(|_| RecordingHooks::new()).collect();
    let registered: Vec<_> = cases
        .iter()
        .zip(&hooks)
        .map(|(c, h)| (c.name, h.clone()))
        .collect();
    let harness = Harness::start(&registered).await;

    for case in &cases {
        let vendors: Vec<String> = case.vendors.iter().map(|v| format!("0x{v:04X}")).collect();
        let products: Vec<String> = case.products.iter().map(|p| format!("0x{p:04X}")).collect();
        let mut manifest = manifest_json(case.name, &[], &[]);
        manifest["permissions"]["usb"]["vendor_ids"] = json!(vendors);
        manifest["permissions"]["usb"]["product_ids"] = json!(products);
        manifest["permissions"]["usb"]["device_classes"] = json!(case.classes);
        harness.install(&manifest).await;
    }

    let mut published = Vec::new();
    let mut port = 0usize;
    for vendor in [0x04A9, 0x03F0, 0x046D] {
        for product in [0x220E, 0x1234] {
            for class in [DeviceClass::IMAGE, DeviceClass::MASS_STORAGE] {
                port = port.saturating_add(1);
                let d = descriptor(vendor, product, class, port);
                harness.host.publisher().publish(d.clone()).await.unwrap();
                published.push(d);
            }
        }
    }
    harness.drain().await;

    for (case, hooks) in cases.iter().zip(&hooks) {
        let received: Vec<_> = hooks
            .events()
            .iter()
            .map(|e| e.descriptor().bus_location().clone())
            .collect();
        let expected: Vec<_> = published
            .iter()
            .filter(|d| admits(case.vendors, case.products, case.classes, d))
            .map(|d| d.bus_location().clone())
            .collect();
        assert_eq!(received, expected, "plugin {} saw the wrong events", case.name);
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn vendor_filter_blocks_other_vendors() {
    let hooks = RecordingHooks::new();
    let harness = Harness::start(&[("canon-only", hooks.clone())]).await;
    harness
        .install(&manifest_json("canon-only", &["0x04A9"], &[]))
        .await;

    for _ in 0..5 {
        harness.host.publisher().publish(attach(0x03F0, 0x1234)).await.unwrap();
    }
    harness.drain().await;

    assert_eq!(hooks.count(HookKind::OnUsbAttach), 0);
    assert!(hooks.events().iter().all(|e| e.descriptor().vendor_id().value() != 0x03F0));
    harness.shutdown().await;
}

#[tokio::test]
async fn scanner_plugin_scenario() {
    let hooks = RecordingHooks::new();
    let harness = Harness::start(&[("usb-scanner-plugin", hooks.clone())]).await;
    let id = harness.install(&hotbridge_test::scanner_manifest()).await;
    assert_eq!(hooks.count(HookKind::OnLoad), 1);

    // Through the device monitor, as a real attach would arrive.
    assert!(harness.devices.notify(attach(SCANNER_VENDOR, SCANNER_PRODUCT)).await);
    wait_until(Duration::from_secs(5), || hooks.count(HookKind::OnUsbAttach) == 1).await;

    let event = &hooks.events()[0];
    assert_eq!(event.descriptor().vendor_id().value(), SCANNER_VENDOR);
    assert_eq!(event.descriptor().product_id().value(), SCANNER_PRODUCT);
    assert_eq!(event.descriptor().action(), DeviceAction::Attach);

    assert!(harness.devices.notify(attach(0x03F0, 0x1234)).await);
    wait_until(Duration::from_secs(5), || {
        harness.host.router().stats(&id).is_some_and(|s| s.observed == 2)
    })
    .await;

    assert_eq!(hooks.count(HookKind::OnUsbAttach), 1);
    let stats = harness.host.router().stats(&id).unwrap();
    assert_eq!(stats.matched, 1);
    assert_eq!(stats.delivered, 1);
    harness.shutdown().await;
}
