//! Compiled device filters.

use std::collections::BTreeSet;

use hotbridge_core::{DeviceClass, DeviceDescriptor, ProductId, VendorId};

use crate::manifest::UsbPermission;

/// Pure predicate over device descriptors, compiled once from a manifest's
/// `usb` permission.
///
/// Each component list constrains one descriptor field; an empty list
/// accepts any value. A plugin that declared no `usb` permission gets a
/// filter that rejects every device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    rule: Option<Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    vendor_ids: BTreeSet<VendorId>,
    product_ids: BTreeSet<ProductId>,
    device_classes: BTreeSet<DeviceClass>,
}

impl DeviceFilter {
    /// Compile the filter for a (possibly absent) `usb` permission.
    #[must_use]
    pub fn compile(usb: Option<&UsbPermission>) -> Self {
        Self {
            rule: usb.map(|usb| Rule {
                vendor_ids: usb.vendor_ids.iter().copied().collect(),
                product_ids: usb.product_ids.iter().copied().collect(),
                device_classes: usb.device_classes.iter().copied().collect(),
            }),
        }
    }

    /// A filter that matches nothing.
    #[must_use]
    pub fn deny_all() -> Self {
        Self { rule: None }
    }

    /// A filter that matches every device.
    #[must_use]
    pub fn any_device() -> Self {
        Self::compile(Some(&UsbPermission::default()))
    }

    /// Whether no device can ever match.
    #[must_use]
    pub fn is_deny_all(&self) -> bool {
        self.rule.is_none()
    }

    /// Evaluate the filter.
    #[must_use]
    pub fn matches(&self, descriptor: &DeviceDescriptor) -> bool {
        let Some(rule) = &self.rule else {
            return false;
        };
        admits(&rule.vendor_ids, &descriptor.vendor_id())
            && admits(&rule.product_ids, &descriptor.product_id())
            && admits(&rule.device_classes, &descriptor.device_class())
    }
}

fn admits<T: Ord>(allowed: &BTreeSet<T>, value: &T) -> bool {
    allowed.is_empty() || allowed.contains(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotbridge_core::{BusLocation, DeviceAction};

    fn device(vid: u16, pid: u16, class: u8) -> DeviceDescriptor {
        DeviceDescriptor::new(
            DeviceAction::Attach,
            VendorId::new(vid),
            ProductId::new(pid),
            DeviceClass(class),
            BusLocation::parse("1-1").unwrap(),
        )
    }

    fn usb(vids: &[u16], pids: &[u16], classes: &[u8]) -> UsbPermission {
        UsbPermission {
            vendor_ids: vids.iter().copied().map(VendorId::new).collect(),
            product_ids: pids.iter().copied().map(ProductId::new).collect(),
            device_classes: classes.iter().copied().map(DeviceClass).collect(),
            ..UsbPermission::default()
        }
    }

    #[test]
    fn all_components_must_match() {
        let filter = DeviceFilter::compile(Some(&usb(&[0x04A9], &[0x220E], &[6])));
        assert!(filter.matches(&device(0x04A9, 0x220E, 6)));
        assert!(!filter.matches(&device(0x03F0, 0x220E, 6)));
        assert!(!filter.matches(&device(0x04A9, 0x0001, 6)));
        assert!(!filter.matches(&device(0x04A9, 0x220E, 8)));
    }

    #[test]
    fn empty_components_match_anything() {
        let filter = DeviceFilter::compile(Some(&usb(&[0x04A9], &[], &[])));
        assert!(filter.matches(&device(0x04A9, 0x1234, 8)));
        assert!(filter.matches(&device(0x04A9, 0x0000, 0)));
        assert!(!filter.matches(&device(0x03F0, 0x1234, 8)));
        assert!(DeviceFilter::any_device().matches(&device(1, 2, 3)));
    }

    #[test]
    fn absent_usb_permission_matches_nothing() {
        let filter = DeviceFilter::compile(None);
        assert!(filter.is_deny_all());
        assert!(!filter.matches(&device(0x04A9, 0x220E, 6)));
        assert_eq!(filter, DeviceFilter::deny_all());
    }

    #[test]
    fn exhaustive_small_domain() {
        // Every (filter, event) pair over a small domain agrees with the
        // component-wise definition.
        let vids = [0x0001_u16, 0x0002];
        let pids = [0x0010_u16, 0x0020];
        let classes = [6_u8, 8];
        let subsets: [&[usize]; 3] = [&[], &[0], &[0, 1]];
        for vs in subsets {
            for ps in subsets {
                for cs in subsets {
                    let v: Vec<u16> = vs.iter().map(|&i| vids[i]).collect();
                    let p: Vec<u16> = ps.iter().map(|&i| pids[i]).collect();
                    let c: Vec<u8> = cs.iter().map(|&i| classes[i]).collect();
                    let filter = DeviceFilter::compile(Some(&usb(&v, &p, &c)));
                    for &ev in &vids {
                        for &ep in &pids {
                            for &ec in &classes {
                                let expected = (v.is_empty() || v.contains(&ev))
                                    && (p.is_empty() || p.contains(&ep))
                                    && (c.is_empty() || c.contains(&ec));
                                assert_eq!(filter.matches(&device(ev, ep, ec)), expected);
                            }
                        }
                    }
                }
            }
        }
    }
}
