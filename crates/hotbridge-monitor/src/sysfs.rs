//! Linux sysfs hotplug source.
//!
//! Device descriptors come from `/sys/bus/usb/devices/<bus>-<ports>/`
//! attribute files. Changes are detected by diffing snapshots of that
//! directory. A `notify` watcher on `/dev/bus/usb` triggers an immediate
//! rescan when device nodes appear or vanish; a periodic rescan covers
//! hosts where the watcher is unavailable.
//!
//! ```text
//! notify (devnode root) ─┐
//!                        ├─→ rescan sysfs → diff against known → descriptors
//! rescan interval ───────┘
//! ```

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use hotbridge_core::{
    BusLocation, DeviceAction, DeviceClass, DeviceDescriptor, ProductId, VendorId,
};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::error::{MonitorError, MonitorResult};
use crate::source::HotplugSource;

/// Settings for [`SysfsSource`].
#[derive(Debug, Clone)]
pub struct SysfsConfig {
    /// Directory with one entry per USB device.
    pub sysfs_root: PathBuf,
    /// Directory watched for device node changes.
    pub devnode_root: PathBuf,
    /// Fallback rescan period.
    pub rescan_interval: Duration,
}

impl Default for SysfsConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/bus/usb/devices"),
            devnode_root: PathBuf::from("/dev/bus/usb"),
            rescan_interval: Duration::from_secs(2),
        }
    }
}

/// Hotplug source reading the Linux sysfs USB tree.
///
/// Devices already present when the source opens form the baseline and
/// produce no notifications.
pub struct SysfsSource {
    config: SysfsConfig,
    known: HashMap<String, DeviceDescriptor>,
    queued: VecDeque<DeviceDescriptor>,
    /// Kept alive for the lifetime of the source; dropping it stops watching.
    watcher: Option<RecommendedWatcher>,
    raw_rx: Option<mpsc::UnboundedReceiver<notify::Result<Event>>>,
}

impl SysfsSource {
    /// Create an unopened source.
    #[must_use]
    pub fn new(config: SysfsConfig) -> Self {
        Self {
            config,
            known: HashMap::new(),
            queued: VecDeque::new(),
            watcher: None,
            raw_rx: None,
        }
    }

    fn start_watcher(&mut self) {
        let root = &self.config.devnode_root;
        if !root.exists() {
            debug!(path = %root.display(), "devnode root missing, polling only");
            return;
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        );
        let mut watcher = match watcher {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, "failed to create devnode watcher, polling only");
                return;
            },
        };
        match watcher.watch(root, RecursiveMode::Recursive) {
            Ok(()) => {
                info!(path = %root.display(), "watching device nodes");
                self.watcher = Some(watcher);
                self.raw_rx = Some(raw_rx);
            },
            Err(e) => warn!(
                path = %root.display(),
                error = %e,
                "failed to watch device nodes, polling only"
            ),
        }
    }

    /// Diff a fresh snapshot against the known set and queue the changes.
    async fn rescan(&mut self) -> MonitorResult<()> {
        let current = snapshot(self.config.sysfs_root.clone()).await?;

        let mut removed: Vec<&String> = self
            .known
            .keys()
            .filter(|name| !current.contains_key(*name))
            .collect();
        removed.sort();
        for name in removed {
            if let Some(old) = self.known.get(name) {
                self.queued.push_back(old.to_detached());
            }
        }

        let mut names: Vec<&String> = current.keys().collect();
        names.sort();
        for name in names {
            let Some(descriptor) = current.get(name) else {
                continue;
            };
            match self.known.get(name) {
                None => self.queued.push_back(descriptor.clone()),
                Some(old) if old.key() != descriptor.key() => {
                    // Same port, different device: swapped between scans.
                    self.queued.push_back(old.to_detached());
                    self.queued.push_back(descriptor.clone());
                },
                Some(_) => {},
            }
        }

        if !self.queued.is_empty() {
            debug!(changes = self.queued.len(), "sysfs rescan found changes");
        }
        self.known = current;
        Ok(())
    }

    async fn wait_for_trigger(&mut self) {
        let interval = self.config.rescan_interval;
        match self.raw_rx.as_mut() {
            Some(rx) => {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(Ok(ev)) => trace!(kind = ?ev.kind, "devnode change"),
                        Some(Err(e)) => warn!(error = %e, "devnode watcher error"),
                        None => {
                            debug!("devnode watcher closed, polling only");
                            self.raw_rx = None;
                            self.watcher = None;
                        },
                    },
                    () = tokio::time::sleep(interval) => {},
                }
            },
            None => tokio::time::sleep(interval).await,
        }
    }
}

#[async_trait]
impl HotplugSource for SysfsSource {
    fn name(&self) -> &str {
        "sysfs"
    }

    async fn open(&mut self) -> MonitorResult<()> {
        let root = self.config.sysfs_root.clone();
        if let Err(e) = std::fs::read_dir(&root) {
            return Err(match e.kind() {
                io::ErrorKind::PermissionDenied => MonitorError::PermissionDenied {
                    path: root,
                    source: e,
                },
                _ => MonitorError::Unavailable {
                    path: root,
                    source: e,
                },
            });
        }

        self.known = snapshot(root.clone()).await?;
        info!(
            path = %root.display(),
            devices = self.known.len(),
            "sysfs baseline captured"
        );
        self.start_watcher();
        Ok(())
    }

    async fn next(&mut self) -> MonitorResult<Option<DeviceDescriptor>> {
        loop {
            if let Some(descriptor) = self.queued.pop_front() {
                return Ok(Some(descriptor));
            }
            self.wait_for_trigger().await;
            self.rescan().await?;
        }
    }
}

/// Scan `root` on a blocking thread.
async fn snapshot(root: PathBuf) -> MonitorResult<HashMap<String, DeviceDescriptor>> {
    tokio::task::spawn_blocking(move || scan_devices(&root))
        .await
        .map_err(|e| MonitorError::Transient(format!("scan task failed: {e}")))?
}

/// Whether a sysfs entry name is a device (not an interface or root hub).
fn is_device_entry(name: &str) -> bool {
    !name.contains(':') && !name.starts_with("usb")
}

/// Read every device under `root`. Runs on a blocking thread.
fn scan_devices(root: &Path) -> MonitorResult<HashMap<String, DeviceDescriptor>> {
    let entries = std::fs::read_dir(root)
        .map_err(|e| MonitorError::Transient(format!("{}: {e}", root.display())))?;

    let mut devices = HashMap::new();
    for entry in entries {
        let entry = entry.map_err(|e| MonitorError::Transient(e.to_string()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_device_entry(&name) {
            continue;
        }
        match read_device(&entry.path(), &name) {
            Ok(Some(descriptor)) => {
                devices.insert(name, descriptor);
            },
            Ok(None) => {},
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Unplugged while being read.
                trace!(device = %name, "device vanished during scan");
            },
            Err(e) => {
                return Err(MonitorError::Transient(format!("{name}: {e}")));
            },
        }
    }
    Ok(devices)
}

/// Build an attach descriptor from one device directory.
///
/// Returns `Ok(None)` for entries that do not look like USB devices.
fn read_device(dir: &Path, name: &str) -> io::Result<Option<DeviceDescriptor>> {
    let Ok(location) = BusLocation::parse(name) else {
        return Ok(None);
    };
    let Some(vendor) = read_attr(dir, "idVendor")? else {
        return Ok(None);
    };
    let Some(product) = read_attr(dir, "idProduct")? else {
        return Ok(None);
    };
    let (Ok(vendor_id), Ok(product_id)) =
        (VendorId::parse_hex(&vendor), ProductId::parse_hex(&product))
    else {
        warn!(device = %name, %vendor, %product, "unparseable device ids");
        return Ok(None);
    };

    let class = read_attr(dir, "bDeviceClass")?
        .and_then(|raw| u8::from_str_radix(raw.trim(), 16).ok())
        .unwrap_or(0);

    let mut descriptor = DeviceDescriptor::new(
        DeviceAction::Attach,
        vendor_id,
        product_id,
        DeviceClass(class),
        location,
    );
    if let Some(serial) = read_attr(dir, "serial")?.filter(|s| !s.is_empty()) {
        descriptor = descriptor.with_serial(serial);
    }
    Ok(Some(descriptor))
}

/// Read a trimmed attribute file, `None` if it does not exist.
fn read_attr(dir: &Path, attr: &str) -> io::Result<Option<String>> {
    match std::fs::read_to_string(dir.join(attr)) {
        Ok(s) => Ok(Some(s.trim().to_string())),
        Err(e) if e.kind() == io::ErrorKind::NotFound && dir.exists() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_device(root: &Path, name: &str, vid: &str, pid: &str, class: &str, serial: Option<&str>) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("idVendor"), format!("{vid}\n")).unwrap();
        std::fs::write(dir.join("idProduct"), format!("{pid}\n")).unwrap();
        std::fs::write(dir.join("bDeviceClass"), format!("{class}\n")).unwrap();
        if let Some(s) = serial {
            std::fs::write(dir.join("serial"), format!("{s}\n")).unwrap();
        }
    }

    fn source(root: &Path) -> SysfsSource {
        SysfsSource::new(SysfsConfig {
            sysfs_root: root.to_path_buf(),
            devnode_root: root.join("no-devnodes"),
            rescan_interval: Duration::from_millis(10),
        })
    }

    #[test]
    fn entry_filter_skips_interfaces_and_root_hubs() {
        assert!(is_device_entry("1-1.2"));
        assert!(!is_device_entry("1-1.2:1.0"));
        assert!(!is_device_entry("usb1"));
    }

    #[test]
    fn reads_descriptor_attributes() {
        let dir = tempfile::tempdir().unwrap();
        add_device(dir.path(), "1-1.2", "04a9", "220e", "00", Some("SN42"));
        let devices = scan_devices(dir.path()).unwrap();
        let d = &devices["1-1.2"];
        assert_eq!(d.vendor_id(), VendorId::new(0x04A9));
        assert_eq!(d.product_id(), ProductId::new(0x220E));
        assert_eq!(d.serial_number(), Some("SN42"));
        assert_eq!(d.bus_location().bus(), 1);
    }

    #[tokio::test]
    async fn open_fails_for_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut src = source(&dir.path().join("absent"));
        assert!(matches!(
            src.open().await,
            Err(MonitorError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn diff_reports_attach_then_detach() {
        let dir = tempfile::tempdir().unwrap();
        add_device(dir.path(), "1-1", "1d6b", "0002", "09", None);
        std::fs::create_dir_all(dir.path().join("usb1")).unwrap();

        let mut src = source(dir.path());
        src.open().await.unwrap();
        assert_eq!(src.known.len(), 1);

        add_device(dir.path(), "1-1.2", "04a9", "220e", "00", None);
        let attach = src.next().await.unwrap().unwrap();
        assert_eq!(attach.action(), DeviceAction::Attach);
        assert_eq!(attach.bus_location().to_string(), "1-1.2");

        std::fs::remove_dir_all(dir.path().join("1-1.2")).unwrap();
        let detach = src.next().await.unwrap().unwrap();
        assert_eq!(detach.action(), DeviceAction::Detach);
        assert_eq!(detach.vendor_id(), VendorId::new(0x04A9));
    }
}
