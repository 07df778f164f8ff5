//! Raw PCI device records and the sources that produce them.

use std::sync::Arc;

use error_stack::Report;
use serde::Serialize;
use tracing::debug;

use crate::error::DeviceError;
use crate::sysfs::SysFs;

/// PCI base class of network controllers.
const NETWORK_CLASS_PREFIX: &str = "0x02";

/// One PCI function as reported by the host inventory. Read-only input to the
/// device model builder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawPciDevice {
    pub address: String,
    /// Vendor id, lowercase hex without `0x` (e.g. `8086`)
    pub vendor: String,
    /// Device id, lowercase hex without `0x` (e.g. `1521`)
    pub device: String,
    /// Full class code as written by the kernel (e.g. `0x020000`)
    pub class: String,
    pub driver: Option<String>,
    pub numa_node: Option<i64>,
    pub iommu_group: Option<String>,
    pub net_name: Option<String>,
}

impl RawPciDevice {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn is_network_device(&self) -> bool {
        self.class.starts_with(NETWORK_CLASS_PREFIX)
    }
}

/// Yields the current set of PCI devices on the node.
///
/// Must be idempotent: the resource manager calls it on every refresh.
pub trait InventorySource: Send + Sync {
    fn list_devices(&self) -> Result<Vec<RawPciDevice>, Report<DeviceError>>;
}

impl<T: InventorySource + ?Sized> InventorySource for Arc<T> {
    fn list_devices(&self) -> Result<Vec<RawPciDevice>, Report<DeviceError>> {
        (**self).list_devices()
    }
}

/// Inventory read straight from `<root>/sys/bus/pci/devices`, keeping only
/// network controllers.
#[derive(Debug, Clone)]
pub struct SysfsInventory {
    sysfs: SysFs,
}

impl SysfsInventory {
    pub fn new(sysfs: SysFs) -> Self {
        Self { sysfs }
    }

    /// Builds the record for one bus address. Missing attributes are left
    /// empty; a malformed driver entry is recorded as "no driver" here and
    /// rejected later by the builder.
    pub fn read_device(&self, address: &str) -> RawPciDevice {
        let hex_id = |attr: &str| {
            self.sysfs
                .read_attr(address, attr)
                .map(|v| v.trim_start_matches("0x").to_lowercase())
                .unwrap_or_default()
        };

        RawPciDevice {
            address: address.to_string(),
            vendor: hex_id("vendor"),
            device: hex_id("device"),
            class: self.sysfs.read_attr(address, "class").unwrap_or_default(),
            driver: self.sysfs.driver_name(address).ok().flatten(),
            numa_node: self.sysfs.numa_node(address),
            iommu_group: self.sysfs.iommu_group(address),
            net_name: self.sysfs.net_names(address).into_iter().next(),
        }
    }
}

impl InventorySource for SysfsInventory {
    fn list_devices(&self) -> Result<Vec<RawPciDevice>, Report<DeviceError>> {
        let devices: Vec<RawPciDevice> = self
            .sysfs
            .pci_addresses()?
            .iter()
            .map(|address| self.read_device(address))
            .filter(|device| {
                let keep = device.is_network_device();
                if !keep {
                    debug!(
                        address = %device.address,
                        class = %device.class,
                        "skipping non-network PCI device"
                    );
                }
                keep
            })
            .collect();

        debug!(count = devices.len(), "listed network PCI devices");
        Ok(devices)
    }
}

/// Fixed inventory, used for tests and one-shot tooling.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    devices: Vec<RawPciDevice>,
}

impl StaticInventory {
    pub fn new(devices: Vec<RawPciDevice>) -> Self {
        Self { devices }
    }
}

impl InventorySource for StaticInventory {
    fn list_devices(&self) -> Result<Vec<RawPciDevice>, Report<DeviceError>> {
        Ok(self.devices.clone())
    }
}
