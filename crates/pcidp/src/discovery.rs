//! One discovery pass: inventory -> device models -> per-pool device sets.

use std::collections::HashSet;

use error_stack::Report;
use error_stack::ResultExt;
use serde_json::json;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::ResourceConfig;
use crate::error::DeviceError;
use crate::factory::ResourceFactory;
use crate::inventory::InventorySource;
use crate::netdevice::PciNetDevice;

/// Devices selected for one resource pool in a pass.
#[derive(Debug)]
pub struct DiscoveredPool {
    pub config: ResourceConfig,
    pub devices: Vec<PciNetDevice>,
}

impl DiscoveredPool {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "resourceName": self.config.full_name(),
            "devices": self.devices.iter().map(PciNetDevice::to_json).collect::<Vec<_>>(),
        })
    }
}

/// Runs one pass over the inventory for every pool in `configs`.
///
/// Pools claim devices in config order: a device taken by an earlier pool is
/// not offered to later ones. A device whose model cannot be built is logged
/// and skipped; only an inventory failure fails the pass.
pub fn discover(
    inventory: &dyn InventorySource,
    factory: &dyn ResourceFactory,
    configs: &[ResourceConfig],
) -> Result<Vec<DiscoveredPool>, Report<DeviceError>> {
    let raw_devices = inventory
        .list_devices()
        .attach_printable("discovery pass aborted")?;

    let mut claimed: HashSet<String> = HashSet::new();
    let mut failed: HashSet<String> = HashSet::new();
    let mut pools = Vec::with_capacity(configs.len());

    for config in configs {
        let mut devices = Vec::new();
        for raw in &raw_devices {
            if claimed.contains(&raw.address) || failed.contains(&raw.address) {
                continue;
            }
            let device = match PciNetDevice::new(raw, factory, config) {
                Ok(device) => device,
                Err(e) => {
                    warn!(address = %raw.address, error = ?e, "skipping device");
                    failed.insert(raw.address.clone());
                    continue;
                }
            };
            if !config.selector_obj.matches(&device) {
                continue;
            }
            debug!(
                pool = %config.resource_name,
                address = %device.address(),
                "device selected"
            );
            claimed.insert(raw.address.clone());
            devices.push(device);
        }

        info!(
            pool = %config.full_name(),
            devices = devices.len(),
            "discovered devices for resource pool"
        );
        pools.push(DiscoveredPool {
            config: config.clone(),
            devices,
        });
    }

    Ok(pools)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::config::NetDeviceSelectors;
    use crate::inventory::RawPciDevice;
    use crate::inventory::StaticInventory;
    use crate::mock::MockInfoProvider;
    use crate::mock::MockResourceFactory;

    fn raw(address: &str, vendor: &str, driver: Option<&str>) -> RawPciDevice {
        RawPciDevice {
            address: address.to_string(),
            vendor: vendor.to_string(),
            device: "154c".to_string(),
            class: "0x020000".to_string(),
            driver: driver.map(str::to_string),
            ..Default::default()
        }
    }

    fn pool(name: &str, vendors: &[&str]) -> ResourceConfig {
        ResourceConfig {
            resource_name: name.into(),
            resource_prefix: "intel.com".into(),
            selector_obj: NetDeviceSelectors {
                vendors: vendors.iter().map(|v| v.to_string()).collect(),
                ..Default::default()
            },
        }
    }

    fn factory(addresses: &[&str]) -> MockResourceFactory {
        addresses.iter().fold(MockResourceFactory::new(), |f, a| {
            f.with_info(a, MockInfoProvider::new(a))
        })
    }

    fn addresses(pool: &DiscoveredPool) -> Vec<&str> {
        pool.devices.iter().map(PciNetDevice::address).collect()
    }

    #[test]
    fn first_matching_pool_claims_device() {
        let inventory = StaticInventory::new(vec![
            raw("0000:00:00.1", "8086", Some("iavf")),
            raw("0000:00:00.2", "15b3", Some("mlx5_core")),
        ]);
        let factory = factory(&["0000:00:00.1", "0000:00:00.2"]);
        let configs = vec![pool("intel_only", &["8086"]), pool("everything", &[])];

        let pools = discover(&inventory, &factory, &configs).unwrap();

        assert_eq!(addresses(&pools[0]), vec!["0000:00:00.1"]);
        assert_eq!(addresses(&pools[1]), vec!["0000:00:00.2"]);
    }

    #[test_log::test]
    fn broken_devices_are_skipped() {
        let inventory = StaticInventory::new(vec![
            raw("0000:00:00.1", "8086", None),
            raw("0000:00:00.2", "8086", Some("iavf")),
            raw("0000:00:00.3", "8086", Some("vfio-pci")),
        ]);
        // .3 has no provider registered, so its construction fails
        let factory = factory(&["0000:00:00.1", "0000:00:00.2"]);
        let configs = vec![pool("first", &["8086"]), pool("second", &[])];

        let pools = discover(&inventory, &factory, &configs).unwrap();

        assert_eq!(addresses(&pools[0]), vec!["0000:00:00.2"]);
        assert!(pools[1].devices.is_empty());
        // failed devices are built once per pass, not once per pool
        assert_eq!(factory.info_calls().len(), 2);
    }

    #[test]
    fn pools_without_matches_are_still_reported() {
        let inventory = StaticInventory::new(vec![raw("0000:00:00.1", "8086", Some("iavf"))]);
        let factory = factory(&["0000:00:00.1"]);
        let pools = discover(&inventory, &factory, &[pool("mellanox", &["15b3"])]).unwrap();

        assert_eq!(pools.len(), 1);
        assert_eq!(
            pools[0].to_json(),
            json!({ "resourceName": "intel.com/mellanox", "devices": [] })
        );
    }
}
