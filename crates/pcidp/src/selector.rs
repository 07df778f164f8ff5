//! Selector evaluation: does a device belong in a pool?
//!
//! Populated selector fields are ANDed; entries within one list are ORed.

use tracing::trace;

use crate::config::NetDeviceSelectors;
use crate::netdevice::PciNetDevice;

impl NetDeviceSelectors {
    pub fn matches(&self, device: &PciNetDevice) -> bool {
        matches(device, self)
    }

    /// True when no field restricts the selection.
    pub fn is_catch_all(&self) -> bool {
        self == &Self::default()
    }
}

pub fn matches(device: &PciNetDevice, selectors: &NetDeviceSelectors) -> bool {
    let checks = [
        ("vendors", any_id(&selectors.vendors, device.vendor())),
        ("devices", any_id(&selectors.devices, device.device_code())),
        ("drivers", any_exact(&selectors.drivers, device.driver())),
        ("pfNames", any_pf_name(&selectors.pf_names, device)),
        ("linkTypes", any_link_type(&selectors.link_types, device.link_type())),
        ("pciAddresses", any_exact(&selectors.pci_addresses, device.address())),
        ("isRdma", !selectors.is_rdma || device.rdma_spec().is_rdma()),
        ("needVhostNet", !selectors.need_vhost_net || device.has_vhost_net()),
    ];

    for (field, passed) in checks {
        if !passed {
            trace!(address = %device.address(), field, "device rejected by selector");
            return false;
        }
    }
    true
}

fn any_exact(allowed: &[String], value: &str) -> bool {
    allowed.is_empty() || allowed.iter().any(|a| a == value)
}

/// PCI ids compare case-insensitively and ignore a `0x` prefix.
fn any_id(allowed: &[String], value: &str) -> bool {
    let normalize = |s: &str| s.trim_start_matches("0x").to_ascii_lowercase();
    let value = normalize(value);
    allowed.is_empty() || allowed.iter().any(|a| normalize(a) == value)
}

fn any_link_type(allowed: &[String], value: &str) -> bool {
    allowed.is_empty() || allowed.iter().any(|a| a.eq_ignore_ascii_case(value))
}

fn any_pf_name(allowed: &[String], device: &PciNetDevice) -> bool {
    allowed.is_empty()
        || allowed
            .iter()
            .any(|entry| PfNameSelector::parse(entry).matches(device.pf_name(), device.vf_index()))
}

/// One `pfNames` entry: a bare PF name, or `<pf>#<first>-<last>` / `<pf>#<n>`
/// restricting the match to VFs in that index range.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PfNameSelector<'a> {
    pf_name: &'a str,
    vf_range: Option<(u32, u32)>,
}

impl<'a> PfNameSelector<'a> {
    fn parse(entry: &'a str) -> Self {
        let Some((pf_name, range)) = entry.split_once('#') else {
            return Self {
                pf_name: entry,
                vf_range: None,
            };
        };

        let bounds: Option<(u32, u32)> = match range.split_once('-') {
            Some((first, last)) => first.trim().parse().ok().zip(last.trim().parse().ok()),
            None => range.trim().parse().ok().map(|n| (n, n)),
        };
        // An unparseable range matches nothing rather than the whole PF.
        Self {
            pf_name,
            vf_range: Some(bounds.unwrap_or((1, 0))),
        }
    }

    fn matches(&self, pf_name: &str, vf_index: Option<u32>) -> bool {
        if pf_name.is_empty() || pf_name != self.pf_name {
            return false;
        }
        match (self.vf_range, vf_index) {
            (None, _) => true,
            (Some((first, last)), Some(index)) => (first..=last).contains(&index),
            (Some(_), None) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::symlink;

    use tempfile::TempDir;

    use super::*;
    use crate::api::DeviceSpec;
    use crate::config::ResourceConfig;
    use crate::factory::DefaultResourceFactory;
    use crate::inventory::RawPciDevice;
    use crate::mock::MockInfoProvider;
    use crate::mock::MockRdmaSpec;
    use crate::mock::MockResourceFactory;
    use crate::sysfs::SysFs;

    fn device(vendor: &str, device_code: &str, driver: &str, rdma: bool) -> PciNetDevice {
        let address = "0000:00:00.1";
        let rdma_spec = if rdma {
            MockRdmaSpec::rdma(vec![DeviceSpec::same_path("/dev/infiniband/uverbs0", "rwm")])
        } else {
            MockRdmaSpec::not_rdma()
        };
        let factory = MockResourceFactory::new()
            .with_info(address, MockInfoProvider::new(address))
            .with_rdma(address, rdma_spec);
        let raw = RawPciDevice {
            address: address.to_string(),
            vendor: vendor.to_string(),
            device: device_code.to_string(),
            class: "0x020000".to_string(),
            driver: Some(driver.to_string()),
            ..Default::default()
        };
        PciNetDevice::new(&raw, &factory, &ResourceConfig::default()).unwrap()
    }

    #[test]
    fn empty_selector_matches_everything() {
        let selectors = NetDeviceSelectors::default();
        assert!(selectors.is_catch_all());
        assert!(selectors.matches(&device("8086", "154c", "iavf", false)));
        assert!(selectors.matches(&device("15b3", "1018", "mlx5_core", true)));
    }

    #[test]
    fn lists_are_ored_and_fields_anded() {
        let selectors = NetDeviceSelectors {
            vendors: vec!["8086".into(), "15b3".into()],
            drivers: vec!["iavf".into()],
            ..Default::default()
        };
        assert!(selectors.matches(&device("8086", "154c", "iavf", false)));
        assert!(selectors.matches(&device("15b3", "1018", "iavf", false)));
        assert!(!selectors.matches(&device("15b3", "1018", "mlx5_core", false)));
        assert!(!selectors.matches(&device("1af4", "1000", "iavf", false)));
    }

    #[test]
    fn ids_compare_case_insensitively() {
        let selectors = NetDeviceSelectors {
            devices: vec!["0x154C".into()],
            ..Default::default()
        };
        assert!(selectors.matches(&device("8086", "154c", "iavf", false)));
    }

    #[test]
    fn rdma_flag_only_constrains_when_set() {
        let rdma_only = NetDeviceSelectors {
            is_rdma: true,
            ..Default::default()
        };
        assert!(rdma_only.matches(&device("15b3", "1018", "mlx5_core", true)));
        assert!(!rdma_only.matches(&device("15b3", "1018", "mlx5_core", false)));

        let any = NetDeviceSelectors::default();
        assert!(any.matches(&device("15b3", "1018", "mlx5_core", true)));
    }

    #[test]
    fn vhost_net_requires_the_spec() {
        let selectors = NetDeviceSelectors {
            need_vhost_net: true,
            ..Default::default()
        };
        assert!(!selectors.matches(&device("8086", "154c", "iavf", false)));
    }

    #[test]
    fn pf_name_selector_parsing() {
        assert_eq!(
            PfNameSelector::parse("ens1f0"),
            PfNameSelector {
                pf_name: "ens1f0",
                vf_range: None
            }
        );
        assert_eq!(
            PfNameSelector::parse("ens1f0#2-5").vf_range,
            Some((2, 5))
        );
        assert_eq!(PfNameSelector::parse("ens1f0#3").vf_range, Some((3, 3)));

        let broken = PfNameSelector::parse("ens1f0#x-y");
        assert!(!broken.matches("ens1f0", Some(0)));
    }

    #[test]
    fn pf_name_with_vf_range_matches_vfs_in_range() {
        let root = TempDir::new().unwrap();
        let devices = root.path().join("sys/bus/pci/devices");
        let pf = devices.join("0000:3b:00.0");
        fs::create_dir_all(pf.join("net/ens1f0")).unwrap();
        for (index, address) in ["0000:3b:02.0", "0000:3b:02.1", "0000:3b:02.2"]
            .iter()
            .enumerate()
        {
            let vf = devices.join(address);
            fs::create_dir_all(vf.join("net")).unwrap();
            symlink("../0000:3b:00.0", vf.join("physfn")).unwrap();
            symlink(format!("../{address}"), pf.join(format!("virtfn{index}"))).unwrap();
            symlink("../../../../bus/pci/drivers/iavf", vf.join("driver")).unwrap();
        }

        let factory = DefaultResourceFactory::new(SysFs::new(root.path()));
        let selectors = NetDeviceSelectors {
            pf_names: vec!["ens1f0#1-2".into()],
            ..Default::default()
        };
        let matched: Vec<String> = ["0000:3b:02.0", "0000:3b:02.1", "0000:3b:02.2"]
            .iter()
            .map(|address| {
                let raw = RawPciDevice::new(*address);
                PciNetDevice::new(&raw, &factory, &ResourceConfig::default()).unwrap()
            })
            .filter(|dev| selectors.matches(dev))
            .map(|dev| dev.address().to_string())
            .collect();

        assert_eq!(matched, vec!["0000:3b:02.1", "0000:3b:02.2"]);
    }
}
