//! The logical device model: one fully resolved PCI network function.

use error_stack::Report;
use error_stack::ResultExt;
use serde_json::json;
use tracing::debug;

use crate::api;
use crate::api::DeviceSpec;
use crate::api::Mount;
use crate::api::DEVICE_PERMISSIONS_RW;
use crate::config::ResourceConfig;
use crate::error::DeviceError;
use crate::factory::ResourceFactory;
use crate::inventory::RawPciDevice;
use crate::rdma::RdmaSpec;

/// Host device node backing vhost-net acceleration.
pub const VHOST_NET_DEVICE: &str = "/dev/vhost-net";

/// A PCI network function with everything a workload needs to use it.
///
/// Only [`PciNetDevice::new`] creates values, and it either resolves every
/// field or fails, so a half-built device is never observable.
#[derive(Debug)]
pub struct PciNetDevice {
    address: String,
    vendor: String,
    device_code: String,
    driver: String,
    net_name: String,
    pf_name: String,
    vf_index: Option<u32>,
    iommu_group: Option<String>,
    link_type: String,
    env_val: String,
    device_specs: Vec<DeviceSpec>,
    mounts: Vec<Mount>,
    rdma_spec: Box<dyn RdmaSpec>,
    numa_node: Option<i64>,
}

impl PciNetDevice {
    /// Builds the logical device for `raw` as seen by the pool `config`.
    pub fn new(
        raw: &RawPciDevice,
        factory: &dyn ResourceFactory,
        config: &ResourceConfig,
    ) -> Result<Self, Report<DeviceError>> {
        let address = raw.address.as_str();
        let sysfs = factory.sysfs();

        let driver = match sysfs
            .driver_name(address)
            .change_context_lazy(|| DeviceError::DriverResolution {
                address: address.to_string(),
                message: "invalid driver link".to_string(),
            })? {
            Some(driver) => driver,
            None => raw
                .driver
                .clone()
                .filter(|d| !d.is_empty())
                .ok_or_else(|| {
                    Report::new(DeviceError::DriverResolution {
                        address: address.to_string(),
                        message: "no driver bound".to_string(),
                    })
                })?,
        };

        let info = factory.default_info_provider(address, &driver)?;
        let mut device_specs = info.device_specs();
        let mounts = info.mounts();
        let env_val = info.env_val();

        let (net_name, link_type) = match raw.net_name.as_deref() {
            Some(name) if !name.is_empty() => (
                name.to_string(),
                sysfs.link_type(address, name).unwrap_or_default(),
            ),
            _ => (String::new(), String::new()),
        };

        if config.selector_obj.need_vhost_net {
            if sysfs.dev_exists("vhost-net") {
                device_specs.push(DeviceSpec::same_path(VHOST_NET_DEVICE, DEVICE_PERMISSIONS_RW));
            } else {
                debug!(address = %address, "vhost-net requested but not present on host");
            }
        }

        let rdma_spec = factory.rdma_spec(address);
        if rdma_spec.is_rdma() {
            device_specs.extend(rdma_spec.rdma_device_specs());
        }

        let numa_node = raw
            .numa_node
            .or_else(|| sysfs.numa_node(address))
            .filter(|node| *node >= 0);

        let device = Self {
            address: address.to_string(),
            vendor: raw.vendor.clone(),
            device_code: raw.device.clone(),
            driver,
            net_name,
            pf_name: sysfs.pf_name(address).unwrap_or_default(),
            vf_index: sysfs.vf_index(address),
            iommu_group: raw
                .iommu_group
                .clone()
                .or_else(|| sysfs.iommu_group(address)),
            link_type,
            env_val,
            device_specs,
            mounts,
            rdma_spec,
            numa_node,
        };
        debug!(
            address = %device.address,
            driver = %device.driver,
            net_name = %device.net_name,
            specs = device.device_specs.len(),
            numa = %device.numa_info(),
            "built PCI network device"
        );
        Ok(device)
    }

    /// PCI bus address, also the device id advertised to kubelet.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn device_code(&self) -> &str {
        &self.device_code
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    /// Kernel interface name, empty for passthrough bound functions.
    pub fn net_name(&self) -> &str {
        &self.net_name
    }

    pub fn pf_name(&self) -> &str {
        &self.pf_name
    }

    /// Position among the parent PF's VFs; `None` for a PF.
    pub fn vf_index(&self) -> Option<u32> {
        self.vf_index
    }

    /// IOMMU group from the inventory record, else from sysfs.
    pub fn iommu_group(&self) -> Option<&str> {
        self.iommu_group.as_deref()
    }

    pub fn link_type(&self) -> &str {
        &self.link_type
    }

    pub fn env_val(&self) -> &str {
        &self.env_val
    }

    pub fn device_specs(&self) -> &[DeviceSpec] {
        &self.device_specs
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    pub fn rdma_spec(&self) -> &dyn RdmaSpec {
        self.rdma_spec.as_ref()
    }

    pub fn has_vhost_net(&self) -> bool {
        self.device_specs
            .iter()
            .any(|spec| spec.host_path == VHOST_NET_DEVICE)
    }

    /// Non-negative NUMA node, if the kernel reported one.
    pub fn numa_node(&self) -> Option<i64> {
        self.numa_node
    }

    /// NUMA node as a string, empty when there is no locality hint.
    pub fn numa_info(&self) -> String {
        self.numa_node.map(|n| n.to_string()).unwrap_or_default()
    }

    /// Device as advertised in `ListAndWatch`; health is filled in by the pool.
    pub fn api_device(&self) -> api::Device {
        api::Device {
            id: self.address.clone(),
            health: api::HEALTHY.to_string(),
            topology: self.numa_node.map(|id| api::TopologyInfo {
                nodes: vec![api::NumaNode { id }],
            }),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "address": self.address,
            "vendor": self.vendor,
            "device": self.device_code,
            "driver": self.driver,
            "netName": self.net_name,
            "pfName": self.pf_name,
            "vfIndex": self.vf_index,
            "iommuGroup": self.iommu_group,
            "linkType": self.link_type,
            "envVal": self.env_val,
            "isRdma": self.rdma_spec.is_rdma(),
            "numaNode": self.numa_node,
            "deviceSpecs": self.device_specs,
            "mounts": self.mounts,
        })
    }
}
