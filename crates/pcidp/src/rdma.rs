//! RDMA capability of a PCI function.

use std::fmt::Debug;

use tracing::debug;

use crate::api::DeviceSpec;
use crate::sysfs::SysFs;

/// RDMA character devices get mknod rights as well.
pub const RDMA_PERMISSIONS: &str = "rwm";

pub trait RdmaSpec: Debug + Send + Sync {
    fn is_rdma(&self) -> bool;
    fn rdma_device_specs(&self) -> Vec<DeviceSpec>;
}

/// RDMA capability resolved from sysfs: a function is RDMA capable when it
/// registered at least one RDMA device and exposes character devices for it.
#[derive(Debug, Clone, Default)]
pub struct SysfsRdmaSpec {
    device_specs: Vec<DeviceSpec>,
}

impl SysfsRdmaSpec {
    pub fn new(sysfs: &SysFs, address: &str) -> Self {
        let rdma_devices = sysfs.rdma_devices(address);
        if rdma_devices.is_empty() {
            return Self::default();
        }

        let device_specs: Vec<DeviceSpec> = sysfs
            .rdma_char_devices(address)
            .into_iter()
            .map(|path| DeviceSpec::same_path(path, RDMA_PERMISSIONS))
            .collect();
        debug!(
            address = %address,
            rdma_devices = ?rdma_devices,
            specs = device_specs.len(),
            "resolved RDMA capability"
        );

        Self { device_specs }
    }
}

impl RdmaSpec for SysfsRdmaSpec {
    fn is_rdma(&self) -> bool {
        !self.device_specs.is_empty()
    }

    fn rdma_device_specs(&self) -> Vec<DeviceSpec> {
        self.device_specs.clone()
    }
}
