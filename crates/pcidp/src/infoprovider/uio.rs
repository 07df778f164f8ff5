use error_stack::Report;

use crate::api::DeviceSpec;
use crate::api::Mount;
use crate::api::DEVICE_PERMISSIONS_RW;
use crate::error::DeviceError;
use crate::infoprovider::DeviceInfoProvider;
use crate::infoprovider::DriverFamily;
use crate::sysfs::SysFs;

/// Provider for functions bound to a UIO driver (`igb_uio`, `uio_pci_generic`).
#[derive(Debug, Clone)]
pub struct UioInfoProvider {
    address: String,
    uio_device: String,
}

impl UioInfoProvider {
    pub fn new(sysfs: &SysFs, address: &str) -> Result<Self, Report<DeviceError>> {
        let name = sysfs.uio_device(address).ok_or_else(|| {
            Report::new(DeviceError::InfoProviderConstruction {
                address: address.to_string(),
                family: DriverFamily::Uio.to_string(),
                message: "no uio device registered".to_string(),
            })
        })?;

        Ok(Self {
            address: address.to_string(),
            uio_device: format!("/dev/{name}"),
        })
    }
}

impl DeviceInfoProvider for UioInfoProvider {
    fn device_specs(&self) -> Vec<DeviceSpec> {
        vec![DeviceSpec::same_path(self.uio_device.as_str(), DEVICE_PERMISSIONS_RW)]
    }

    fn mounts(&self) -> Vec<Mount> {
        Vec::new()
    }

    fn env_val(&self) -> String {
        self.address.clone()
    }
}
