use error_stack::Report;
use tracing::debug;

use crate::api::DeviceSpec;
use crate::api::Mount;
use crate::api::DEVICE_PERMISSIONS_RW;
use crate::error::DeviceError;
use crate::infoprovider::DeviceInfoProvider;
use crate::infoprovider::DriverFamily;
use crate::sysfs::SysFs;

/// VFIO container device, shared by every group.
pub const VFIO_CONTAINER_DEVICE: &str = "/dev/vfio/vfio";

/// Provider for functions bound to `vfio-pci`.
///
/// The workload needs the group node `/dev/vfio/<group>` and the container
/// node `/dev/vfio/vfio`.
#[derive(Debug, Clone)]
pub struct VfioInfoProvider {
    address: String,
    group_device: String,
}

impl VfioInfoProvider {
    pub fn new(sysfs: &SysFs, address: &str) -> Result<Self, Report<DeviceError>> {
        let group = sysfs.iommu_group(address).ok_or_else(|| {
            Report::new(DeviceError::InfoProviderConstruction {
                address: address.to_string(),
                family: DriverFamily::Vfio.to_string(),
                message: "device has no IOMMU group".to_string(),
            })
        })?;
        let group_device = format!("/dev/vfio/{group}");
        debug!(address = %address, group_device = %group_device, "resolved VFIO group device");

        Ok(Self {
            address: address.to_string(),
            group_device,
        })
    }
}

impl DeviceInfoProvider for VfioInfoProvider {
    fn device_specs(&self) -> Vec<DeviceSpec> {
        vec![
            DeviceSpec::same_path(self.group_device.as_str(), DEVICE_PERMISSIONS_RW),
            DeviceSpec::same_path(VFIO_CONTAINER_DEVICE, DEVICE_PERMISSIONS_RW),
        ]
    }

    fn mounts(&self) -> Vec<Mount> {
        Vec::new()
    }

    fn env_val(&self) -> String {
        self.address.clone()
    }
}
