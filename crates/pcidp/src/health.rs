//! Host-side health of a device.

use tracing::debug;

use crate::netdevice::PciNetDevice;
use crate::pool::Health;
use crate::sysfs::SysFs;

/// A device is unhealthy when one of its device nodes vanished from the host
/// or its kernel interface reports link down.
pub fn device_health(sysfs: &SysFs, device: &PciNetDevice) -> Health {
    if let Some(spec) = device
        .device_specs()
        .iter()
        .find(|spec| !sysfs.host_path(&spec.host_path).exists())
    {
        debug!(address = %device.address(), path = %spec.host_path, "device node missing");
        return Health::Unhealthy;
    }

    if !device.net_name().is_empty()
        && sysfs
            .operstate(device.address(), device.net_name())
            .is_some_and(|state| state == "down")
    {
        debug!(address = %device.address(), net_name = %device.net_name(), "link down");
        return Health::Unhealthy;
    }

    Health::Healthy
}
