use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use crate::api::ContainerAllocateResponse;
use crate::config::ResourceConfig;
use crate::netdevice::PciNetDevice;

/// Environment variable carrying the allocated devices of a resource, e.g.
/// `PCIDEVICE_INTEL_COM_SRIOV_NET` for `intel.com/sriov_net`.
pub fn env_var_name(config: &ResourceConfig) -> String {
    let sanitize = |s: &str| s.to_ascii_uppercase().replace(['.', '/', '-'], "_");
    format!(
        "PCIDEVICE_{}_{}",
        sanitize(&config.resource_prefix),
        sanitize(&config.resource_name)
    )
}

/// Everything one container needs for the leased `devices`: the union of
/// their device specs (one per host path) and mounts, and the env var listing
/// their env values.
pub fn container_allocate_response(
    config: &ResourceConfig,
    devices: &[Arc<PciNetDevice>],
) -> ContainerAllocateResponse {
    let mut response = ContainerAllocateResponse::default();
    let mut host_paths = HashSet::new();
    let mut env_vals = Vec::with_capacity(devices.len());

    for device in devices {
        for spec in device.device_specs() {
            if host_paths.insert(spec.host_path.clone()) {
                response.devices.push(spec.clone());
            }
        }
        for mount in device.mounts() {
            if !response.mounts.contains(mount) {
                response.mounts.push(mount.clone());
            }
        }
        env_vals.push(device.env_val());
    }

    response.envs = HashMap::from([(env_var_name(config), env_vals.join(","))]);
    response
}
