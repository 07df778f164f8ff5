use crate::api::DeviceSpec;
use crate::api::Mount;
use crate::infoprovider::DeviceInfoProvider;

/// Provider for functions bound to a kernel network driver.
///
/// The network interface itself is moved into the workload by the CNI plugin,
/// so no device nodes are handed out; the bus address is what the CNI plugin
/// reads from the environment to find the interface.
#[derive(Debug, Clone)]
pub struct NetDevInfoProvider {
    address: String,
}

impl NetDevInfoProvider {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
        }
    }
}

impl DeviceInfoProvider for NetDevInfoProvider {
    fn device_specs(&self) -> Vec<DeviceSpec> {
        Vec::new()
    }

    fn mounts(&self) -> Vec<Mount> {
        Vec::new()
    }

    fn env_val(&self) -> String {
        self.address.clone()
    }
}
