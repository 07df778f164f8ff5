//! Test doubles for the factory seams.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use error_stack::Report;

use crate::api::DeviceSpec;
use crate::api::Mount;
use crate::config::ResourceConfig;
use crate::error::DeviceError;
use crate::factory::ResourceFactory;
use crate::infoprovider::DeviceInfoProvider;
use crate::inventory::RawPciDevice;
use crate::netdevice::PciNetDevice;
use crate::rdma::RdmaSpec;
use crate::sysfs::SysFs;

#[derive(Debug, Clone)]
pub struct MockInfoProvider {
    env_val: String,
    specs: Vec<DeviceSpec>,
    mounts: Vec<Mount>,
}

impl MockInfoProvider {
    pub fn new(env_val: &str) -> Self {
        Self {
            env_val: env_val.to_string(),
            specs: Vec::new(),
            mounts: Vec::new(),
        }
    }

    pub fn with_specs(mut self, specs: Vec<DeviceSpec>) -> Self {
        self.specs = specs;
        self
    }

    pub fn with_mounts(mut self, mounts: Vec<Mount>) -> Self {
        self.mounts = mounts;
        self
    }
}

impl DeviceInfoProvider for MockInfoProvider {
    fn device_specs(&self) -> Vec<DeviceSpec> {
        self.specs.clone()
    }

    fn mounts(&self) -> Vec<Mount> {
        self.mounts.clone()
    }

    fn env_val(&self) -> String {
        self.env_val.clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockRdmaSpec {
    specs: Option<Vec<DeviceSpec>>,
}

impl MockRdmaSpec {
    pub fn rdma(specs: Vec<DeviceSpec>) -> Self {
        Self { specs: Some(specs) }
    }

    pub fn not_rdma() -> Self {
        Self::default()
    }
}

impl RdmaSpec for MockRdmaSpec {
    fn is_rdma(&self) -> bool {
        self.specs.is_some()
    }

    fn rdma_device_specs(&self) -> Vec<DeviceSpec> {
        self.specs.clone().unwrap_or_default()
    }
}

/// Factory returning canned providers per bus address and recording every
/// lookup. Addresses without a registered provider fail construction.
pub struct MockResourceFactory {
    sysfs: SysFs,
    infos: HashMap<String, MockInfoProvider>,
    rdma: HashMap<String, MockRdmaSpec>,
    info_calls: Arc<Mutex<Vec<(String, String)>>>,
    rdma_calls: Arc<Mutex<Vec<String>>>,
}

impl MockResourceFactory {
    pub fn new() -> Self {
        Self {
            sysfs: SysFs::new("/nonexistent/pcidp-test-root"),
            infos: HashMap::new(),
            rdma: HashMap::new(),
            info_calls: Arc::new(Mutex::new(Vec::new())),
            rdma_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_info(mut self, address: &str, info: MockInfoProvider) -> Self {
        self.infos.insert(address.to_string(), info);
        self
    }

    pub fn with_rdma(mut self, address: &str, rdma: MockRdmaSpec) -> Self {
        self.rdma.insert(address.to_string(), rdma);
        self
    }

    pub fn info_calls(&self) -> Vec<(String, String)> {
        self.info_calls.lock().unwrap().clone()
    }

    pub fn rdma_calls(&self) -> Vec<String> {
        self.rdma_calls.lock().unwrap().clone()
    }
}

impl Default for MockResourceFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceFactory for MockResourceFactory {
    fn sysfs(&self) -> &SysFs {
        &self.sysfs
    }

    fn default_info_provider(
        &self,
        address: &str,
        driver: &str,
    ) -> Result<Box<dyn DeviceInfoProvider>, Report<DeviceError>> {
        self.info_calls
            .lock()
            .unwrap()
            .push((address.to_string(), driver.to_string()));
        match self.infos.get(address) {
            Some(info) => Ok(Box::new(info.clone())),
            None => Err(Report::new(DeviceError::InfoProviderConstruction {
                address: address.to_string(),
                family: "mock".to_string(),
                message: "no provider registered".to_string(),
            })),
        }
    }

    fn rdma_spec(&self, address: &str) -> Box<dyn RdmaSpec> {
        self.rdma_calls.lock().unwrap().push(address.to_string());
        Box::new(self.rdma.get(address).cloned().unwrap_or_default())
    }
}

/// Builds a kernel-netdev style device at `address` with one fake spec, for
/// pool and plugin tests that do not care about discovery.
pub fn fake_device(address: &str, numa_node: Option<i64>) -> PciNetDevice {
    let factory = MockResourceFactory::new().with_info(
        address,
        MockInfoProvider::new(address)
            .with_specs(vec![DeviceSpec::same_path(format!("/dev/fake/{address}"), "rw")]),
    );
    let raw = RawPciDevice {
        address: address.to_string(),
        vendor: "8086".to_string(),
        device: "154c".to_string(),
        class: "0x020000".to_string(),
        driver: Some("iavf".to_string()),
        numa_node,
        ..Default::default()
    };
    PciNetDevice::new(&raw, &factory, &ResourceConfig::default()).expect("fake device builds")
}
