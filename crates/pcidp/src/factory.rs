//! Driver-family dispatch shared by every device model build.

use error_stack::Report;
use tracing::debug;

use crate::error::DeviceError;
use crate::infoprovider::DeviceInfoProvider;
use crate::infoprovider::DriverFamily;
use crate::rdma::RdmaSpec;
use crate::rdma::SysfsRdmaSpec;
use crate::sysfs::SysFs;

/// Hands out the driver specific collaborators of the device model builder.
///
/// Implementations must be stateless apart from static configuration so one
/// factory can serve concurrent discovery passes.
pub trait ResourceFactory: Send + Sync {
    /// Filesystem view the builder resolves driver, NUMA and interface data from.
    fn sysfs(&self) -> &SysFs;

    fn default_info_provider(
        &self,
        address: &str,
        driver: &str,
    ) -> Result<Box<dyn DeviceInfoProvider>, Report<DeviceError>>;

    fn rdma_spec(&self, address: &str) -> Box<dyn RdmaSpec>;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultResourceFactory {
    sysfs: SysFs,
}

impl DefaultResourceFactory {
    pub fn new(sysfs: SysFs) -> Self {
        Self { sysfs }
    }
}

impl ResourceFactory for DefaultResourceFactory {
    fn sysfs(&self) -> &SysFs {
        &self.sysfs
    }

    fn default_info_provider(
        &self,
        address: &str,
        driver: &str,
    ) -> Result<Box<dyn DeviceInfoProvider>, Report<DeviceError>> {
        let family = DriverFamily::from_driver(driver);
        debug!(address = %address, driver = %driver, family = %family, "selecting info provider");
        family.info_provider(&self.sysfs, address)
    }

    fn rdma_spec(&self, address: &str) -> Box<dyn RdmaSpec> {
        Box::new(SysfsRdmaSpec::new(&self.sysfs, address))
    }
}
