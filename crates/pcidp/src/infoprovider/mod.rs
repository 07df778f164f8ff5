//! Per-driver access artifacts for a PCI function.
//!
//! A [`DeviceInfoProvider`] answers "what does a container need to use this
//! device": device nodes, mounts and the value that identifies the device in
//! the workload's environment. Which provider a device gets depends only on
//! the driver family, see [`DriverFamily::from_driver`].

mod netdev;
mod uio;
mod vfio;

use std::fmt::Debug;

use error_stack::Report;

pub use netdev::NetDevInfoProvider;
pub use uio::UioInfoProvider;
pub use vfio::VfioInfoProvider;

use crate::api::DeviceSpec;
use crate::api::Mount;
use crate::error::DeviceError;
use crate::sysfs::SysFs;

/// Access artifacts for one device under its current driver.
pub trait DeviceInfoProvider: Debug + Send + Sync {
    fn device_specs(&self) -> Vec<DeviceSpec>;
    fn mounts(&self) -> Vec<Mount>;
    fn env_val(&self) -> String;
}

/// Driver families with distinct access models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum DriverFamily {
    /// Bound to a kernel network driver; the workload gets the interface.
    #[display("netdevice")]
    KernelNetDevice,
    #[display("vfio")]
    Vfio,
    #[display("uio")]
    Uio,
    /// Stub or accelerator drivers exposing nothing beyond the address.
    #[display("generic")]
    Generic,
}

impl DriverFamily {
    pub fn from_driver(driver: &str) -> Self {
        match driver {
            "vfio-pci" => Self::Vfio,
            "uio_pci_generic" | "igb_uio" | "uio" => Self::Uio,
            "pci-pf-stub" | "pci-stub" => Self::Generic,
            _ => Self::KernelNetDevice,
        }
    }

    /// Builds the provider for `address` under this family.
    pub fn info_provider(
        self,
        sysfs: &SysFs,
        address: &str,
    ) -> Result<Box<dyn DeviceInfoProvider>, Report<DeviceError>> {
        Ok(match self {
            Self::KernelNetDevice => Box::new(NetDevInfoProvider::new(address)),
            Self::Vfio => Box::new(VfioInfoProvider::new(sysfs, address)?),
            Self::Uio => Box::new(UioInfoProvider::new(sysfs, address)?),
            Self::Generic => Box::new(GenericInfoProvider::new(address)),
        })
    }
}

/// Minimal provider: no device nodes, no mounts.
#[derive(Debug, Clone)]
pub struct GenericInfoProvider {
    address: String,
}

impl GenericInfoProvider {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
        }
    }
}

impl DeviceInfoProvider for GenericInfoProvider {
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
