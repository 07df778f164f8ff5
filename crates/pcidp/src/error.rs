//! Error types shared by the discovery engine and the resource pools.

use core::error::Error;

/// Failures while turning one PCI device into a [`crate::netdevice::PciNetDevice`].
///
/// These are always scoped to a single device: a discovery pass logs them and
/// moves on to the next device.
#[derive(Debug, derive_more::Display)]
pub enum DeviceError {
    #[display("Failed to resolve driver for device {address}: {message}")]
    DriverResolution { address: String, message: String },
    #[display("Failed to construct {family} info provider for device {address}: {message}")]
    InfoProviderConstruction {
        address: String,
        family: String,
        message: String,
    },
    #[display("Failed to read sysfs entry {path}: {message}")]
    Sysfs { path: String, message: String },
    #[display("Failed to list PCI devices: {message}")]
    Inventory { message: String },
}

impl Error for DeviceError {}

/// Errors returned by [`crate::pool::ResourcePool`] operations.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum PoolError {
    #[display("Insufficient resources in pool {pool}: requested {requested}, available {available}")]
    InsufficientResources {
        pool: String,
        requested: usize,
        available: usize,
    },
    #[display("Resource pool {pool} is stopped")]
    PoolStopped { pool: String },
    #[display("Resource pool {pool} is not initialized yet")]
    NotReady { pool: String },
    #[display("Device {id} is not part of pool {pool}")]
    UnknownDevice { pool: String, id: String },
    #[display("Device {id} in pool {pool} is unavailable: {reason}")]
    DeviceUnavailable {
        pool: String,
        id: String,
        reason: String,
    },
}

impl Error for PoolError {}

/// Errors raised while loading the resource list.
#[derive(Debug, derive_more::Display)]
pub enum ConfigError {
    #[display("Failed to read config file {path}")]
    Read { path: String },
    #[display("Failed to parse resource list: {message}")]
    Parse { message: String },
    #[display("Invalid resource config: {message}")]
    Invalid { message: String },
}

impl Error for ConfigError {}
