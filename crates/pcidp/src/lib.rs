//! Device plugin agent for PCI network functions (SR-IOV VFs, PFs, and
//! devices bound to vfio-pci or uio drivers).
//!
//! The agent groups host devices into resource pools according to a JSON
//! resource list, keeps the pools in sync with sysfs, and answers kubelet
//! `ListAndWatch` and `Allocate` calls for each pool.

pub mod api;
pub mod config;
pub mod discovery;
pub mod error;
pub mod factory;
pub mod health;
pub mod infoprovider;
pub mod inventory;
pub mod manager;
pub mod netdevice;
pub mod plugin;
pub mod pool;
pub mod rdma;
pub mod selector;
pub mod sysfs;

#[cfg(test)]
mod mock;
