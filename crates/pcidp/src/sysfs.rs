//! Read-only access to the kernel's sysfs and devfs trees under an explicit root.
//!
//! Every lookup is relative to [`SysFs::root`], so tests point a reader at a
//! temporary directory instead of `/`. Missing entries are reported as `None`
//! or an empty list; only a driver entry that exists but is not a symlink is an
//! error.

use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use error_stack::Report;
use tracing::debug;

use crate::error::DeviceError;

const PCI_DEVICES_DIR: &str = "sys/bus/pci/devices";
const DEV_DIR: &str = "dev";

/// Handle on a (possibly fake) sysfs root.
#[derive(Debug, Clone)]
pub struct SysFs {
    root: PathBuf,
}

impl Default for SysFs {
    fn default() -> Self {
        Self::new("/")
    }
}

impl SysFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/sys/bus/pci/devices/<address>`
    pub fn pci_device_dir(&self, address: &str) -> PathBuf {
        self.root.join(PCI_DEVICES_DIR).join(address)
    }

    /// Host device node path inside the root, e.g. `vhost-net` -> `<root>/dev/vhost-net`.
    pub fn dev_path(&self, name: &str) -> PathBuf {
        self.root.join(DEV_DIR).join(name)
    }

    pub fn dev_exists(&self, name: &str) -> bool {
        self.dev_path(name).exists()
    }

    /// Bus addresses of all PCI devices, sorted.
    pub fn pci_addresses(&self) -> Result<Vec<String>, Report<DeviceError>> {
        let dir = self.root.join(PCI_DEVICES_DIR);
        let pattern = format!(
            "{}/*",
            glob::Pattern::escape(&dir.to_string_lossy())
        );
        let paths = glob::glob(&pattern).map_err(|e| {
            Report::new(DeviceError::Inventory {
                message: format!("invalid glob pattern {pattern}: {e}"),
            })
        })?;

        let mut addresses: Vec<String> = paths
            .filter_map(Result::ok)
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        addresses.sort();
        Ok(addresses)
    }

    /// Reads a trimmed attribute file of a PCI device, e.g. `vendor` or `class`.
    pub fn read_attr(&self, address: &str, attr: &str) -> Option<String> {
        fs::read_to_string(self.pci_device_dir(address).join(attr))
            .ok()
            .map(|s| s.trim().to_string())
    }

    /// Name of the driver bound to the device.
    ///
    /// Returns `Ok(None)` when no driver entry exists and an error when the
    /// entry exists but does not resolve to a driver directory name.
    pub fn driver_name(&self, address: &str) -> Result<Option<String>, Report<DeviceError>> {
        let link = self.pci_device_dir(address).join("driver");
        let metadata = match fs::symlink_metadata(&link) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Report::new(DeviceError::Sysfs {
                    path: link.display().to_string(),
                    message: e.to_string(),
                }))
            }
        };

        if !metadata.file_type().is_symlink() {
            return Err(Report::new(DeviceError::DriverResolution {
                address: address.to_string(),
                message: format!("{} is not a symlink", link.display()),
            }));
        }

        let target = fs::read_link(&link).map_err(|e| {
            Report::new(DeviceError::DriverResolution {
                address: address.to_string(),
                message: format!("cannot read {}: {e}", link.display()),
            })
        })?;

        match target.file_name() {
            Some(name) => Ok(Some(name.to_string_lossy().into_owned())),
            None => Err(Report::new(DeviceError::DriverResolution {
                address: address.to_string(),
                message: format!("driver link points to {}", target.display()),
            })),
        }
    }

    /// NUMA node of the device as written by the kernel (`-1` when unknown).
    pub fn numa_node(&self, address: &str) -> Option<i64> {
        self.read_attr(address, "numa_node")
            .and_then(|s| s.parse().ok())
    }

    /// IOMMU group number taken from the `iommu_group` symlink.
    pub fn iommu_group(&self, address: &str) -> Option<String> {
        link_file_name(&self.pci_device_dir(address).join("iommu_group"))
    }

    /// Kernel network interfaces registered by the device.
    pub fn net_names(&self, address: &str) -> Vec<String> {
        list_dir_names(&self.pci_device_dir(address).join("net"))
    }

    /// Link type of `ifname`, derived from its ARPHRD `type` attribute.
    pub fn link_type(&self, address: &str, ifname: &str) -> Option<String> {
        let path = self
            .pci_device_dir(address)
            .join("net")
            .join(ifname)
            .join("type");
        let raw = fs::read_to_string(&path).ok()?;
        let arphrd = raw.trim().parse::<u32>().ok()?;
        Some(arphrd_link_type(arphrd).to_string())
    }

    /// Operational state of `ifname` (`up`, `down`, `unknown`, ...).
    pub fn operstate(&self, address: &str, ifname: &str) -> Option<String> {
        let path = self
            .pci_device_dir(address)
            .join("net")
            .join(ifname)
            .join("operstate");
        fs::read_to_string(path).ok().map(|s| s.trim().to_string())
    }

    /// Absolute host path such as `/dev/vfio/12` resolved inside the root.
    pub fn host_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    /// Whether the device is a virtual function.
    pub fn is_vf(&self, address: &str) -> bool {
        self.pci_device_dir(address).join("physfn").exists()
    }

    /// Interface name of the physical function the device belongs to.
    ///
    /// For a VF this is the parent's interface, for a PF its own.
    pub fn pf_name(&self, address: &str) -> Option<String> {
        let dir = self.pci_device_dir(address);
        let physfn = dir.join("physfn");
        let names = if physfn.exists() {
            list_dir_names(&physfn.join("net"))
        } else {
            list_dir_names(&dir.join("net"))
        };
        names.into_iter().next()
    }

    /// Index of a VF among its PF's `virtfn*` links.
    pub fn vf_index(&self, address: &str) -> Option<u32> {
        let physfn = self.pci_device_dir(address).join("physfn");
        let entries = fs::read_dir(&physfn).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(index) = name.strip_prefix("virtfn") else {
                continue;
            };
            if link_file_name(&entry.path()).as_deref() == Some(address) {
                return index.parse().ok();
            }
        }
        None
    }

    /// `uioN` node name of a device bound to a UIO driver.
    pub fn uio_device(&self, address: &str) -> Option<String> {
        list_dir_names(&self.pci_device_dir(address).join("uio"))
            .into_iter()
            .next()
    }

    /// RDMA devices (e.g. `mlx5_0`) registered by the PCI function.
    pub fn rdma_devices(&self, address: &str) -> Vec<String> {
        list_dir_names(&self.pci_device_dir(address).join("infiniband"))
    }

    /// Host paths of the RDMA character devices serving the PCI function.
    pub fn rdma_char_devices(&self, address: &str) -> Vec<String> {
        let dir = self.pci_device_dir(address);
        let mut devices: Vec<String> = ["infiniband_verbs", "infiniband_mad"]
            .iter()
            .flat_map(|class| list_dir_names(&dir.join(class)))
            .map(|name| format!("/dev/infiniband/{name}"))
            .collect();

        if self.dev_exists("infiniband/rdma_cm") {
            devices.push("/dev/infiniband/rdma_cm".to_string());
        }
        debug!(address = %address, devices = ?devices, "resolved RDMA char devices");
        devices
    }
}

fn link_file_name(link: &Path) -> Option<String> {
    fs::read_link(link)
        .ok()
        .and_then(|target| target.file_name().map(|n| n.to_string_lossy().into_owned()))
}

fn list_dir_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Maps a link-layer ARPHRD number (see `if_arp.h`) to its encapsulation name.
fn arphrd_link_type(arphrd: u32) -> &'static str {
    match arphrd {
        1 => "ether",
        32 => "infiniband",
        772 => "loopback",
        65534 => "none",
        _ => "unknown",
    }
}
