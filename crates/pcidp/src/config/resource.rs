use std::collections::HashSet;
use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;

use crate::error::ConfigError;

pub const DEFAULT_RESOURCE_PREFIX: &str = "intel.com";

static RESOURCE_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_]+$").expect("Invalid resource name regex"));

/// Device selectors of one resource pool. An empty list or `false` does not
/// filter on that dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetDeviceSelectors {
    /// Vendor ids, hex without `0x` (e.g. `8086`)
    pub vendors: Vec<String>,
    /// Device ids, hex without `0x` (e.g. `154c`)
    pub devices: Vec<String>,
    pub drivers: Vec<String>,
    /// PF interface names, optionally with a VF range: `ens1f0#0-7`
    pub pf_names: Vec<String>,
    pub link_types: Vec<String>,
    pub pci_addresses: Vec<String>,
    pub is_rdma: bool,
    pub need_vhost_net: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    pub resource_name: String,
    /// Falls back to the global prefix when empty.
    #[serde(default)]
    pub resource_prefix: String,
    #[serde(default, rename = "selectors")]
    pub selector_obj: NetDeviceSelectors,
}

impl ResourceConfig {
    /// Extended resource name as advertised to kubelet, e.g. `intel.com/sriov_net`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.resource_prefix, self.resource_name)
    }
}

/// Content of the resource config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfigList {
    pub resource_list: Vec<ResourceConfig>,
}

impl ResourceConfigList {
    pub fn from_json(content: &str) -> Result<Self, Report<ConfigError>> {
        serde_json::from_str(content).map_err(|e| {
            Report::new(ConfigError::Parse {
                message: e.to_string(),
            })
        })
    }

    /// Reads, parses and validates the config file, applying `default_prefix`
    /// to resources without their own prefix.
    pub fn load(path: &Path, default_prefix: &str) -> Result<Self, Report<ConfigError>> {
        let content = std::fs::read_to_string(path).change_context(ConfigError::Read {
            path: path.display().to_string(),
        })?;
        let mut list = Self::from_json(&content)
            .attach_printable_lazy(|| format!("config file: {}", path.display()))?;
        list.apply_default_prefix(default_prefix);
        list.validate()?;
        Ok(list)
    }

    pub fn apply_default_prefix(&mut self, default_prefix: &str) {
        for resource in &mut self.resource_list {
            if resource.resource_prefix.is_empty() {
                resource.resource_prefix = default_prefix.to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<(), Report<ConfigError>> {
        let mut seen = HashSet::new();
        for resource in &self.resource_list {
            if !RESOURCE_NAME_REGEX.is_match(&resource.resource_name) {
                return Err(Report::new(ConfigError::Invalid {
                    message: format!(
                        "resource name {:?} must be non-empty and contain only [a-zA-Z0-9_]",
                        resource.resource_name
                    ),
                }));
            }
            if !seen.insert(resource.full_name()) {
                return Err(Report::new(ConfigError::Invalid {
                    message: format!("duplicate resource {}", resource.full_name()),
                }));
            }
        }
        Ok(())
    }
}
