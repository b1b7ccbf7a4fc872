//! Pedestal-neutral resource model.
//!
//! An [`EssentialResource`] is what planning produces and what the executor
//! reconciles a workload towards. It is a per-request value and is never
//! persisted.

pub mod oci;
pub mod planner;

pub use oci::{OciCpu, OciMemory, OciResources};
pub use planner::{
    ResourcePlanner, SharesConversion, capacity_from_quota, plan_essential_resources,
    share_to_weight,
};

use crate::constants::DEFAULT_VCPU_COUNT;
use serde::{Deserialize, Serialize};

/// Resource shape of one RTOS workload.
///
/// `None` means "unset"; zero is a meaningful value for capacity (unlimited)
/// and weight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EssentialResource {
    /// Hard cap, 1% of one core per unit. 0 is unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_capacity_percent: Option<u32>,
    /// Relative scheduler weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_weight: Option<u32>,
    /// CPU mask in range-list form, empty for all CPUs.
    #[serde(default)]
    pub client_cpuset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcpu_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_max_mib: Option<u32>,
    /// Memory reservation.
    #[serde(default)]
    pub memory_min_mib: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_interfaces: Vec<String>,
}

impl EssentialResource {
    /// Resources of a workload with no constraints.
    #[must_use]
    pub fn initial(min_memory_mib: u32) -> Self {
        Self {
            cpu_capacity_percent: Some(0),
            cpu_weight: None,
            client_cpuset: String::new(),
            vcpu_count: Some(DEFAULT_VCPU_COUNT),
            memory_max_mib: Some(min_memory_mib),
            memory_min_mib: 0,
            network_interfaces: Vec::new(),
        }
    }

    /// Adds virtual network interfaces.
    #[must_use]
    pub fn with_network_interfaces(mut self, interfaces: Vec<String>) -> Self {
        self.network_interfaces = interfaces;
        self
    }

    /// vCPU count, falling back to the default of one.
    #[must_use]
    pub fn vcpus(&self) -> u32 {
        self.vcpu_count.unwrap_or(DEFAULT_VCPU_COUNT)
    }
}
