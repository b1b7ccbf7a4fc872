//! Translation of OCI limits into an [`EssentialResource`].
//!
//! | OCI field          | Essential field          | Rule                                   |
//! |--------------------|--------------------------|----------------------------------------|
//! | `cpu.cpus`         | `client_cpuset`, `vcpus` | normalized mask, vCPUs = mask size     |
//! | `cpu.quota/period` | `cpu_capacity_percent`   | `quota*100/period`, capped by mask     |
//! | `cpu.shares`       | `cpu_weight`             | `shares/4` on credit schedulers        |
//! | `memory.limit`     | `memory_max_mib`         | bytes >> 20                            |
//! | `memory.reservation` | `memory_min_mib`       | bytes >> 20                            |
//!
//! Planning is a pure function of its inputs and the pedestal-selected
//! [`SharesConversion`].

use super::EssentialResource;
use super::oci::{OciCpu, OciResources};
use crate::constants::{
    CAPACITY_PER_CPU, DEFAULT_MIN_MEMORY_MIB, DEFAULT_SCHED_WEIGHT, MAX_SCHED_WEIGHT, MIB_SHIFT,
    MIN_SCHED_WEIGHT, SHARES_PER_WEIGHT,
};
use crate::cpuset::CpuSet;
use crate::host::{HostInventory, PedestalKind};
use tracing::debug;

/// How cgroup shares are carried into the essential weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharesConversion {
    /// Convert to a credit-scheduler weight in `[1, 65535]`.
    CreditWeight,
    /// Pass the share value through untouched.
    PassThrough,
}

/// Converts cgroup `cpu.shares` into a credit-scheduler weight.
///
/// Zero means unset and maps to the scheduler default.
#[must_use]
pub fn share_to_weight(shares: u64) -> u32 {
    if shares == 0 {
        return DEFAULT_SCHED_WEIGHT;
    }
    let weight = shares / SHARES_PER_WEIGHT;
    u32::try_from(weight)
        .unwrap_or(MAX_SCHED_WEIGHT)
        .clamp(MIN_SCHED_WEIGHT, MAX_SCHED_WEIGHT)
}

/// Capacity percentage from a CFS quota/period pair, capped at `vcpus * 100`
/// when a CPU mask bounds the workload. Returns `None` when the pair is
/// incomplete or non-positive.
#[must_use]
pub fn capacity_from_quota(quota: Option<i64>, period: Option<u64>, vcpus: u32) -> Option<u32> {
    let quota = u64::try_from(quota?).ok().filter(|q| *q > 0)?;
    let period = period.filter(|p| *p > 0)?;
    let raw = quota.saturating_mul(u64::from(CAPACITY_PER_CPU)) / period;
    let raw = u32::try_from(raw).unwrap_or(u32::MAX);
    if vcpus > 0 {
        return Some(raw.min(vcpus.saturating_mul(CAPACITY_PER_CPU)));
    }
    Some(raw)
}

/// Pedestal-aware resource planner.
#[derive(Debug, Clone, Copy)]
pub struct ResourcePlanner {
    shares: SharesConversion,
    min_memory_mib: u32,
}

impl Default for ResourcePlanner {
    fn default() -> Self {
        Self {
            shares: SharesConversion::PassThrough,
            min_memory_mib: DEFAULT_MIN_MEMORY_MIB,
        }
    }
}

impl ResourcePlanner {
    /// Planner for the given pedestal.
    #[must_use]
    pub fn for_pedestal(pedestal: PedestalKind) -> Self {
        let shares = if pedestal.capabilities().credit_scheduler {
            SharesConversion::CreditWeight
        } else {
            SharesConversion::PassThrough
        };
        Self {
            shares,
            ..Self::default()
        }
    }

    /// Sets the memory floor used when no limit is given.
    #[must_use]
    pub fn with_min_memory(mut self, mib: u32) -> Self {
        self.min_memory_mib = mib;
        self
    }

    #[must_use]
    pub fn shares_conversion(&self) -> SharesConversion {
        self.shares
    }

    /// Plans the essential resources of one workload.
    #[must_use]
    pub fn plan(&self, resources: Option<&OciResources>) -> EssentialResource {
        let mut res = EssentialResource::initial(self.min_memory_mib);
        let Some(resources) = resources else {
            return res;
        };

        if let Some(cpu) = &resources.cpu {
            self.plan_cpu(cpu, &mut res);
        }

        if let Some(memory) = &resources.memory {
            if let Some(limit) = memory.limit.filter(|l| *l > 0) {
                res.memory_max_mib = Some(bytes_to_mib(limit));
            }
            if let Some(reservation) = memory.reservation.filter(|r| *r > 0) {
                res.memory_min_mib = bytes_to_mib(reservation);
            }
        }
        res
    }

    fn plan_cpu(&self, cpu: &OciCpu, res: &mut EssentialResource) {
        let mut vcpus = 0;
        if let Some(mask) = cpu.cpus.as_deref() {
            match CpuSet::parse(mask) {
                Ok(set) if !set.is_empty() => {
                    vcpus = u32::try_from(set.len()).unwrap_or(u32::MAX);
                    res.client_cpuset = set.format();
                    res.vcpu_count = Some(vcpus);
                }
                Ok(_) => {}
                Err(e) => debug!("ignoring cpu mask: {}", e),
            }
        }

        match capacity_from_quota(cpu.quota, cpu.period, vcpus) {
            Some(capacity) => res.cpu_capacity_percent = Some(capacity),
            None => {
                debug!(
                    "cpu quota/period pair <{:?}:{:?}> is incomplete",
                    cpu.quota, cpu.period
                );
                if vcpus > 0 {
                    res.cpu_capacity_percent = Some(vcpus * CAPACITY_PER_CPU);
                }
            }
        }

        let shares = cpu.shares.filter(|s| *s > 0);
        res.cpu_weight = match (self.shares, shares) {
            (SharesConversion::CreditWeight, Some(s)) => Some(share_to_weight(s)),
            (SharesConversion::CreditWeight, None) => Some(DEFAULT_SCHED_WEIGHT),
            (SharesConversion::PassThrough, Some(s)) => Some(u32::try_from(s).unwrap_or(u32::MAX)),
            (SharesConversion::PassThrough, None) => None,
        };
    }
}

/// Plans resources with the planner selected by the host pedestal.
#[must_use]
pub fn plan_essential_resources(
    resources: Option<&OciResources>,
    host: &HostInventory,
) -> EssentialResource {
    ResourcePlanner::for_pedestal(host.pedestal()).plan(resources)
}

fn bytes_to_mib(bytes: i64) -> u32 {
    u32::try_from(bytes >> MIB_SHIFT).unwrap_or(u32::MAX)
}
