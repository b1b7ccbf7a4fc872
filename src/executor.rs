//! Per-workload resource reconciliation.
//!
//! A [`ResourceExecutor`] owns the [`WorkloadRecord`] of one workload: the
//! last values the daemon accepted. `need_update_*` predicates compare a
//! target with the record so callers can skip no-op daemon calls, and the
//! `update_*` methods touch the record only after the daemon (or the
//! toolstack fallback) succeeded.
//!
//! # Memory threshold
//!
//! The threshold is the ceiling the pedestal lets the workload grow to. It
//! only ever increases, and a limit is only applied once the threshold
//! covers it:
//!
//! ```text
//!   ensure_memory_limit(t):
//!     threshold < t ?  ── set MaxMem t ──► failed? stop, record untouched
//!     memory == t   ?  ── done
//!     set Memory t
//! ```
//!
//! # Toolstack fallback
//!
//! With hypervisor CLI updates enabled on the Xen pedestal, updates go
//! through `xl` first and fall back to the daemon if `xl` fails. CPU
//! affinity has no toolstack path and is skipped. The scheduler rejects a
//! zero weight, so `xl` is given the default weight instead and the record
//! holds the weight actually applied.

use crate::constants::{DEFAULT_SCHED_WEIGHT, MIN_SCHED_WEIGHT};
use crate::cpuset::CpuSet;
use crate::error::{Error, Result};
use crate::host::{HostInventory, PedestalKind};
use crate::protocol::{CreateMessage, DaemonClient, UpdateDirective};
use crate::resources::EssentialResource;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Last values successfully applied to one workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkloadRecord {
    pub vcpu_count: u32,
    pub max_vcpu_count: u32,
    pub cpu_weight: u32,
    pub cpu_capacity_percent: u32,
    pub memory_mib: u32,
    /// Never decreases.
    pub memory_threshold_mib: u32,
    pub cpu_set: String,
}

impl WorkloadRecord {
    /// Record of a freshly created workload.
    #[must_use]
    pub fn from_create(message: &CreateMessage) -> Self {
        Self {
            vcpu_count: message.vcpus,
            max_vcpu_count: message.max_vcpus,
            cpu_weight: message.cpu_weight,
            cpu_capacity_percent: message.cpu_capacity,
            memory_mib: message.memory_mib,
            memory_threshold_mib: message.memory_threshold_mib.max(message.memory_mib),
            cpu_set: message.cpu_set.clone(),
        }
    }
}

/// Which path carried an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePath {
    Daemon,
    Toolstack,
    /// Nothing was changed.
    Skipped,
}

/// Dimensions touched by [`ResourceExecutor::reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub applied: Vec<&'static str>,
}

/// Resource executor for one workload.
pub struct ResourceExecutor {
    id: String,
    record: WorkloadRecord,
    client: DaemonClient,
    host: Arc<HostInventory>,
    toolstack_updates: bool,
}

impl std::fmt::Debug for ResourceExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceExecutor")
            .field("id", &self.id)
            .field("record", &self.record)
            .field("toolstack_updates", &self.toolstack_updates)
            .finish_non_exhaustive()
    }
}

impl ResourceExecutor {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        record: WorkloadRecord,
        client: DaemonClient,
        host: Arc<HostInventory>,
    ) -> Self {
        Self {
            id: id.into(),
            record,
            client,
            host,
            toolstack_updates: false,
        }
    }

    /// Routes updates through the hypervisor CLI when on Xen.
    #[must_use]
    pub fn with_toolstack_updates(mut self, enabled: bool) -> Self {
        self.toolstack_updates = enabled;
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn record(&self) -> &WorkloadRecord {
        &self.record
    }

    #[must_use]
    pub fn client(&self) -> &DaemonClient {
        &self.client
    }

    #[must_use]
    pub fn memory_threshold_mib(&self) -> u32 {
        self.record.memory_threshold_mib
    }

    fn toolstack_active(&self) -> bool {
        self.toolstack_updates && self.host.pedestal() == PedestalKind::Xen
    }

    // =========================================================================
    // Update Predicates
    // =========================================================================

    /// Capacity differs, unless both sides already sit at or above the host
    /// maximum.
    #[must_use]
    pub fn need_update_cpu_capacity(&self, target: u32) -> bool {
        let current = self.record.cpu_capacity_percent;
        if current == target {
            return false;
        }
        let max = self.host.max_cpu_capacity();
        !(current >= max && target >= max)
    }

    #[must_use]
    pub fn need_update_memory_limit(&self, target: u32) -> bool {
        self.record.memory_mib != target
    }

    /// Only raising the threshold is an update.
    #[must_use]
    pub fn need_update_memory_threshold(&self, target: u32) -> bool {
        target > self.record.memory_threshold_mib
    }

    /// Compares against the weight the active update path would apply.
    #[must_use]
    pub fn need_update_cpu_weight(&self, target: u32) -> bool {
        let target = if self.toolstack_active() {
            toolstack_weight(target)
        } else {
            target
        };
        self.record.cpu_weight != target
    }

    /// Targets outside `[1, physical CPUs]` are never applied.
    #[must_use]
    pub fn need_update_vcpus(&self, target: u32) -> bool {
        if target == 0 || target > self.host.physical_cpus() {
            return false;
        }
        self.record.vcpu_count != target
    }

    /// Compares against the recorded mask when one exists, otherwise the
    /// caller's `old` and `new`.
    #[must_use]
    pub fn need_update_cpuset(&self, old: &str, new: &str) -> bool {
        let old = old.trim();
        let new = new.trim();
        if same_cpus(old, new) {
            return false;
        }
        let current = self.record.cpu_set.trim();
        if !current.is_empty() {
            return !same_cpus(current, new);
        }
        true
    }

    // =========================================================================
    // Updates
    // =========================================================================

    pub async fn update_cpu_capacity(&mut self, capacity: u32) -> Result<UpdatePath> {
        debug!(
            "update cpu capacity: workload={} old={} new={}",
            self.id, self.record.cpu_capacity_percent, capacity
        );
        let path = self.apply(UpdateDirective::CpuCapacity(capacity)).await?;
        if path != UpdatePath::Skipped {
            self.record.cpu_capacity_percent = capacity;
        }
        Ok(path)
    }

    pub async fn update_cpu_weight(&mut self, weight: u32) -> Result<UpdatePath> {
        debug!(
            "update cpu weight: workload={} old={} new={}",
            self.id, self.record.cpu_weight, weight
        );
        let path = self.apply(UpdateDirective::CpuWeight(weight)).await?;
        match path {
            UpdatePath::Toolstack => self.record.cpu_weight = toolstack_weight(weight),
            UpdatePath::Daemon => self.record.cpu_weight = weight,
            UpdatePath::Skipped => {}
        }
        Ok(path)
    }

    /// Returns the `(old, new)` vCPU counts.
    pub async fn update_vcpus(&mut self, vcpus: u32) -> Result<(u32, u32)> {
        let old = self.record.vcpu_count;
        self.set_vcpus(vcpus).await?;
        Ok((old, self.record.vcpu_count))
    }

    async fn set_vcpus(&mut self, vcpus: u32) -> Result<UpdatePath> {
        debug!(
            "update vcpu num: workload={} old={} new={}",
            self.id, self.record.vcpu_count, vcpus
        );
        let path = self.apply(UpdateDirective::Vcpus(vcpus)).await?;
        if path != UpdatePath::Skipped {
            self.record.vcpu_count = vcpus;
        }
        Ok(path)
    }

    /// Pins the workload to `cpus`. The mask is validated before any I/O.
    pub async fn update_cpuset(&mut self, cpus: &str) -> Result<UpdatePath> {
        let set = CpuSet::parse(cpus)?;
        if set.is_empty() {
            return Err(Error::InvalidCpuSet {
                input: cpus.to_string(),
                reason: "empty mask cannot be pinned".to_string(),
            });
        }
        let cpus = set.format();
        debug!("update pcpu constraints: workload={} cpuset={}", self.id, cpus);
        let path = self.apply(UpdateDirective::CpuSet(cpus.clone())).await?;
        if path != UpdatePath::Skipped {
            self.record.cpu_set = cpus;
        }
        Ok(path)
    }

    /// Raises the memory threshold. Lowering it is a silent no-op.
    pub async fn update_memory_threshold(&mut self, mib: u32) -> Result<UpdatePath> {
        if !self.need_update_memory_threshold(mib) {
            return Ok(UpdatePath::Skipped);
        }
        debug!(
            "update memory threshold: workload={} old={} new={}",
            self.id, self.record.memory_threshold_mib, mib
        );
        let path = self.apply(UpdateDirective::MaxMemory(mib)).await?;
        self.record.memory_threshold_mib = self.record.memory_threshold_mib.max(mib);
        Ok(path)
    }

    pub async fn update_memory(&mut self, mib: u32) -> Result<UpdatePath> {
        debug!(
            "update memory: workload={} old={} new={}",
            self.id, self.record.memory_mib, mib
        );
        let path = self.apply(UpdateDirective::Memory(mib)).await?;
        self.record.memory_mib = mib;
        self.record.memory_threshold_mib = self.record.memory_threshold_mib.max(mib);
        Ok(path)
    }

    /// Applies one update directive through the matching `update_*` method.
    pub async fn apply_directive(&mut self, directive: UpdateDirective) -> Result<UpdatePath> {
        match directive {
            UpdateDirective::Vcpus(count) => self.set_vcpus(count).await,
            UpdateDirective::CpuSet(cpus) => self.update_cpuset(&cpus).await,
            UpdateDirective::CpuCapacity(cap) => self.update_cpu_capacity(cap).await,
            UpdateDirective::CpuWeight(weight) => self.update_cpu_weight(weight).await,
            UpdateDirective::Memory(mib) => self.update_memory(mib).await,
            UpdateDirective::MaxMemory(mib) => self.update_memory_threshold(mib).await,
        }
    }

    /// Applies a memory limit, raising the threshold first when needed.
    ///
    /// If raising the threshold fails the limit is not attempted.
    pub async fn ensure_memory_limit(&mut self, target: u32) -> Result<()> {
        let current = self.record.memory_mib;
        let threshold = match self.record.memory_threshold_mib {
            0 => current,
            t => t,
        };
        if threshold < target {
            self.update_memory_threshold(target).await?;
        }
        if current == target {
            return Ok(());
        }
        self.update_memory(target).await.map(drop)
    }

    /// Recorded state as a resource value.
    #[must_use]
    pub fn read_resource(&self) -> EssentialResource {
        let rec = &self.record;
        EssentialResource {
            cpu_capacity_percent: Some(rec.cpu_capacity_percent),
            cpu_weight: (rec.cpu_weight > 0).then_some(rec.cpu_weight),
            client_cpuset: rec.cpu_set.clone(),
            vcpu_count: Some(rec.vcpu_count.max(1)),
            memory_max_mib: (rec.memory_mib > 0).then_some(rec.memory_mib),
            memory_min_mib: 0,
            network_interfaces: Vec::new(),
        }
    }

    /// Moves the workload towards `target`, skipping dimensions that are
    /// already in place. Stops at the first failure.
    pub async fn reconcile(&mut self, target: &EssentialResource) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        if let Some(capacity) = target.cpu_capacity_percent
            && self.need_update_cpu_capacity(capacity)
        {
            if self.update_cpu_capacity(capacity).await? != UpdatePath::Skipped {
                report.applied.push("cpu_capacity");
            }
        }

        if let Some(weight) = target.cpu_weight
            && self.need_update_cpu_weight(weight)
        {
            if self.update_cpu_weight(weight).await? != UpdatePath::Skipped {
                report.applied.push("cpu_weight");
            }
        }

        if let Some(vcpus) = target.vcpu_count
            && self.need_update_vcpus(vcpus)
        {
            if self.set_vcpus(vcpus).await? != UpdatePath::Skipped {
                report.applied.push("vcpus");
            }
        }

        let old = self.record.cpu_set.clone();
        if !target.client_cpuset.is_empty()
            && self.need_update_cpuset(&old, &target.client_cpuset)
        {
            if self.update_cpuset(&target.client_cpuset).await? != UpdatePath::Skipped {
                report.applied.push("cpuset");
            }
        }

        if let Some(memory) = target.memory_max_mib
            && (self.need_update_memory_threshold(memory) || self.need_update_memory_limit(memory))
        {
            self.ensure_memory_limit(memory).await?;
            report.applied.push("memory");
        }

        if !report.applied.is_empty() {
            info!("reconciled {}: {}", self.id, report.applied.join(", "));
        }
        Ok(report)
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    async fn apply(&self, directive: UpdateDirective) -> Result<UpdatePath> {
        if self.toolstack_active() {
            match self.apply_with_toolstack(&directive).await {
                Ok(path) => return Ok(path),
                Err(e) => warn!("xl update of {} failed, using daemon: {}", self.id, e),
            }
        }
        self.client.update(&self.id, directive).await?;
        Ok(UpdatePath::Daemon)
    }

    async fn apply_with_toolstack(&self, directive: &UpdateDirective) -> Result<UpdatePath> {
        let xl = self.host.xl();
        let id = self.id.as_str();
        debug!("calling xl to apply {} to {}", directive, id);
        match directive {
            UpdateDirective::Memory(mib) => xl.mem_set(id, *mib).await?,
            UpdateDirective::MaxMemory(mib) => xl.mem_max(id, *mib).await?,
            UpdateDirective::CpuWeight(weight) => {
                if *weight < MIN_SCHED_WEIGHT {
                    debug!("CPU weight must be >= 1, got {}, using default", weight);
                }
                xl.sched_credit2(id, Some(toolstack_weight(*weight)), None).await?;
            }
            UpdateDirective::CpuCapacity(cap) => xl.sched_credit2(id, None, Some(*cap)).await?,
            UpdateDirective::Vcpus(count) => xl.vcpu_set(id, *count).await?,
            UpdateDirective::CpuSet(cpus) => {
                info!("cpu affinity ({}) has no xl path, skipping", cpus);
                return Ok(UpdatePath::Skipped);
            }
        }
        Ok(UpdatePath::Toolstack)
    }
}

/// Weight handed to the credit scheduler, which rejects zero.
fn toolstack_weight(weight: u32) -> u32 {
    if weight < MIN_SCHED_WEIGHT {
        DEFAULT_SCHED_WEIGHT
    } else {
        weight
    }
}

fn same_cpus(a: &str, b: &str) -> bool {
    match (CpuSet::parse(a), CpuSet::parse(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
