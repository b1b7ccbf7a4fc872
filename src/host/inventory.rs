//! Host inventory: pedestal detection, CPU counts and memory.
//!
//! A [`HostInventory`] is built once at startup and shared by reference with
//! the planner and every executor. Static facts (pedestal kind, CPU counts)
//! are captured at construction; memory is re-queried on every call. The
//! reservation count and the exclusivity flag are atomics because
//! configuration may change them while plans are computed concurrently.
//!
//! ```text
//!   physical CPUs ─┬─ exclusive + hypervisor ──► physical - linux_visible
//!                  ├─ hypervisor             ──► physical
//!                  └─ bare metal             ──► physical - reserved
//! ```

use super::command::{CommandRunner, SystemCommandRunner};
use super::xl::Xl;
use crate::constants::{
    ACRN_CONTROL_MARKER, CAPACITY_PER_CPU, KERNEL_MODULES_PATH, MIB_SHIFT, XEN_CONTROL_MARKER,
    XEN_KERNEL_MODULES,
};
use crate::cpuset::CpuSet;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, info};

// =============================================================================
// Pedestal Kind
// =============================================================================

/// Partitioning backend hosting RTOS workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PedestalKind {
    /// Xen hypervisor with the credit2 scheduler.
    Xen,
    /// ACRN hypervisor.
    Acrn,
    /// Bare-metal partitioning through OpenAMP remoteproc.
    OpenAmp,
    /// No supported pedestal found.
    Unsupported,
}

/// How a pedestal implements pause and resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendMode {
    /// True suspend through the hypervisor toolstack.
    Hypervisor,
    /// Pause stops the guest and resume starts it again.
    StopStart,
}

/// Per-pedestal behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PedestalCapabilities {
    pub suspend: SuspendMode,
    /// Scheduler uses credit2 weights rather than cgroup shares.
    pub credit_scheduler: bool,
    /// Resource updates can be applied directly with the toolstack.
    pub toolstack_updates: bool,
}

impl PedestalKind {
    /// Name written into the create message.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xen => "xen",
            Self::Acrn => "acrn",
            Self::OpenAmp => "openamp",
            Self::Unsupported => "unknown",
        }
    }

    /// Parses a pedestal name as found in annotations. Empty means Xen.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "xen" | "" => Self::Xen,
            "acrn" => Self::Acrn,
            "openamp" | "baremetal" => Self::OpenAmp,
            _ => Self::Unsupported,
        }
    }

    #[must_use]
    pub fn is_hypervisor(&self) -> bool {
        matches!(self, Self::Xen | Self::Acrn)
    }

    #[must_use]
    pub fn capabilities(&self) -> PedestalCapabilities {
        match self {
            Self::Xen => PedestalCapabilities {
                suspend: SuspendMode::Hypervisor,
                credit_scheduler: true,
                toolstack_updates: true,
            },
            Self::Acrn | Self::OpenAmp | Self::Unsupported => PedestalCapabilities {
                suspend: SuspendMode::StopStart,
                credit_scheduler: false,
                toolstack_updates: false,
            },
        }
    }
}

impl fmt::Display for PedestalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Filesystem locations consulted during detection.
#[derive(Debug, Clone)]
pub struct PedestalProbe {
    pub xen_marker: PathBuf,
    pub acrn_marker: PathBuf,
    pub modules_path: PathBuf,
    /// Forces the Xen result regardless of the markers.
    pub mock: bool,
}

impl Default for PedestalProbe {
    fn default() -> Self {
        Self {
            xen_marker: PathBuf::from(XEN_CONTROL_MARKER),
            acrn_marker: PathBuf::from(ACRN_CONTROL_MARKER),
            modules_path: PathBuf::from(KERNEL_MODULES_PATH),
            mock: false,
        }
    }
}

impl PedestalProbe {
    /// Detects the host pedestal.
    pub fn detect(&self) -> PedestalKind {
        if self.mock {
            return PedestalKind::Xen;
        }
        if self.xen_marker.exists() {
            let missing = missing_kernel_modules(&self.modules_path, XEN_KERNEL_MODULES);
            if !missing.is_empty() {
                debug!("xen kernel modules not loaded: {}", missing.join(", "));
            }
            return PedestalKind::Xen;
        }
        debug!("missing xen bus at {}", self.xen_marker.display());
        if self.acrn_marker.exists() {
            return PedestalKind::Acrn;
        }
        PedestalKind::Unsupported
    }
}

/// Names from a `/proc/modules` style listing.
pub fn parse_kernel_modules(listing: &str) -> HashSet<String> {
    listing
        .lines()
        .filter_map(|l| l.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Required modules absent from the listing at `path`. An unreadable listing
/// reports every module as missing.
pub fn missing_kernel_modules(path: &Path, required: &[&str]) -> Vec<String> {
    let loaded = std::fs::read_to_string(path)
        .map(|s| parse_kernel_modules(&s))
        .unwrap_or_default();
    required
        .iter()
        .filter(|m| !loaded.contains(**m))
        .map(|m| m.to_string())
        .collect()
}

// =============================================================================
// Host Facts
// =============================================================================

/// Static CPU counts captured at inventory construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HostCpuCounts {
    /// CPUs the pedestal manages.
    pub physical: u32,
    /// CPUs visible to the Linux control OS, never above `physical`.
    pub linux_visible: u32,
}

/// Live memory snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HostMemory {
    pub total_mib: u32,
    pub free_mib: u32,
}

/// Host facts shared by the planner and the executors.
pub struct HostInventory {
    pedestal: PedestalKind,
    cpu_counts: HostCpuCounts,
    reserved_cpus: AtomicU32,
    exclusive_control_cpus: AtomicBool,
    meminfo_path: PathBuf,
    xl: Xl,
}

impl fmt::Debug for HostInventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostInventory")
            .field("pedestal", &self.pedestal)
            .field("cpu_counts", &self.cpu_counts)
            .field("reserved_cpus", &self.reserved_cpus())
            .field("exclusive_control_cpus", &self.exclusive_control_cpus())
            .finish()
    }
}

impl HostInventory {
    /// Probes the host with the system command runner.
    pub async fn detect(probe: &PedestalProbe) -> Self {
        Self::detect_with(probe, Arc::new(SystemCommandRunner)).await
    }

    /// Probes the host, executing hypervisor commands through `runner`.
    pub async fn detect_with(probe: &PedestalProbe, runner: Arc<dyn CommandRunner>) -> Self {
        let pedestal = probe.detect();
        let xl = Xl::new(runner);
        let logical = logical_cpus();

        let physical = if pedestal == PedestalKind::Xen {
            match xl.info().await {
                Ok(info) if info.nr_cpus > 0 => info.nr_cpus,
                Ok(_) => logical,
                Err(e) => {
                    debug!("failed to query hypervisor info, using logical count: {}", e);
                    logical
                }
            }
        } else {
            logical
        };

        let cpu_counts = HostCpuCounts {
            physical,
            linux_visible: logical.min(physical),
        };
        info!(
            "host pedestal {} with {} physical CPUs ({} visible to Linux)",
            pedestal, cpu_counts.physical, cpu_counts.linux_visible
        );
        Self::with_facts(pedestal, cpu_counts, xl)
    }

    /// Builds an inventory from known facts.
    #[must_use]
    pub fn with_facts(pedestal: PedestalKind, cpu_counts: HostCpuCounts, xl: Xl) -> Self {
        Self {
            pedestal,
            cpu_counts: HostCpuCounts {
                physical: cpu_counts.physical,
                linux_visible: cpu_counts.linux_visible.min(cpu_counts.physical),
            },
            reserved_cpus: AtomicU32::new(0),
            exclusive_control_cpus: AtomicBool::new(false),
            meminfo_path: PathBuf::from("/proc/meminfo"),
            xl,
        }
    }

    /// Overrides the meminfo source.
    #[must_use]
    pub fn with_meminfo_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.meminfo_path = path.into();
        self
    }

    #[must_use]
    pub fn pedestal(&self) -> PedestalKind {
        self.pedestal
    }

    #[must_use]
    pub fn cpu_counts(&self) -> HostCpuCounts {
        self.cpu_counts
    }

    #[must_use]
    pub fn physical_cpus(&self) -> u32 {
        self.cpu_counts.physical
    }

    /// Highest capacity a single workload can hold (100 per physical CPU).
    #[must_use]
    pub fn max_cpu_capacity(&self) -> u32 {
        self.cpu_counts.physical.saturating_mul(CAPACITY_PER_CPU)
    }

    #[must_use]
    pub fn xl(&self) -> &Xl {
        &self.xl
    }

    /// Sets the bare-metal reservation, clamped to the physical count.
    pub fn set_reserved_cpus(&self, count: u32) {
        let clamped = count.min(self.cpu_counts.physical);
        self.reserved_cpus.store(clamped, Ordering::SeqCst);
    }

    #[must_use]
    pub fn reserved_cpus(&self) -> u32 {
        self.reserved_cpus.load(Ordering::SeqCst)
    }

    pub fn set_exclusive_control_cpus(&self, exclusive: bool) {
        self.exclusive_control_cpus.store(exclusive, Ordering::SeqCst);
    }

    #[must_use]
    pub fn exclusive_control_cpus(&self) -> bool {
        self.exclusive_control_cpus.load(Ordering::SeqCst)
    }

    /// CPUs assignable to RTOS workloads.
    #[must_use]
    pub fn client_cpu_capacity(&self) -> u32 {
        let HostCpuCounts {
            physical,
            linux_visible,
        } = self.cpu_counts;
        if self.pedestal.is_hypervisor() {
            if self.exclusive_control_cpus() && physical > linux_visible {
                return physical - linux_visible;
            }
            return physical;
        }
        physical.saturating_sub(self.reserved_cpus())
    }

    /// Live memory snapshot, preferring hypervisor-reported totals.
    pub async fn memory(&self) -> HostMemory {
        let mut memory = match tokio::fs::read_to_string(&self.meminfo_path).await {
            Ok(text) => parse_meminfo(&text),
            Err(e) => {
                debug!("failed to read {}: {}", self.meminfo_path.display(), e);
                HostMemory::default()
            }
        };
        if self.pedestal == PedestalKind::Xen {
            match self.xl.info().await {
                Ok(info) => {
                    memory.total_mib = info.total_memory_mib;
                    memory.free_mib = info.free_memory_mib;
                }
                Err(e) => debug!("failed to get hypervisor memory info: {}", e),
            }
        }
        memory
    }

    /// CPUs the control OS runs on.
    ///
    /// Under the hypervisor this is the control domain's hard affinity;
    /// elsewhere it is the first `linux_visible` CPUs.
    pub async fn control_os_cpuset(&self) -> Result<CpuSet> {
        if self.pedestal == PedestalKind::Xen {
            return self.xl.control_os_cpuset(self.cpu_counts.physical).await;
        }
        Ok(CpuSet::first_n(self.cpu_counts.linux_visible))
    }

    /// CPUs left for workloads once the control OS set is removed.
    pub async fn client_cpuset(&self) -> Result<CpuSet> {
        let all = CpuSet::first_n(self.cpu_counts.physical);
        if self.pedestal.is_hypervisor() && !self.exclusive_control_cpus() {
            return Ok(all);
        }
        Ok(all.difference(&self.control_os_cpuset().await?))
    }
}

fn logical_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|n| u32::try_from(n.get()).unwrap_or(u32::MAX))
        .unwrap_or(1)
}

/// Parses `/proc/meminfo` into MiB totals.
pub fn parse_meminfo(text: &str) -> HostMemory {
    let mut total_kib = 0u64;
    let mut free_kib = None;
    let mut available_kib = None;
    for line in text.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let value = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        match key.trim() {
            "MemTotal" => total_kib = value,
            "MemFree" => free_kib = Some(value),
            "MemAvailable" => available_kib = Some(value),
            _ => {}
        }
    }
    let to_mib = |kib: u64| u32::try_from((kib << 10) >> MIB_SHIFT).unwrap_or(u32::MAX);
    HostMemory {
        total_mib: to_mib(total_kib),
        free_mib: to_mib(available_kib.or(free_kib).unwrap_or(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory(pedestal: PedestalKind, physical: u32, visible: u32) -> HostInventory {
        HostInventory::with_facts(
            pedestal,
            HostCpuCounts {
                physical,
                linux_visible: visible,
            },
            Xl::new(Arc::new(SystemCommandRunner)),
        )
    }

    #[test]
    fn test_pedestal_parse() {
        assert_eq!(PedestalKind::parse(""), PedestalKind::Xen);
        assert_eq!(PedestalKind::parse("XEN"), PedestalKind::Xen);
        assert_eq!(PedestalKind::parse("openamp"), PedestalKind::OpenAmp);
        assert_eq!(PedestalKind::parse("vmware"), PedestalKind::Unsupported);
    }

    #[test]
    fn test_capabilities() {
        assert_eq!(
            PedestalKind::Xen.capabilities().suspend,
            SuspendMode::Hypervisor
        );
        assert_eq!(
            PedestalKind::OpenAmp.capabilities().suspend,
            SuspendMode::StopStart
        );
        assert!(!PedestalKind::Acrn.capabilities().credit_scheduler);
    }

    #[test]
    fn test_client_capacity_hypervisor() {
        let inv = inventory(PedestalKind::Xen, 8, 2);
        assert_eq!(inv.client_cpu_capacity(), 8);
        inv.set_exclusive_control_cpus(true);
        assert_eq!(inv.client_cpu_capacity(), 6);
        // Reservation is ignored under the hypervisor.
        inv.set_reserved_cpus(3);
        assert_eq!(inv.client_cpu_capacity(), 6);
    }

    #[test]
    fn test_client_capacity_bare_metal() {
        let inv = inventory(PedestalKind::OpenAmp, 4, 4);
        assert_eq!(inv.client_cpu_capacity(), 4);
        inv.set_reserved_cpus(1);
        assert_eq!(inv.client_cpu_capacity(), 3);
        inv.set_reserved_cpus(99);
        assert_eq!(inv.reserved_cpus(), 4);
        assert_eq!(inv.client_cpu_capacity(), 0);
    }

    #[test]
    fn test_linux_visible_clamped() {
        let inv = inventory(PedestalKind::Xen, 2, 16);
        assert_eq!(inv.cpu_counts().linux_visible, 2);
        assert_eq!(inv.max_cpu_capacity(), 200);
    }

    #[test]
    fn test_parse_meminfo() {
        let text = "MemTotal:        2097152 kB\nMemFree:          102400 kB\nMemAvailable:    1048576 kB\n";
        let mem = parse_meminfo(text);
        assert_eq!(mem.total_mib, 2048);
        assert_eq!(mem.free_mib, 1024);
    }

    #[test]
    fn test_probe_mock_and_missing() {
        let probe = PedestalProbe {
            xen_marker: PathBuf::from("/nonexistent/xenbus"),
            acrn_marker: PathBuf::from("/nonexistent/acrn"),
            modules_path: PathBuf::from("/nonexistent/modules"),
            mock: false,
        };
        assert_eq!(probe.detect(), PedestalKind::Unsupported);
        let mock = PedestalProbe { mock: true, ..probe };
        assert_eq!(mock.detect(), PedestalKind::Xen);
    }

    #[test]
    fn test_parse_kernel_modules() {
        let listing = "xen_gntdev 24576 0 - Live 0x0\nxen_gntalloc 16384 0 - Live 0x0\n";
        let loaded = parse_kernel_modules(listing);
        assert!(loaded.contains("xen_gntdev"));
        assert!(!loaded.contains("xen_mcsback"));
    }
}
