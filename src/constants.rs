//! # Control Plane Constants
//!
//! Wire widths, socket locations, timeouts and resource defaults shared by
//! the planner, the executor and the daemon client. These constants are the
//! **single source of truth** for anything that must stay byte-compatible
//! with the external control daemon.
//!
//! ## Modification Guidelines
//!
//! The `*_FIELD_LEN` values mirror the daemon's native create struct. Changing
//! any of them (or their order in [`crate::protocol::message`]) breaks wire
//! compatibility with every deployed daemon. Treat them as frozen.
//!
//! ## Cross-References
//!
//! - [`crate::protocol`]: message layout, sentinels, socket paths
//! - [`crate::resources`]: weight/capacity conversion defaults
//! - [`crate::host`]: hypervisor CLI names and control markers
//! - [`crate::daemon`]: PID file and service name

use std::time::Duration;

// =============================================================================
// Create Message Layout
// =============================================================================
//
// Field widths of the daemon's native create struct, in wire order:
//
//   name(66) path(256) ped(16) pedcfg(256) debug(1) cpu(128)   = 723 bytes
//   pad(1)                                                      -> 724
//   vcpu maxvcpu weight capacity memory threshold (6 x u32 LE)  -> 748
//   iomem(512) network(512)                                     -> 1772
// =============================================================================

/// Width of the workload name field.
///
/// Doubles as the maximum workload identifier length: an identifier that does
/// not fit here could collide with another after truncation.
pub const NAME_FIELD_LEN: usize = 66;

/// Width of the image path field.
pub const PATH_FIELD_LEN: usize = 256;

/// Width of the pedestal name field.
pub const PEDESTAL_FIELD_LEN: usize = 16;

/// Width of the pedestal configuration path field.
pub const PEDESTAL_CONFIG_FIELD_LEN: usize = 256;

/// Width of the debug flag field.
pub const DEBUG_FIELD_LEN: usize = 1;

/// Width of the CPU-set string field.
pub const CPU_STRING_FIELD_LEN: usize = 128;

/// Width of the reserved I/O memory field.
pub const IOMEM_FIELD_LEN: usize = 512;

/// Width of the network description field.
pub const NETWORK_FIELD_LEN: usize = 512;

/// Number of little-endian `u32` fields after the string prefix.
pub const CREATE_MESSAGE_INT_FIELDS: usize = 6;

/// Total size of a packed create message in bytes.
pub const CREATE_MESSAGE_LEN: usize = 1772;

// =============================================================================
// Daemon Protocol
// =============================================================================

/// Substring the daemon emits when a request succeeded.
pub const SUCCESS_SENTINEL: &str = "MICA-SUCCESS";

/// Substring the daemon emits when a request failed.
pub const FAILURE_SENTINEL: &str = "MICA-FAILED";

/// Directory holding the creation socket and every per-workload socket.
pub const DEFAULT_STATE_DIR: &str = "/run/mica";

/// File name of the well-known creation socket inside the state directory.
pub const CREATE_SOCKET_NAME: &str = "mica-create.socket";

/// Suffix appended to a workload identifier to form its socket file name.
pub const WORKLOAD_SOCKET_SUFFIX: &str = ".socket";

/// Read deadline for a single daemon request.
///
/// **Reliability**: The daemon may hang while a pedestal boots a guest.
/// Every request is bounded by this deadline and surfaces a distinct timeout
/// error rather than blocking the caller forever.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Size of each socket read into the accumulating reply buffer.
pub const READ_CHUNK_SIZE: usize = 512;

/// Upper bound on an accumulated reply (1 MiB).
///
/// **Security**: A misbehaving daemon that streams bytes without ever emitting
/// a sentinel would otherwise grow the buffer until the deadline expires.
pub const MAX_REPLY_SIZE: usize = 1024 * 1024;

// =============================================================================
// Daemon Supervision
// =============================================================================

/// PID file written by the control daemon.
pub const DEFAULT_PID_FILE: &str = "/run/micad.pid";

/// System service name of the control daemon.
pub const DEFAULT_DAEMON_SERVICE: &str = "micad";

/// How long to wait for a freshly started daemon before re-probing.
pub const DAEMON_START_SETTLE: Duration = Duration::from_millis(500);

// =============================================================================
// Resource Defaults
// =============================================================================

/// vCPU count of a workload with no CPU constraints.
pub const DEFAULT_VCPU_COUNT: u32 = 1;

/// Maximum vCPU count written to the create message when none is configured.
pub const DEFAULT_MAX_VCPUS: u32 = 8;

/// Smallest memory size, in MiB, a workload is created with.
pub const DEFAULT_MIN_MEMORY_MIB: u32 = 16;

/// cgroup `cpu.shares` default.
pub const DEFAULT_CPU_SHARES: u64 = 1024;

/// Hypervisor scheduler default weight.
pub const DEFAULT_SCHED_WEIGHT: u32 = 256;

/// Fixed ratio between cgroup shares and scheduler weight.
pub const SHARES_PER_WEIGHT: u64 = DEFAULT_CPU_SHARES / DEFAULT_SCHED_WEIGHT as u64;

/// Lowest scheduler weight accepted by the hypervisor.
pub const MIN_SCHED_WEIGHT: u32 = 1;

/// Highest scheduler weight accepted by the hypervisor.
pub const MAX_SCHED_WEIGHT: u32 = 65535;

/// Capacity units per physical CPU (capacity is a percentage of one core).
pub const CAPACITY_PER_CPU: u32 = 100;

/// Bytes per MiB, as a shift.
pub const MIB_SHIFT: u32 = 20;

/// Highest CPU index a CPU set may name.
///
/// **Security**: Ranges are expanded member by member, so masks from OCI
/// configs or daemon replies are bounded before expansion. Matches the
/// largest `NR_CPUS` the kernel can be built with.
pub const MAX_CPU_INDEX: u32 = 8191;

// =============================================================================
// Host Probing
// =============================================================================

/// Hypervisor management CLI.
pub const HYPERVISOR_CLI: &str = "xl";

/// Hypervisor key-value store read CLI.
pub const XENSTORE_READ_CLI: &str = "xenstore-read";

/// Control filesystem entry present only under the hypervisor pedestal.
pub const XEN_CONTROL_MARKER: &str = "/proc/xen/xenbus";

/// Device node exposed by the alternate hypervisor's service module.
pub const ACRN_CONTROL_MARKER: &str = "/dev/acrn_hsm";

/// Kernel modules the hypervisor pedestal expects to be loaded.
pub const XEN_KERNEL_MODULES: &[&str] = &["xen_gntalloc", "xen_gntdev", "xen_mcsback"];

/// Loaded-kernel-module listing.
pub const KERNEL_MODULES_PATH: &str = "/proc/modules";

/// Name of the control domain in hypervisor listings.
pub const CONTROL_DOMAIN_NAME: &str = "Domain-0";

/// Timeout for short verification commands against the hypervisor CLI.
pub const VERIFY_COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

// =============================================================================
// Identifier Validation
// =============================================================================

/// Maximum workload identifier length in bytes.
pub const MAX_WORKLOAD_ID_LEN: usize = NAME_FIELD_LEN;

/// Validates a workload identifier before it is used in a socket path or a
/// create message.
///
/// **Security**: The identifier is joined onto the state directory, so path
/// separators and dot segments are rejected outright.
pub fn validate_workload_id(id: &str) -> std::result::Result<(), &'static str> {
    if id.is_empty() {
        return Err("workload ID cannot be empty");
    }
    if id.len() > MAX_WORKLOAD_ID_LEN {
        return Err("workload ID exceeds maximum length");
    }
    if id == "." || id == ".." {
        return Err("workload ID cannot be a dot segment");
    }
    if id.contains('/') || id.contains('\0') {
        return Err("workload ID contains invalid characters");
    }
    if id.chars().any(char::is_whitespace) {
        return Err("workload ID cannot contain whitespace");
    }
    Ok(())
}
