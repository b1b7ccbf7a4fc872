//! Host probing and hypervisor toolstack access.
//!
//! - [`command`]: the [`CommandRunner`] seam every external program goes through
//! - [`xl`]: hypervisor toolstack wrapper and output parsers
//! - [`inventory`]: pedestal detection and CPU/memory facts

pub mod command;
pub mod inventory;
pub mod xl;

pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use inventory::{
    HostCpuCounts, HostInventory, HostMemory, PedestalCapabilities, PedestalKind, PedestalProbe,
    SuspendMode,
};
pub use xl::{VcpuEntry, Xl, XlInfo};
