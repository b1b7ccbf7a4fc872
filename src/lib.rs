//! # rtosrun
//!
//! **Pedestal Resource Control Plane for RTOS Workloads**
//!
//! This crate runs real-time OS images as containers. It does not boot
//! anything itself: an external control daemon owns the pedestal (the
//! hypervisor or partitioning backend hosting the RTOS), and this crate
//! plans resources, talks to that daemon over Unix sockets, and keeps a
//! record of what the daemon accepted.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                             rtosrun                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  OCI LinuxResources ──► ResourcePlanner ──► EssentialResource       │
//! │                              │                     │                │
//! │                        HostInventory         CreateOptions          │
//! │                    (pedestal, CPUs, memory)        │                │
//! │                                                    ▼                │
//! │  ┌──────────────────────────────────────────────────────────────┐   │
//! │  │ WorkloadRegistry ─► ResourceExecutor ─► DaemonClient         │   │
//! │  │   ContainerState      WorkloadRecord       │                 │   │
//! │  │                       need_update_* / update_*               │   │
//! │  └────────────────────────────────────────────┼─────────────────┘   │
//! │                                   ┌───────────┴───────────┐         │
//! │                                   ▼                       ▼         │
//! │                           UnixTransport              Xl toolstack   │
//! │                    create socket / <id>.socket     (Xen fallback)   │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  DaemonSupervisor: pid file probe ─► one service start ─► re-probe  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Daemon Protocol
//!
//! Creation sends a fixed 1772-byte binary record to the creation socket.
//! Every other operation sends a short text command. Replies are free text
//! ending in `MICA-SUCCESS` or `MICA-FAILED`; reading stops at the first
//! sentinel and is bounded by a deadline.
//!
//! | Operation | Socket            | Payload             |
//! |-----------|-------------------|---------------------|
//! | create    | creation          | [`CreateMessage`]   |
//! | status    | creation          | `status`            |
//! | start     | `<id>.socket`     | `start`             |
//! | stop      | `<id>.socket`     | `stop`              |
//! | remove    | `<id>.socket`     | `rm`                |
//! | update    | `<id>.socket`     | `set <Key> <value>` |
//!
//! # Example
//!
//! ```rust,ignore
//! use rtosrun::{
//!     CreateOptions, DaemonClient, HostInventory, RuntimeConfig, UnixTransport,
//!     WorkloadRegistry,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> rtosrun::Result<()> {
//!     let config = RuntimeConfig::default().with_env_overrides();
//!     let host = Arc::new(HostInventory::detect(&config.pedestal_probe()).await);
//!     config.apply(&host);
//!
//!     let transport = UnixTransport::new(config.socket_paths())
//!         .with_timeout(config.socket_timeout());
//!     let client = DaemonClient::new(Arc::new(transport))
//!         .with_host_cpus(host.physical_cpus());
//!     let registry = WorkloadRegistry::from_config(&config, client, Arc::clone(&host));
//!
//!     let plan = registry.planner().plan(None);
//!     let options = CreateOptions::from_plan("zephyr", "/lib/firmware/zephyr.elf",
//!         host.pedestal(), &plan);
//!     registry.create(options).await?;
//!     registry.start("zephyr").await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod cpuset;
pub mod daemon;
pub mod error;
pub mod executor;
pub mod host;
pub mod protocol;
pub mod resources;
pub mod state;
pub mod workload;

// Re-exports
pub use config::RuntimeConfig;
pub use constants::*;
pub use cpuset::CpuSet;
pub use daemon::{DaemonState, DaemonStatus, DaemonSupervisor};
pub use error::{Error, ErrorCategory, Result};
pub use executor::{ReconcileReport, ResourceExecutor, UpdatePath, WorkloadRecord};
pub use host::{
    CommandRunner, HostInventory, PedestalCapabilities, PedestalKind, PedestalProbe,
    SuspendMode, SystemCommandRunner, Xl,
};
pub use protocol::{
    ControlCommand, CreateMessage, CreateOptions, DaemonClient, DaemonClientState,
    DaemonTransport, Endpoint, ServiceTag, SocketPaths, UnixTransport, UpdateDirective,
    WorkloadStatus,
};
pub use resources::{
    EssentialResource, OciResources, ResourcePlanner, plan_essential_resources,
};
pub use state::{ContainerState, LifecycleState, SandboxState};
pub use workload::{Workload, WorkloadRegistry};
