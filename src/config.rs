//! Runtime configuration.
//!
//! Values come from the container runtime's configuration loader as JSON.
//! Every field is optional in the document; missing fields take the defaults
//! below. A single environment switch can enable the toolstack update path
//! without editing the document.

use crate::constants::{
    CREATE_SOCKET_NAME, DEFAULT_DAEMON_SERVICE, DEFAULT_MAX_VCPUS, DEFAULT_MIN_MEMORY_MIB,
    DEFAULT_PID_FILE, DEFAULT_SOCKET_TIMEOUT, DEFAULT_STATE_DIR,
};
use crate::error::Result;
use crate::host::{HostInventory, PedestalKind, PedestalProbe};
use crate::protocol::SocketPaths;
use crate::resources::ResourcePlanner;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Environment variable that enables hypervisor CLI updates.
pub const HYPERVISOR_CLI_UPDATE_ENV: &str = "RTOSRUN_HYPERVISOR_CLI_UPDATE";

/// Control plane configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Max vCPU count written to create messages that do not set one.
    pub default_max_vcpus: u32,
    /// Memory floor of a new workload.
    pub min_memory_mib: u32,
    /// Keep the control OS's CPUs out of client placement (Xen).
    pub exclusive_control_cpus: bool,
    /// CPUs kept for Linux on bare-metal pedestals.
    pub reserved_cpus: u32,
    /// Apply resource updates with the hypervisor CLI instead of the daemon.
    pub hypervisor_cli_updates: bool,
    pub socket_timeout_ms: u64,
    pub state_dir: PathBuf,
    /// Defaults to the well-known socket name under `state_dir`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_socket: Option<PathBuf>,
    pub pid_file: PathBuf,
    pub daemon_service: String,
    /// Pretend to run on the hypervisor pedestal.
    pub mock_pedestal: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_max_vcpus: DEFAULT_MAX_VCPUS,
            min_memory_mib: DEFAULT_MIN_MEMORY_MIB,
            exclusive_control_cpus: false,
            reserved_cpus: 0,
            hypervisor_cli_updates: false,
            socket_timeout_ms: DEFAULT_SOCKET_TIMEOUT.as_millis() as u64,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            create_socket: None,
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            daemon_service: DEFAULT_DAEMON_SERVICE.to_string(),
            mock_pedestal: false,
        }
    }
}

impl RuntimeConfig {
    /// Parses a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Applies environment overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var(HYPERVISOR_CLI_UPDATE_ENV)
            && parse_flag(&value)
        {
            info!("{} set, enabling hypervisor CLI updates", HYPERVISOR_CLI_UPDATE_ENV);
            self.hypervisor_cli_updates = true;
        }
        self
    }

    #[must_use]
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    /// Socket locations described by this configuration.
    #[must_use]
    pub fn socket_paths(&self) -> SocketPaths {
        let mut paths = SocketPaths::under(&self.state_dir);
        if let Some(create) = &self.create_socket {
            paths.create_socket = create.clone();
        }
        paths
    }

    #[must_use]
    pub fn create_socket_path(&self) -> PathBuf {
        self.create_socket
            .clone()
            .unwrap_or_else(|| self.state_dir.join(CREATE_SOCKET_NAME))
    }

    /// Detection probe honoring `mock_pedestal`.
    #[must_use]
    pub fn pedestal_probe(&self) -> PedestalProbe {
        PedestalProbe {
            mock: self.mock_pedestal,
            ..PedestalProbe::default()
        }
    }

    /// Planner for `pedestal` using the configured memory floor.
    #[must_use]
    pub fn planner(&self, pedestal: PedestalKind) -> ResourcePlanner {
        ResourcePlanner::for_pedestal(pedestal).with_min_memory(self.min_memory_mib)
    }

    /// Pushes the CPU reservation settings into the host inventory.
    pub fn apply(&self, host: &HostInventory) {
        host.set_reserved_cpus(self.reserved_cpus);
        host.set_exclusive_control_cpus(self.exclusive_control_cpus);
    }
}

/// Interprets an environment flag. Empty, `0`, `false` and `no` are off.
#[must_use]
pub fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no"
    )
}
