//! Control daemon supervision.
//!
//! The daemon writes its PID to a file. Liveness is a zero-signal probe of
//! that PID. When the daemon is not alive, exactly one start attempt is made
//! through the first available service manager, followed by one re-probe.
//! There is no further retry.

use crate::constants::{
    CREATE_SOCKET_NAME, DAEMON_START_SETTLE, DEFAULT_DAEMON_SERVICE, DEFAULT_PID_FILE,
    DEFAULT_STATE_DIR,
};
use crate::error::{Error, Result};
use crate::host::command::{CommandRunner, SystemCommandRunner, args, run_checked};
use crate::protocol::transport::is_socket;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of a supervision check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    /// Process alive and the creation socket is present.
    RunningReady,
    /// Process alive but not listening yet.
    RunningNotListening,
    NotRunning,
}

/// Daemon process details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DaemonStatus {
    pub pid: Option<i32>,
    pub state: DaemonState,
}

impl DaemonStatus {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state != DaemonState::NotRunning
    }

    #[must_use]
    pub fn listening(&self) -> bool {
        self.state == DaemonState::RunningReady
    }
}

/// Service managers tried, in order.
const SERVICE_MANAGERS: &[&str] = &["systemctl", "service"];

/// Detects, launches and verifies the control daemon.
pub struct DaemonSupervisor {
    pid_file: PathBuf,
    service: String,
    create_socket: PathBuf,
    settle: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for DaemonSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonSupervisor")
            .field("pid_file", &self.pid_file)
            .field("service", &self.service)
            .field("create_socket", &self.create_socket)
            .finish_non_exhaustive()
    }
}

impl Default for DaemonSupervisor {
    fn default() -> Self {
        Self::new(Arc::new(SystemCommandRunner))
    }
}

impl DaemonSupervisor {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            service: DEFAULT_DAEMON_SERVICE.to_string(),
            create_socket: Path::new(DEFAULT_STATE_DIR).join(CREATE_SOCKET_NAME),
            settle: DAEMON_START_SETTLE,
            runner,
        }
    }

    #[must_use]
    pub fn with_pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pid_file = path.into();
        self
    }

    #[must_use]
    pub fn with_service(mut self, name: impl Into<String>) -> Self {
        self.service = name.into();
        self
    }

    #[must_use]
    pub fn with_create_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.create_socket = path.into();
        self
    }

    /// Wait between the start attempt and the re-probe.
    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// PID of a live daemon, if any.
    pub fn probe(&self) -> Option<i32> {
        let text = match std::fs::read_to_string(&self.pid_file) {
            Ok(text) => text,
            Err(e) => {
                debug!("cannot read {}: {}", self.pid_file.display(), e);
                return None;
            }
        };
        let pid: i32 = match text.trim().parse() {
            Ok(pid) if pid > 0 => pid,
            _ => {
                debug!("invalid pid {:?} in {}", text.trim(), self.pid_file.display());
                return None;
            }
        };
        process_alive(pid).then_some(pid)
    }

    /// Starts the daemon with the first available service manager.
    pub async fn launch(&self) -> Result<()> {
        let manager = SERVICE_MANAGERS
            .iter()
            .find(|m| self.runner.is_installed(m))
            .ok_or_else(|| {
                Error::DaemonNotRunning(format!(
                    "no service manager found to start {}",
                    self.service
                ))
            })?;

        let argv = match *manager {
            "systemctl" => args(["start", self.service.as_str()]),
            _ => args([self.service.as_str(), "start"]),
        };
        run_checked(self.runner.as_ref(), manager, &argv, None).await?;
        info!("{} started via {}", self.service, manager);
        Ok(())
    }

    /// Probes the daemon, attempting one start if it is not alive.
    pub async fn state(&self) -> DaemonStatus {
        let pid = match self.probe() {
            Some(pid) => Some(pid),
            None => {
                if let Err(e) = self.launch().await {
                    warn!("failed to start {}: {}", self.service, e);
                } else if !self.settle.is_zero() {
                    tokio::time::sleep(self.settle).await;
                }
                self.probe()
            }
        };

        let state = match pid {
            None => DaemonState::NotRunning,
            Some(_) if is_socket(&self.create_socket) => DaemonState::RunningReady,
            Some(_) => DaemonState::RunningNotListening,
        };
        debug!("daemon state {:?} (pid {:?})", state, pid);
        DaemonStatus { pid, state }
    }

    /// Like [`Self::state`], but a daemon that is not running is an error.
    pub async fn ensure_running(&self) -> Result<DaemonStatus> {
        let status = self.state().await;
        if !status.is_active() {
            return Err(Error::DaemonNotRunning(format!(
                "{} is not running; check `{} status` and {}",
                self.service,
                SERVICE_MANAGERS[0],
                self.pid_file.display()
            )));
        }
        Ok(status)
    }
}

fn process_alive(pid: i32) -> bool {
    // SAFETY: signal 0 performs only the existence and permission check.
    let ret = unsafe { libc::kill(pid, 0) };
    ret == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
