//! Daemon client.
//!
//! Maps workload operations onto the transport:
//!
//! | Operation | Endpoint          | Payload               |
//! |-----------|-------------------|-----------------------|
//! | create    | creation socket   | packed create message |
//! | status    | creation socket   | `status`              |
//! | start     | workload socket   | `start`               |
//! | stop      | workload socket   | `stop`                |
//! | remove    | workload socket   | `rm`                  |
//! | update    | workload socket   | `set <Key> <value>`   |
//!
//! Pause and resume depend on the pedestal's [`SuspendMode`]: true suspend
//! through the hypervisor toolstack, or `stop`/`start` through the daemon.

use super::command::{ControlCommand, UpdateDirective};
use super::message::CreateMessage;
use super::status::{WorkloadStatus, find_status, parse_status_listing};
use super::transport::{DaemonTransport, Endpoint};
use crate::constants::validate_workload_id;
use crate::error::{Error, Result};
use crate::host::{SuspendMode, Xl};
use std::sync::Arc;
use tracing::{debug, info};

/// Client for the control daemon.
#[derive(Clone)]
pub struct DaemonClient {
    transport: Arc<dyn DaemonTransport>,
    host_cpus: u32,
    suspend: SuspendMode,
    xl: Option<Xl>,
}

impl std::fmt::Debug for DaemonClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonClient")
            .field("host_cpus", &self.host_cpus)
            .field("suspend", &self.suspend)
            .finish_non_exhaustive()
    }
}

impl DaemonClient {
    /// Creates a client that aliases pause/resume to stop/start.
    #[must_use]
    pub fn new(transport: Arc<dyn DaemonTransport>) -> Self {
        Self {
            transport,
            host_cpus: 0,
            suspend: SuspendMode::StopStart,
            xl: None,
        }
    }

    /// Host CPU count used for blank CPU fields in status replies.
    #[must_use]
    pub fn with_host_cpus(mut self, cpus: u32) -> Self {
        self.host_cpus = cpus;
        self
    }

    /// Suspends through the hypervisor toolstack instead of stop/start.
    #[must_use]
    pub fn with_hypervisor_suspend(mut self, xl: Xl) -> Self {
        self.suspend = SuspendMode::Hypervisor;
        self.xl = Some(xl);
        self
    }

    #[must_use]
    pub fn suspend_mode(&self) -> SuspendMode {
        self.suspend
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn DaemonTransport> {
        &self.transport
    }

    /// Returns true if the workload's socket exists.
    #[must_use]
    pub fn workload_exists(&self, id: &str) -> bool {
        self.transport
            .endpoint_available(&Endpoint::Workload(id.to_string()))
    }

    /// Creates a workload.
    pub async fn create(&self, message: &CreateMessage) -> Result<()> {
        check_id(&message.name)?;
        info!("creating workload {} from {}", message.name, message.image_path);
        self.transport
            .transact(&Endpoint::Create, &message.pack(), "create")
            .await
            .map(drop)
    }

    pub async fn start(&self, id: &str) -> Result<()> {
        self.send(id, ControlCommand::Start).await
    }

    /// Stops a workload. A workload without a socket is already down.
    pub async fn stop(&self, id: &str) -> Result<()> {
        check_id(id)?;
        if !self.workload_exists(id) {
            info!("{} is already down, no need to stop it", id);
            return Ok(());
        }
        self.send(id, ControlCommand::Stop).await
    }

    /// Removes a workload. A workload without a socket is already gone.
    pub async fn remove(&self, id: &str) -> Result<()> {
        check_id(id)?;
        if !self.workload_exists(id) {
            debug!("{} has no socket, nothing to remove", id);
            return Ok(());
        }
        self.send(id, ControlCommand::Remove).await
    }

    pub async fn pause(&self, id: &str) -> Result<()> {
        check_id(id)?;
        match (self.suspend, &self.xl) {
            (SuspendMode::Hypervisor, Some(xl)) => xl.pause(id).await,
            _ => self.send(id, ControlCommand::Stop).await,
        }
    }

    pub async fn resume(&self, id: &str) -> Result<()> {
        check_id(id)?;
        match (self.suspend, &self.xl) {
            (SuspendMode::Hypervisor, Some(xl)) => xl.unpause(id).await,
            _ => self.send(id, ControlCommand::Start).await,
        }
    }

    /// Sends one resource update to the workload's socket.
    pub async fn update(&self, id: &str, directive: UpdateDirective) -> Result<()> {
        self.send(id, ControlCommand::Update(directive)).await
    }

    /// Status of one workload.
    ///
    /// The query goes to the creation socket, which answers for every
    /// workload; the line for `id` is picked out of the listing.
    pub async fn status(&self, id: &str) -> Result<WorkloadStatus> {
        check_id(id)?;
        let text = self.query_status().await?;
        find_status(&text, id, self.host_cpus)
    }

    /// Status of every workload the daemon knows about.
    pub async fn list(&self) -> Result<Vec<WorkloadStatus>> {
        let text = self.query_status().await?;
        parse_status_listing(&text, self.host_cpus)
    }

    async fn query_status(&self) -> Result<String> {
        let command = ControlCommand::Status.encode();
        self.transport
            .transact(&Endpoint::Create, command.as_bytes(), &command)
            .await
    }

    async fn send(&self, id: &str, command: ControlCommand) -> Result<()> {
        check_id(id)?;
        let text = command.encode();
        debug!("{} <- {}", id, text);
        self.transport
            .transact(&Endpoint::Workload(id.to_string()), text.as_bytes(), &text)
            .await
            .map(drop)
    }
}

fn check_id(id: &str) -> Result<()> {
    validate_workload_id(id).map_err(|reason| Error::InvalidWorkloadId {
        id: id.to_string(),
        reason,
    })
}
