//! Workload registry.
//!
//! Maps workload identifiers to their executor and lifecycle state. An entry
//! is created only after the daemon accepted the create message and is
//! dropped when the workload is removed, so a record never outlives the
//! daemon-side workload it describes.
//!
//! Lifecycle operations drive the [`ContainerState`] of the entry:
//!
//! ```text
//!   create ──► Creating ──► Stopped ◄──stop── Running ◄──start── Stopped
//!                                             Running ──pause──► Paused
//!                                             Paused ──resume──► Running
//! ```

use crate::config::RuntimeConfig;
use crate::constants::{DEFAULT_MIN_MEMORY_MIB, validate_workload_id};
use crate::error::{Error, Result};
use crate::executor::{ResourceExecutor, WorkloadRecord};
use crate::host::HostInventory;
use crate::protocol::{CreateMessage, CreateOptions, DaemonClient, WorkloadStatus};
use crate::resources::ResourcePlanner;
use crate::state::{ContainerState, LifecycleState};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// One registered workload.
#[derive(Debug)]
pub struct Workload {
    executor: Mutex<ResourceExecutor>,
    state: Mutex<ContainerState>,
}

impl Workload {
    /// Executor holding the workload's resource record.
    pub fn executor(&self) -> &Mutex<ResourceExecutor> {
        &self.executor
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> LifecycleState {
        self.state.lock().await.state
    }
}

/// Registry of live workloads.
pub struct WorkloadRegistry {
    client: DaemonClient,
    host: Arc<HostInventory>,
    toolstack_updates: bool,
    default_max_vcpus: u32,
    min_memory_mib: u32,
    workloads: RwLock<HashMap<String, Arc<Workload>>>,
}

impl std::fmt::Debug for WorkloadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadRegistry")
            .field("toolstack_updates", &self.toolstack_updates)
            .field("default_max_vcpus", &self.default_max_vcpus)
            .field("min_memory_mib", &self.min_memory_mib)
            .finish_non_exhaustive()
    }
}

impl WorkloadRegistry {
    #[must_use]
    pub fn new(client: DaemonClient, host: Arc<HostInventory>) -> Self {
        Self {
            client,
            host,
            toolstack_updates: false,
            default_max_vcpus: 0,
            min_memory_mib: DEFAULT_MIN_MEMORY_MIB,
            workloads: RwLock::new(HashMap::new()),
        }
    }

    /// Registry using the update path, vCPU cap and memory floor from
    /// `config`.
    #[must_use]
    pub fn from_config(
        config: &RuntimeConfig,
        client: DaemonClient,
        host: Arc<HostInventory>,
    ) -> Self {
        Self::new(client, host)
            .with_toolstack_updates(config.hypervisor_cli_updates)
            .with_default_max_vcpus(config.default_max_vcpus)
            .with_min_memory(config.min_memory_mib)
    }

    /// Routes resource updates through the hypervisor CLI when possible.
    #[must_use]
    pub fn with_toolstack_updates(mut self, enabled: bool) -> Self {
        self.toolstack_updates = enabled;
        self
    }

    /// Max vCPU count used when create options leave it at zero.
    #[must_use]
    pub fn with_default_max_vcpus(mut self, max_vcpus: u32) -> Self {
        self.default_max_vcpus = max_vcpus;
        self
    }

    /// Memory floor for workloads created without a memory size.
    #[must_use]
    pub fn with_min_memory(mut self, mib: u32) -> Self {
        self.min_memory_mib = mib;
        self
    }

    #[must_use]
    pub fn client(&self) -> &DaemonClient {
        &self.client
    }

    /// Planner for the host pedestal with this registry's memory floor.
    #[must_use]
    pub fn planner(&self) -> ResourcePlanner {
        ResourcePlanner::for_pedestal(self.host.pedestal()).with_min_memory(self.min_memory_mib)
    }

    /// Creates a workload and registers it in the `Stopped` state.
    pub async fn create(&self, mut options: CreateOptions) -> Result<Arc<Workload>> {
        validate_workload_id(&options.name).map_err(|reason| Error::InvalidWorkloadId {
            id: options.name.clone(),
            reason,
        })?;
        if self.contains(&options.name)? {
            return Err(Error::WorkloadAlreadyExists(options.name));
        }
        if options.max_vcpus == 0 {
            options.max_vcpus = self.default_max_vcpus;
        }

        let id = options.name.clone();
        let mut state = ContainerState::new(&id);
        let message = CreateMessage::resolve(options, self.min_memory_mib);
        self.client.create(&message).await?;
        state.transition(LifecycleState::Creating, LifecycleState::Stopped)?;

        let executor = ResourceExecutor::new(
            &id,
            WorkloadRecord::from_create(&message),
            self.client.clone(),
            Arc::clone(&self.host),
        )
        .with_toolstack_updates(self.toolstack_updates);
        let workload = Arc::new(Workload {
            executor: Mutex::new(executor),
            state: Mutex::new(state),
        });

        let mut workloads = self
            .workloads
            .write()
            .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))?;
        if workloads.contains_key(&id) {
            return Err(Error::WorkloadAlreadyExists(id));
        }
        workloads.insert(id.clone(), Arc::clone(&workload));
        info!("registered workload {}", id);
        Ok(workload)
    }

    /// Looks up a registered workload.
    pub fn get(&self, id: &str) -> Result<Arc<Workload>> {
        let workloads = self
            .workloads
            .read()
            .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))?;
        workloads
            .get(id)
            .cloned()
            .ok_or_else(|| Error::WorkloadNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        let workloads = self
            .workloads
            .read()
            .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))?;
        Ok(workloads.contains_key(id))
    }

    /// Registered identifiers, sorted.
    pub fn ids(&self) -> Result<Vec<String>> {
        let workloads = self
            .workloads
            .read()
            .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))?;
        let mut ids: Vec<String> = workloads.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    pub fn len(&self) -> Result<usize> {
        let workloads = self
            .workloads
            .read()
            .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))?;
        Ok(workloads.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub async fn start(&self, id: &str) -> Result<()> {
        self.step(id, LifecycleState::Stopped, LifecycleState::Running)
            .await
    }

    pub async fn stop(&self, id: &str) -> Result<()> {
        let workload = self.get(id)?;
        let mut state = workload.state.lock().await;
        let current = state.state;
        if !current.can_transition_to(LifecycleState::Stopped) {
            return Err(Error::InvalidTransition {
                from: current.to_string(),
                to: LifecycleState::Stopped.to_string(),
            });
        }
        self.client.stop(id).await?;
        state.transition(current, LifecycleState::Stopped)
    }

    pub async fn pause(&self, id: &str) -> Result<()> {
        self.step(id, LifecycleState::Running, LifecycleState::Paused)
            .await
    }

    pub async fn resume(&self, id: &str) -> Result<()> {
        self.step(id, LifecycleState::Paused, LifecycleState::Running)
            .await
    }

    /// Status as reported by the daemon.
    pub async fn status(&self, id: &str) -> Result<WorkloadStatus> {
        self.client.status(id).await
    }

    /// Removes the workload from the daemon and forgets its record.
    ///
    /// Removing an unknown workload still asks the daemon to remove it, which
    /// is a no-op when its socket is gone.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.client.remove(id).await?;
        let removed = self
            .workloads
            .write()
            .map_err(|e| Error::Internal(format!("lock poisoned: {}", e)))?
            .remove(id);
        match removed {
            Some(_) => info!("deleted workload {}", id),
            None => warn!("workload {} was not registered", id),
        }
        Ok(())
    }

    async fn step(&self, id: &str, from: LifecycleState, to: LifecycleState) -> Result<()> {
        let workload = self.get(id)?;
        let mut state = workload.state.lock().await;
        if state.state != from {
            return Err(Error::InvalidState {
                kind: "container",
                state: state.state.to_string(),
                expected: from.to_string(),
            });
        }
        match to {
            LifecycleState::Running if from == LifecycleState::Paused => {
                self.client.resume(id).await?
            }
            LifecycleState::Running => self.client.start(id).await?,
            LifecycleState::Paused => self.client.pause(id).await?,
            _ => {}
        }
        state.transition(from, to)
    }
}
