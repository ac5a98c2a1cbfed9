//! Start, stop and single-step simulations by ID.
//!
//! The registry is an ordinary value owned by the composition root and
//! shared by reference; there is no process-wide state. Each registered
//! simulation has one [`SimulationRunner`] and at most one running loop.

use std::collections::BTreeMap;

use agora_types::{SimulationId, SimulationUpdate};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::runner::{RunnerError, SimulationResult, SimulationRunner, TickSummary};
use crate::store::StoreError;

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No runner is registered under the ID.
    #[error("simulation {simulation_id} is not registered")]
    NotRegistered {
        /// The simulation.
        simulation_id: SimulationId,
    },

    /// A runner is already registered under the ID.
    #[error("simulation {simulation_id} is already registered")]
    AlreadyRegistered {
        /// The simulation.
        simulation_id: SimulationId,
    },

    /// The simulation's loop is active.
    #[error("simulation {simulation_id} is already running")]
    AlreadyRunning {
        /// The simulation.
        simulation_id: SimulationId,
    },

    /// The simulation has no loop to wait for.
    #[error("simulation {simulation_id} is not running")]
    NotRunning {
        /// The simulation.
        simulation_id: SimulationId,
    },

    /// The running flag could not be written.
    #[error("registry store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// The run itself failed.
    #[error("simulation run failed: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: RunnerError,
    },

    /// The loop task panicked or was cancelled.
    #[error("simulation task failed: {message}")]
    Join {
        /// Description of the failure.
        message: String,
    },
}

type RunHandle = JoinHandle<Result<SimulationResult, RunnerError>>;

struct Entry {
    runner: SimulationRunner,
    handle: Option<RunHandle>,
}

impl Entry {
    fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// Registry of simulations hosted by this process.
#[derive(Default)]
pub struct SimulationRegistry {
    entries: Mutex<BTreeMap<SimulationId, Entry>>,
}

impl SimulationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runner under its simulation ID.
    pub async fn register(&self, runner: SimulationRunner) -> Result<(), RegistryError> {
        let simulation_id = runner.simulation_id();
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&simulation_id) {
            return Err(RegistryError::AlreadyRegistered { simulation_id });
        }
        entries.insert(
            simulation_id,
            Entry {
                runner,
                handle: None,
            },
        );
        Ok(())
    }

    /// Set `running = true` and launch the simulation's loop.
    pub async fn start_simulation(&self, simulation_id: SimulationId) -> Result<(), RegistryError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(&simulation_id)
            .ok_or(RegistryError::NotRegistered { simulation_id })?;
        if entry.is_active() {
            return Err(RegistryError::AlreadyRunning { simulation_id });
        }
        let runner = entry.runner.clone();
        runner
            .versioned()
            .update_with_retry(
                simulation_id,
                SimulationUpdate::running(true),
                runner.conflict_retries(),
            )
            .await?;
        entry.handle = Some(tokio::spawn(async move { runner.run().await }));
        info!(simulation_id = %simulation_id, "simulation started");
        Ok(())
    }

    /// Set `running = false` and wait for the loop to wind down.
    pub async fn stop_simulation(
        &self,
        simulation_id: SimulationId,
    ) -> Result<SimulationResult, RegistryError> {
        let runner = {
            let entries = self.entries.lock().await;
            entries
                .get(&simulation_id)
                .map(|e| e.runner.clone())
                .ok_or(RegistryError::NotRegistered { simulation_id })?
        };
        runner
            .versioned()
            .update_with_retry(
                simulation_id,
                SimulationUpdate::running(false),
                runner.conflict_retries(),
            )
            .await?;
        info!(simulation_id = %simulation_id, "simulation stop requested");
        self.wait_for_end(simulation_id).await
    }

    /// Advance an idle simulation by one sequential tick.
    pub async fn tick_once(&self, simulation_id: SimulationId) -> Result<TickSummary, RegistryError> {
        let runner = {
            let entries = self.entries.lock().await;
            let entry = entries
                .get(&simulation_id)
                .ok_or(RegistryError::NotRegistered { simulation_id })?;
            if entry.is_active() {
                return Err(RegistryError::AlreadyRunning { simulation_id });
            }
            entry.runner.clone()
        };
        Ok(runner.tick_once().await?)
    }

    /// Whether the simulation's loop is active.
    pub async fn is_running(&self, simulation_id: SimulationId) -> bool {
        self.entries
            .lock()
            .await
            .get(&simulation_id)
            .is_some_and(Entry::is_active)
    }

    /// Wait for the simulation's loop to end and return its result.
    pub async fn wait_for_end(
        &self,
        simulation_id: SimulationId,
    ) -> Result<SimulationResult, RegistryError> {
        let handle = {
            let mut entries = self.entries.lock().await;
            let entry = entries
                .get_mut(&simulation_id)
                .ok_or(RegistryError::NotRegistered { simulation_id })?;
            entry
                .handle
                .take()
                .ok_or(RegistryError::NotRunning { simulation_id })?
        };
        let result = handle.await.map_err(|e| RegistryError::Join {
            message: e.to_string(),
        })??;
        Ok(result)
    }
}
