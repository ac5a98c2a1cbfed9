//! Top-level control loop of one simulation.
//!
//! [`SimulationRunner`] owns the persisted tick counter and picks one of two
//! paths from [`ExecutionMode`]:
//!
//! - **Sequential**: [`tick_once`](SimulationRunner::tick_once) advances the
//!   counter, ticks every resource and then every agent in ascending ID
//!   order, one at a time. Reproducible by construction.
//! - **Clustered**: a [`ClusterScheduler`] advances clusters independently;
//!   the runner only polls the record, persists the global tick as it
//!   advances, and requests the catch-up stop.
//!
//! Both paths end when the record's `running` flag is cleared, when
//! `max_ticks` is reached, when no agent is alive, or when version conflicts
//! on the record keep preventing progress. The clustered path also ends, with
//! an error, when a cluster loop has failed for good.

use std::time::Duration;

use agora_types::{AgentId, SimEvent, SimulationId, SimulationUpdate};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{ExecutionMode, SchedulerConfig, SimulationBoundsConfig};
use crate::executor::ClusterExecutor;
use crate::publish::publish_event;
use crate::scheduler::{ClusterScheduler, SchedulerError};
use crate::step::{AgentStep, SimulationContext, tick_agent, tick_resource};
use crate::store::StoreError;
use crate::versioned::VersionedStore;

/// Reason why the simulation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SimulationEndReason {
    /// Reached the configured `max_ticks` limit.
    MaxTicksReached,
    /// The record's `running` flag was cleared.
    OperatorStop,
    /// All agents are dead.
    Extinction,
    /// Version conflicts on the record kept preventing progress.
    Desynchronized,
}

/// Errors that end a simulation run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The simulation record could not be read or written.
    #[error("simulation record error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// The cluster scheduler failed to start or to converge.
    #[error("scheduler error: {source}")]
    Scheduler {
        /// The underlying scheduler error.
        #[from]
        source: SchedulerError,
    },

    /// Too many consecutive version conflicts on the simulation record.
    #[error(
        "simulation {simulation_id} desynchronized after {conflicts} consecutive conflicts at tick {tick}"
    )]
    Desynchronized {
        /// The simulation.
        simulation_id: SimulationId,
        /// Consecutive conflicts seen.
        conflicts: u32,
        /// Last persisted tick.
        tick: u64,
    },
}

impl RunnerError {
    /// The end reason this error corresponds to, if any.
    pub const fn end_reason(&self) -> Option<SimulationEndReason> {
        match self {
            Self::Desynchronized { .. } => Some(SimulationEndReason::Desynchronized),
            Self::Store { .. } | Self::Scheduler { .. } => None,
        }
    }
}

/// World state after a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    /// The tick.
    pub tick: u64,
    /// Living agents.
    pub agents_alive: u32,
    /// Resources currently available.
    pub resources_available: u32,
    /// Agents whose step completed this tick (sequential path only).
    pub agents_acted: u32,
    /// Agents skipped because their step failed (sequential path only).
    pub agents_failed: u32,
}

/// Result of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// The reason the simulation ended.
    pub end_reason: SimulationEndReason,
    /// The persisted tick when the run ended.
    pub final_tick: u64,
    /// Number of global ticks this run advanced.
    pub total_ticks: u64,
    /// World state at the end, if any tick completed.
    pub final_summary: Option<TickSummary>,
}

/// Drives one simulation to its end.
#[derive(Clone)]
pub struct SimulationRunner {
    ctx: SimulationContext,
    versioned: VersionedStore,
    scheduler: SchedulerConfig,
    bounds: SimulationBoundsConfig,
}

impl SimulationRunner {
    /// Create a runner.
    pub fn new(
        ctx: SimulationContext,
        scheduler: SchedulerConfig,
        bounds: SimulationBoundsConfig,
    ) -> Self {
        let versioned = VersionedStore::new(ctx.store.clone());
        Self {
            ctx,
            versioned,
            scheduler,
            bounds,
        }
    }

    /// The simulation this runner drives.
    pub const fn simulation_id(&self) -> SimulationId {
        self.ctx.simulation_id
    }

    /// The version-checked record accessor this runner writes through.
    pub const fn versioned(&self) -> &VersionedStore {
        &self.versioned
    }

    /// How many times a conflicting write to the record is retried.
    pub const fn conflict_retries(&self) -> u32 {
        self.bounds.max_conflict_retries
    }

    /// Advance the simulation by one deterministic global tick.
    ///
    /// The counter is persisted first; a conflict or store failure there
    /// aborts the tick before any entity is touched. Resource or agent
    /// failures after that are logged and skipped.
    pub async fn tick_once(&self) -> Result<TickSummary, RunnerError> {
        let ctx = &self.ctx;
        let simulation_id = ctx.simulation_id;
        let current = self.versioned.read(simulation_id).await?;
        let tick = current.tick.checked_add(1).ok_or(StoreError::VersionOverflow {
            simulation: simulation_id,
        })?;
        self.versioned
            .update_from(&current, SimulationUpdate::tick(tick))
            .await?;

        let mut resources = ctx.store.resources(simulation_id).await?;
        resources.sort_by_key(|r| r.id);
        for resource in &resources {
            if let Err(e) = tick_resource(ctx, resource.id, tick).await {
                warn!(
                    simulation_id = %simulation_id,
                    tick,
                    error = %e,
                    "resource transition failed, retrying next tick"
                );
            }
        }

        let mut agents = ctx.store.agents(simulation_id).await?;
        agents.sort_by_key(|a| a.id);
        let mut acted: Vec<AgentId> = Vec::new();
        let mut failed: u32 = 0;
        for agent in agents.iter().filter(|a| !a.dead) {
            match tick_agent(ctx, agent.id, tick).await {
                Ok(AgentStep::Dead) => {}
                Ok(_) => acted.push(agent.id),
                Err(e) => {
                    warn!(agent_id = %agent.id, tick, error = %e, "agent step failed, skipping");
                    failed = failed.saturating_add(1);
                }
            }
        }

        let mut summary = self.summarize(tick).await?;
        summary.agents_acted = count(acted.len());
        summary.agents_failed = failed;

        if !acted.is_empty() {
            publish_event(
                ctx.publisher.as_ref(),
                &SimEvent::TickCompleted {
                    simulation_id,
                    tick,
                    agents: acted,
                },
            );
        }
        self.publish_world(&summary);
        if summary.agents_alive == 0 {
            self.clear_running().await?;
        }
        Ok(summary)
    }

    /// Run until an end condition is met, on the configured path.
    pub async fn run(&self) -> Result<SimulationResult, RunnerError> {
        info!(
            simulation_id = %self.ctx.simulation_id,
            mode = ?self.scheduler.mode,
            max_ticks = self.bounds.max_ticks,
            pacing_interval_ms = self.scheduler.pacing_interval_ms,
            "Simulation starting"
        );
        match self.scheduler.mode {
            ExecutionMode::Sequential => self.run_sequential().await,
            ExecutionMode::Clustered => self.run_clustered().await,
        }
    }

    async fn run_sequential(&self) -> Result<SimulationResult, RunnerError> {
        let simulation_id = self.ctx.simulation_id;
        let mut last_summary: Option<TickSummary> = None;
        let mut total_ticks: u64 = 0;
        let mut conflicts: u32 = 0;

        loop {
            let record = self.versioned.read(simulation_id).await?;
            if !record.running {
                info!(tick = record.tick, "Simulation stop requested");
                return Ok(self.finish(
                    SimulationEndReason::OperatorStop,
                    record.tick,
                    total_ticks,
                    last_summary,
                ));
            }
            if self.max_ticks_reached(record.tick) {
                info!(
                    tick = record.tick,
                    max_ticks = self.bounds.max_ticks,
                    "Tick limit reached"
                );
                self.clear_running().await?;
                return Ok(self.finish(
                    SimulationEndReason::MaxTicksReached,
                    record.tick,
                    total_ticks,
                    last_summary,
                ));
            }

            match self.tick_once().await {
                Ok(summary) => {
                    conflicts = 0;
                    total_ticks = total_ticks.saturating_add(1);
                    if summary.agents_alive == 0 {
                        info!(tick = summary.tick, "All agents dead -- extinction");
                        let tick = summary.tick;
                        return Ok(self.finish(
                            SimulationEndReason::Extinction,
                            tick,
                            total_ticks,
                            Some(summary),
                        ));
                    }
                    last_summary = Some(summary);
                }
                Err(RunnerError::Store { source }) if source.is_conflict() => {
                    conflicts = conflicts.saturating_add(1);
                    warn!(simulation_id = %simulation_id, conflicts, error = %source, "tick counter conflict");
                    if conflicts >= self.bounds.max_conflict_retries {
                        return Err(RunnerError::Desynchronized {
                            simulation_id,
                            conflicts,
                            tick: record.tick,
                        });
                    }
                }
                Err(e) => return Err(e),
            }

            let interval_ms = self.scheduler.pacing_interval_ms;
            if interval_ms > 0 {
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;
            }
        }
    }

    async fn run_clustered(&self) -> Result<SimulationResult, RunnerError> {
        let simulation_id = self.ctx.simulation_id;
        let mut config = self.scheduler.clone();
        if self.bounds.max_ticks > 0 {
            let max = self.bounds.max_ticks;
            config.tick_limit = Some(config.tick_limit.map_or(max, |limit| limit.min(max)));
        }
        let tick_limit = config.tick_limit;
        let scheduler = ClusterScheduler::new(ClusterExecutor::new(self.ctx.clone()), config);

        let start = self.versioned.read(simulation_id).await?;
        scheduler.start(start.tick).await?;
        let mut persisted = start.tick;
        let mut conflicts: u32 = 0;
        let poll = Duration::from_millis(self.scheduler.poll_interval_ms.max(1));

        let outcome = loop {
            tokio::time::sleep(poll).await;
            let record = match self.versioned.read(simulation_id).await {
                Ok(record) => record,
                Err(e) => break Err(RunnerError::from(e)),
            };
            if !record.running {
                info!(tick = record.tick, "Simulation stop requested");
                break Ok(SimulationEndReason::OperatorStop);
            }

            if let Some(global) = scheduler.global_tick().await
                && global > persisted
            {
                match self
                    .versioned
                    .update_from(&record, SimulationUpdate::tick(global))
                    .await
                {
                    Ok(_) => {
                        persisted = global;
                        conflicts = 0;
                        let summary = match self.summarize(global).await {
                            Ok(summary) => summary,
                            Err(e) => break Err(e),
                        };
                        self.publish_world(&summary);
                    }
                    Err(e) if e.is_conflict() => {
                        conflicts = conflicts.saturating_add(1);
                        warn!(simulation_id = %simulation_id, conflicts, error = %e, "tick counter conflict");
                        if conflicts >= self.bounds.max_conflict_retries {
                            break Err(RunnerError::Desynchronized {
                                simulation_id,
                                conflicts,
                                tick: persisted,
                            });
                        }
                    }
                    Err(e) => break Err(RunnerError::from(e)),
                }
            }

            match self.alive_count().await {
                Ok(0) => {
                    info!(tick = persisted, "All agents dead -- extinction");
                    break Ok(SimulationEndReason::Extinction);
                }
                Ok(_) => {}
                Err(e) => break Err(e),
            }
            if tick_limit.is_some_and(|limit| persisted >= limit) {
                info!(tick = persisted, ?tick_limit, "Tick limit reached");
                break Ok(SimulationEndReason::MaxTicksReached);
            }
            if let Some((loop_id, tick)) = scheduler.stalled().await {
                warn!(loop_id = %loop_id, tick, "cluster loop failed for good, ending the run");
                break Err(RunnerError::from(SchedulerError::LoopFailed { loop_id, tick }));
            }
            if !scheduler.is_active().await {
                warn!(tick = persisted, "no cluster loop is running");
                break Ok(SimulationEndReason::OperatorStop);
            }
        };

        let stopped = scheduler.stop().await;
        let reason = outcome?;
        let converged = stopped?;

        let record = self.versioned.read(simulation_id).await?;
        let final_tick = if converged > record.tick {
            self.versioned
                .update_with_retry(
                    simulation_id,
                    SimulationUpdate::tick(converged),
                    self.bounds.max_conflict_retries,
                )
                .await?
                .tick
        } else {
            record.tick
        };
        if record.running {
            self.clear_running().await?;
        }
        let summary = self.summarize(final_tick).await?;
        if final_tick > persisted {
            self.publish_world(&summary);
        }
        let total_ticks = final_tick.saturating_sub(start.tick);
        Ok(self.finish(reason, final_tick, total_ticks, Some(summary)))
    }

    fn finish(
        &self,
        end_reason: SimulationEndReason,
        final_tick: u64,
        total_ticks: u64,
        final_summary: Option<TickSummary>,
    ) -> SimulationResult {
        info!(
            simulation_id = %self.ctx.simulation_id,
            reason = ?end_reason,
            final_tick,
            "Simulation loop finished"
        );
        SimulationResult {
            end_reason,
            final_tick,
            total_ticks,
            final_summary,
        }
    }

    const fn max_ticks_reached(&self, tick: u64) -> bool {
        self.bounds.max_ticks > 0 && tick >= self.bounds.max_ticks
    }

    async fn clear_running(&self) -> Result<(), RunnerError> {
        self.versioned
            .update_with_retry(
                self.ctx.simulation_id,
                SimulationUpdate::running(false),
                self.bounds.max_conflict_retries,
            )
            .await?;
        Ok(())
    }

    async fn alive_count(&self) -> Result<u32, RunnerError> {
        let agents = self.ctx.store.agents(self.ctx.simulation_id).await?;
        Ok(count(agents.iter().filter(|a| !a.dead).count()))
    }

    async fn summarize(&self, tick: u64) -> Result<TickSummary, RunnerError> {
        let simulation_id = self.ctx.simulation_id;
        let agents = self.ctx.store.agents(simulation_id).await?;
        let resources = self.ctx.store.resources(simulation_id).await?;
        Ok(TickSummary {
            tick,
            agents_alive: count(agents.iter().filter(|a| !a.dead).count()),
            resources_available: count(resources.iter().filter(|r| r.available).count()),
            agents_acted: 0,
            agents_failed: 0,
        })
    }

    fn publish_world(&self, summary: &TickSummary) {
        publish_event(
            self.ctx.publisher.as_ref(),
            &SimEvent::WorldUpdated {
                simulation_id: self.ctx.simulation_id,
                world_id: self.ctx.world.id,
                tick: summary.tick,
                agents_alive: summary.agents_alive,
                resources_available: summary.resources_available,
            },
        );
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Log the end of a simulation run.
pub fn log_simulation_end(result: &SimulationResult) {
    info!(
        reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        final_tick = result.final_tick,
        final_agents_alive = result.final_summary.as_ref().map(|s| s.agents_alive),
        "Simulation ended"
    );

    if let Some(ref summary) = result.final_summary {
        info!(
            tick = summary.tick,
            agents_alive = summary.agents_alive,
            resources_available = summary.resources_available,
            "Final tick summary"
        );
    } else {
        warn!("Simulation ended with no ticks executed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use agora_agents::EnergyConfig;
    use agora_types::{Agent, Position};

    use super::*;
    use crate::locks::EntityLocks;
    use crate::memory::MemoryStore;
    use crate::policy::IdlePolicy;
    use crate::publish::RecordingPublisher;
    use crate::scenario::{ScenarioConfig, seed_simulation};
    use crate::store::WorldStore;

    async fn runner_over(
        store: Arc<MemoryStore>,
        bounds: SimulationBoundsConfig,
    ) -> SimulationRunner {
        let id = seed_simulation(store.as_ref(), &ScenarioConfig::default())
            .await
            .unwrap();
        let ctx = SimulationContext::load(
            id,
            store,
            Arc::new(RecordingPublisher::new()),
            Arc::new(IdlePolicy),
            Arc::new(EntityLocks::new(Duration::from_millis(200))),
            EnergyConfig::default(),
        )
        .await
        .unwrap();
        let scheduler = SchedulerConfig {
            pacing_interval_ms: 0,
            ..SchedulerConfig::default()
        };
        SimulationRunner::new(ctx, scheduler, bounds)
    }

    fn idler(simulation_id: SimulationId, x: i32) -> Agent {
        Agent {
            id: AgentId::new(),
            simulation_id,
            name: format!("idler-{x}"),
            position: Position::new(x, 0),
            visibility_range: 2,
            range_per_move: 1,
            energy_level: 100,
            dead: false,
            harvesting: None,
        }
    }

    #[tokio::test]
    async fn tick_once_advances_and_persists_the_counter() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner_over(store.clone(), SimulationBoundsConfig::default()).await;
        let id = runner.simulation_id();
        store.insert_agent(idler(id, 1)).await.unwrap();

        let summary = runner.tick_once().await.unwrap();
        assert_eq!(summary.tick, 1);
        assert_eq!(summary.agents_acted, 1);
        let record = store.simulation(id).await.unwrap();
        assert_eq!(record.tick, 1);
        assert_eq!(record.version, 1);
        assert_eq!(store.action_log(id, None).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn extinction_clears_the_running_flag() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner_over(store.clone(), SimulationBoundsConfig::default()).await;
        let id = runner.simulation_id();
        for x in [1, 9] {
            let mut agent = idler(id, x);
            agent.energy_level = 1;
            store.insert_agent(agent).await.unwrap();
        }
        runner
            .versioned()
            .update_with_retry(id, SimulationUpdate::running(true), 0)
            .await
            .unwrap();

        let summary = runner.tick_once().await.unwrap();
        assert_eq!(summary.agents_alive, 0);
        assert!(store.agents(id).await.unwrap().iter().all(|a| a.dead));
        assert!(!store.simulation(id).await.unwrap().running);
    }

    #[tokio::test]
    async fn sequential_run_stops_at_max_ticks() {
        let store = Arc::new(MemoryStore::new());
        let bounds = SimulationBoundsConfig {
            max_ticks: 4,
            ..SimulationBoundsConfig::default()
        };
        let runner = runner_over(store.clone(), bounds).await;
        let id = runner.simulation_id();
        store.insert_agent(idler(id, 1)).await.unwrap();
        runner
            .versioned()
            .update_with_retry(id, SimulationUpdate::running(true), 0)
            .await
            .unwrap();

        let result = runner.run().await.unwrap();
        assert_eq!(result.end_reason, SimulationEndReason::MaxTicksReached);
        assert_eq!(result.final_tick, 4);
        assert_eq!(result.total_ticks, 4);
        let record = store.simulation(id).await.unwrap();
        assert!(!record.running);
        let agent = store.agents(id).await.unwrap().into_iter().next().unwrap();
        assert_eq!(agent.energy_level, 96);
    }

    #[tokio::test]
    async fn not_running_ends_immediately() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner_over(store.clone(), SimulationBoundsConfig::default()).await;
        let result = runner.run().await.unwrap();
        assert_eq!(result.end_reason, SimulationEndReason::OperatorStop);
        assert_eq!(result.total_ticks, 0);
        assert!(result.final_summary.is_none());
    }
}
