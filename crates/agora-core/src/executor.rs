//! Run one tick for one cluster of agents.
//!
//! A cluster tick has two phases. First every resource within reach of a
//! member is advanced through its lifecycle, in ascending resource ID order;
//! any failure aborts the tick before an agent acts. Then every living
//! member runs its load, decide, apply step concurrently. A member that
//! cannot be loaded, or whose step fails, is logged and skipped; the others
//! still complete.

use std::collections::BTreeSet;

use agora_types::{Agent, AgentId, Resource, ResourceId, SimEvent};
use agora_world::Transition;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::error::ExecutorError;
use crate::publish::publish_event;
use crate::step::{SimulationContext, tick_agent, tick_resource};

/// Outcome of one cluster tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterTickReport {
    /// The tick that was applied.
    pub tick: u64,
    /// Agents whose step completed (including already-dead agents).
    pub resolved: BTreeSet<AgentId>,
    /// Agents whose step failed and were skipped.
    pub failed: BTreeSet<AgentId>,
    /// Agents that died this tick.
    pub died: BTreeSet<AgentId>,
    /// Resources that regrew.
    pub regrown: Vec<ResourceId>,
    /// Resources whose harvest completed.
    pub harvested: Vec<ResourceId>,
}

/// Executes cluster ticks against one simulation.
#[derive(Clone)]
pub struct ClusterExecutor {
    ctx: SimulationContext,
}

impl ClusterExecutor {
    /// Create an executor over `ctx`.
    pub const fn new(ctx: SimulationContext) -> Self {
        Self { ctx }
    }

    /// The simulation context this executor drives.
    pub const fn context(&self) -> &SimulationContext {
        &self.ctx
    }

    /// Apply `tick` to the agents in `cluster`.
    ///
    /// Returns an error only when the resource phase fails or the resources
    /// cannot be listed; per-agent failures, including members that cannot be
    /// loaded, are reported in [`ClusterTickReport::failed`].
    pub async fn run(
        &self,
        cluster: &BTreeSet<AgentId>,
        tick: u64,
    ) -> Result<ClusterTickReport, ExecutorError> {
        let ctx = &self.ctx;
        let mut report = ClusterTickReport {
            tick,
            ..ClusterTickReport::default()
        };

        let mut members = Vec::with_capacity(cluster.len());
        for &id in cluster {
            match ctx.store.agent(id).await {
                Ok(agent) => members.push(agent),
                Err(e) => {
                    warn!(agent_id = %id, tick, error = %e, "agent could not be loaded, skipping");
                    report.failed.insert(id);
                }
            }
        }
        let resources = ctx.store.resources(ctx.simulation_id).await?;
        let in_reach = resources_in_reach(&members, &resources);

        for resource_id in in_reach {
            match tick_resource(ctx, resource_id, tick).await? {
                Transition::Unchanged => {}
                Transition::Regrown => report.regrown.push(resource_id),
                Transition::Harvested { .. } => report.harvested.push(resource_id),
            }
        }

        let steps = join_all(
            members
                .iter()
                .filter(|a| !a.dead)
                .map(|a| async move { (a.id, tick_agent(ctx, a.id, tick).await) }),
        )
        .await;

        for (agent_id, step) in steps {
            match step {
                Ok(step) => {
                    if step.died() {
                        report.died.insert(agent_id);
                    }
                    report.resolved.insert(agent_id);
                }
                Err(e) => {
                    warn!(agent_id = %agent_id, tick, error = %e, "agent step failed, skipping");
                    report.failed.insert(agent_id);
                }
            }
        }
        for agent in members.iter().filter(|a| a.dead) {
            report.resolved.insert(agent.id);
        }

        if report
            .resolved
            .iter()
            .any(|id| members.iter().any(|a| a.id == *id && !a.dead))
        {
            publish_event(
                ctx.publisher.as_ref(),
                &SimEvent::TickCompleted {
                    simulation_id: ctx.simulation_id,
                    tick,
                    agents: report.resolved.iter().copied().collect(),
                },
            );
        }

        if report.died.is_empty() {
            debug!(
                tick,
                resolved = report.resolved.len(),
                failed = report.failed.len(),
                "cluster tick complete"
            );
        } else {
            info!(
                tick,
                resolved = report.resolved.len(),
                failed = report.failed.len(),
                died = report.died.len(),
                "cluster tick complete with deaths"
            );
        }
        Ok(report)
    }
}

/// Resources a cluster must advance before its agents act.
///
/// A resource is in reach when some member sees it or could harvest it from
/// where it stands, or when a member has already joined its harvest. The
/// result is sorted by ID.
pub fn resources_in_reach(members: &[Agent], resources: &[Resource]) -> Vec<ResourceId> {
    let mut ids: Vec<ResourceId> = resources
        .iter()
        .filter(|r| {
            members.iter().any(|a| {
                a.harvesting == Some(r.id)
                    || r.harvesters.contains(&a.id)
                    || a.position.manhattan(r.position) <= a.visibility_range.max(r.harvesting_area)
            })
        })
        .map(|r| r.id)
        .collect();
    ids.sort_unstable();
    ids
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use agora_agents::EnergyConfig;
    use agora_types::{Position, Simulation, SimulationId, World, WorldId};

    use super::*;
    use crate::locks::EntityLocks;
    use crate::memory::MemoryStore;
    use crate::policy::{AgentPolicy, ForagerPolicy, IdlePolicy, PolicyError};
    use crate::publish::RecordingPublisher;
    use crate::store::WorldStore;

    struct FailingPolicy;

    impl AgentPolicy for FailingPolicy {
        fn decide<'a>(
            &'a self,
            _observation: &'a agora_types::Observation,
        ) -> futures::future::BoxFuture<'a, Result<agora_types::Action, PolicyError>> {
            Box::pin(async {
                Err(PolicyError::Transport {
                    message: String::from("unreachable"),
                })
            })
        }
    }

    fn agent(simulation_id: SimulationId, x: i32, y: i32) -> Agent {
        Agent {
            id: AgentId::new(),
            simulation_id,
            name: format!("agent-{x}-{y}"),
            position: Position::new(x, y),
            visibility_range: 3,
            range_per_move: 1,
            energy_level: 50,
            dead: false,
            harvesting: None,
        }
    }

    fn resource(simulation_id: SimulationId, world_id: WorldId, x: i32, y: i32) -> Resource {
        Resource {
            id: ResourceId::new(),
            simulation_id,
            world_id,
            position: Position::new(x, y),
            energy_yield: 7,
            required_agents: 1,
            harvesting_area: 1,
            regrow_time: 100,
            available: true,
            being_harvested: false,
            harvesters: BTreeSet::new(),
            last_harvest_tick: None,
            start_harvest_tick: None,
        }
    }

    async fn setup(
        policy: Arc<dyn AgentPolicy>,
    ) -> (ClusterExecutor, Arc<MemoryStore>, Arc<RecordingPublisher>, SimulationId, WorldId) {
        let store = Arc::new(MemoryStore::new());
        let simulation_id = SimulationId::new();
        let world_id = WorldId::new();
        store
            .insert_simulation(
                Simulation {
                    id: simulation_id,
                    world_id,
                    tick: 0,
                    running: true,
                    version: 0,
                },
                World {
                    id: world_id,
                    simulation_id,
                    width: 30,
                    height: 30,
                    obstacles: BTreeSet::new(),
                },
            )
            .await
            .unwrap();
        let publisher = Arc::new(RecordingPublisher::new());
        let ctx = SimulationContext::load(
            simulation_id,
            store.clone(),
            publisher.clone(),
            policy,
            Arc::new(EntityLocks::new(Duration::from_millis(500))),
            EnergyConfig::default(),
        )
        .await
        .unwrap();
        (ClusterExecutor::new(ctx), store, publisher, simulation_id, world_id)
    }

    #[test]
    fn reach_covers_view_area_and_joined_harvests() {
        let sim = SimulationId::new();
        let world = WorldId::new();
        let a = agent(sim, 0, 0);
        let seen = resource(sim, world, 2, 1);
        let far = resource(sim, world, 20, 20);
        let mut joined = resource(sim, world, 25, 25);
        joined.harvesters.insert(a.id);

        let reach = resources_in_reach(&[a], &[far.clone(), seen.clone(), joined.clone()]);
        let mut expected = vec![seen.id, joined.id];
        expected.sort_unstable();
        assert_eq!(reach, expected);
        assert!(!reach.contains(&far.id));
    }

    #[tokio::test]
    async fn forager_joins_then_harvest_completes_next_tick() {
        let (executor, store, publisher, sim, world) = setup(Arc::new(ForagerPolicy)).await;
        let a = agent(sim, 5, 5);
        let r = resource(sim, world, 5, 6);
        store.insert_agent(a.clone()).await.unwrap();
        store.insert_resource(r.clone()).await.unwrap();
        let cluster = BTreeSet::from([a.id]);

        let first = executor.run(&cluster, 1).await.unwrap();
        assert!(first.resolved.contains(&a.id));
        assert!(first.harvested.is_empty());
        assert!(store.resource(r.id).await.unwrap().harvesters.contains(&a.id));

        let second = executor.run(&cluster, 2).await.unwrap();
        assert_eq!(second.harvested, vec![r.id]);
        let after = store.resource(r.id).await.unwrap();
        assert!(!after.available);
        assert_eq!(after.last_harvest_tick, Some(2));

        let harvested = publisher
            .events()
            .into_iter()
            .filter(|e| matches!(e, SimEvent::ResourceHarvested { .. }))
            .count();
        assert_eq!(harvested, 1);
    }

    #[tokio::test]
    async fn failing_agents_are_skipped_not_fatal() {
        let (executor, store, publisher, sim, _world) = setup(Arc::new(FailingPolicy)).await;
        let a = agent(sim, 1, 1);
        store.insert_agent(a.clone()).await.unwrap();

        let report = executor.run(&BTreeSet::from([a.id]), 1).await.unwrap();
        assert!(report.failed.contains(&a.id));
        assert!(report.resolved.is_empty());
        assert!(publisher.topics().iter().all(|t| !t.ends_with("tick")));
        assert_eq!(store.agent(a.id).await.unwrap().energy_level, 50);
    }

    #[tokio::test]
    async fn unloadable_member_does_not_block_its_peer() {
        let (executor, store, _publisher, sim, _world) = setup(Arc::new(IdlePolicy)).await;
        let a = agent(sim, 4, 4);
        store.insert_agent(a.clone()).await.unwrap();
        let ghost = AgentId::new();

        let report = executor.run(&BTreeSet::from([a.id, ghost]), 1).await.unwrap();
        assert!(report.failed.contains(&ghost));
        assert!(report.resolved.contains(&a.id));
        let after = store.agent(a.id).await.unwrap();
        assert!(after.energy_level < a.energy_level, "the loaded agent paid for its tick");
    }
}
