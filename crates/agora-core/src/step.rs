//! One resource step and one agent step, shared by the cluster executor and
//! the sequential tick path.
//!
//! Both steps read under the entity locks, apply the domain rules from
//! `agora-world` and `agora-agents`, and write the result as a single
//! [`WriteBatch`]. Events are published after the commit.

use std::collections::BTreeSet;
use std::sync::Arc;

use agora_agents::actions::costs;
use agora_agents::{
    EnergyConfig, ExecutionContext, apply_energy_cost, build_observation, credit_harvest,
    execute_action,
};
use agora_types::{
    Action, ActionKind, ActionLogDetails, ActionLogEntry, Agent, AgentId, BoundingBox, Resource,
    ResourceId, SimEvent, SimulationId, World,
};
use agora_world::{Transition, advance};
use tracing::{debug, warn};

use crate::error::{AgentActionError, ResourceTransitionError};
use crate::locks::{EntityGuard, EntityLocks};
use crate::policy::AgentPolicy;
use crate::publish::{EventPublisher, publish_event};
use crate::store::{StoreError, WorldStore, WriteBatch};

/// The collaborators every step of one simulation needs.
#[derive(Clone)]
pub struct SimulationContext {
    /// The simulation being advanced.
    pub simulation_id: SimulationId,
    /// Its world grid.
    pub world: Arc<World>,
    /// Persistence.
    pub store: Arc<dyn WorldStore>,
    /// Event sink.
    pub publisher: Arc<dyn EventPublisher>,
    /// Decision source.
    pub policy: Arc<dyn AgentPolicy>,
    /// Process-wide entity locks.
    pub locks: Arc<EntityLocks>,
    /// Energy rules.
    pub energy: EnergyConfig,
}

impl SimulationContext {
    /// Load the world of `simulation_id` and bundle it with the
    /// collaborators.
    pub async fn load(
        simulation_id: SimulationId,
        store: Arc<dyn WorldStore>,
        publisher: Arc<dyn EventPublisher>,
        policy: Arc<dyn AgentPolicy>,
        locks: Arc<EntityLocks>,
        energy: EnergyConfig,
    ) -> Result<Self, StoreError> {
        let simulation = store.simulation(simulation_id).await?;
        let world = store.world(simulation.world_id).await?;
        Ok(Self {
            simulation_id,
            world: Arc::new(world),
            store,
            publisher,
            policy,
            locks,
            energy,
        })
    }

    fn publish(&self, event: &SimEvent) {
        publish_event(self.publisher.as_ref(), event);
    }
}

/// What one agent step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStep {
    /// The agent was already dead; nothing happened.
    Dead,
    /// The action was applied.
    Applied {
        /// Kind of the applied action.
        kind: ActionKind,
        /// Whether the agent died paying for the tick.
        died: bool,
    },
    /// The action broke a domain rule; only the base cost was paid.
    Rejected {
        /// Kind of the refused action.
        kind: ActionKind,
        /// Whether the agent died paying for the tick.
        died: bool,
    },
}

impl AgentStep {
    /// Whether the agent died during this step.
    pub const fn died(&self) -> bool {
        match self {
            Self::Dead => false,
            Self::Applied { died, .. } | Self::Rejected { died, .. } => *died,
        }
    }
}

/// Apply the lifecycle transitions of one resource for `tick`.
///
/// On harvest completion every living harvester is credited
/// `energy_yield`, gets a harvest entry in the action log, and a
/// `ResourceHarvested` event carrying its new energy. The resource, the
/// harvesters and the log entries are committed together.
pub async fn tick_resource(
    ctx: &SimulationContext,
    resource_id: ResourceId,
    tick: u64,
) -> Result<Transition, ResourceTransitionError> {
    let store_err = |source| ResourceTransitionError::Store {
        resource: resource_id,
        source,
    };
    let _resource_guard = ctx
        .locks
        .lock_resource(resource_id)
        .await
        .map_err(|source| ResourceTransitionError::Lock {
            resource: resource_id,
            source,
        })?;
    let mut resource = ctx.store.resource(resource_id).await.map_err(store_err)?;

    let transition = advance(&mut resource, tick).map_err(|source| ResourceTransitionError::World {
        resource: resource_id,
        source,
    })?;

    match &transition {
        Transition::Unchanged => {}
        Transition::Regrown => {
            ctx.store.put_resource(resource).await.map_err(store_err)?;
            ctx.publish(&SimEvent::ResourceGrown {
                simulation_id: ctx.simulation_id,
                resource_id,
                tick,
            });
        }
        Transition::Harvested {
            harvesters,
            energy_yield,
        } => {
            let ids: BTreeSet<AgentId> = harvesters.iter().copied().collect();
            let _agent_guards =
                ctx.locks
                    .lock_agents(&ids)
                    .await
                    .map_err(|source| ResourceTransitionError::Lock {
                        resource: resource_id,
                        source,
                    })?;

            let mut agents = Vec::with_capacity(ids.len());
            for &id in &ids {
                agents.push(ctx.store.agent(id).await.map_err(store_err)?);
            }
            let credited = credit_harvesters(ctx, &resource, &mut agents, *energy_yield, tick);

            let mut batch = WriteBatch::default().with_resource(resource);
            batch.action_log = credited;
            batch.agents = agents;
            let harvested: Vec<(AgentId, i64)> = batch
                .agents
                .iter()
                .filter(|a| !a.dead)
                .map(|a| (a.id, a.energy_level))
                .collect();
            ctx.store.commit(batch).await.map_err(store_err)?;

            for (agent_id, energy_level) in harvested {
                ctx.publish(&SimEvent::ResourceHarvested {
                    simulation_id: ctx.simulation_id,
                    resource_id,
                    agent_id,
                    energy_level,
                    tick,
                });
            }
        }
    }
    Ok(transition)
}

fn credit_harvesters(
    ctx: &SimulationContext,
    resource: &Resource,
    agents: &mut [Agent],
    energy_yield: i64,
    tick: u64,
) -> Vec<ActionLogEntry> {
    let roster: Vec<(AgentId, String)> = agents.iter().map(|a| (a.id, a.name.clone())).collect();
    let mut entries = Vec::with_capacity(agents.len());
    for agent in agents.iter_mut() {
        if !credit_harvest(agent, energy_yield) {
            continue;
        }
        let (co_harvesters, co_harvester_names) = roster
            .iter()
            .filter(|(id, _)| *id != agent.id)
            .cloned()
            .unzip();
        entries.push(ActionLogEntry::new(
            ctx.simulation_id,
            agent.id,
            tick,
            ActionKind::Harvest,
            ActionLogDetails::Harvested {
                resource_id: resource.id,
                energy_gained: energy_yield,
                co_harvesters,
                co_harvester_names,
            },
        ));
    }
    entries
}

/// Run one agent's load, decide, apply sequence for `tick`.
///
/// The observation and the policy call happen without locks. The apply
/// step locks the target resource (for a harvest) and then the agent,
/// re-reads both, and commits agent, resource and log entry together. A
/// domain rule violation is not an error: the refusal is logged, the base
/// tick cost is charged, and the step reports [`AgentStep::Rejected`].
pub async fn tick_agent(
    ctx: &SimulationContext,
    agent_id: AgentId,
    tick: u64,
) -> Result<AgentStep, AgentActionError> {
    let store_err = |source| AgentActionError::Store {
        agent: agent_id,
        source,
    };
    let agent = ctx.store.agent(agent_id).await.map_err(store_err)?;
    if agent.dead {
        return Ok(AgentStep::Dead);
    }

    let view = BoundingBox::around(agent.position, agent.visibility_range);
    let nearby_agents = ctx
        .store
        .agents_in_box(ctx.simulation_id, view)
        .await
        .map_err(store_err)?;
    let nearby_resources = ctx
        .store
        .resources_in_box(ctx.simulation_id, view)
        .await
        .map_err(store_err)?;
    let observation = build_observation(tick, agent, nearby_agents, nearby_resources);

    let action = ctx
        .policy
        .decide(&observation)
        .await
        .map_err(|source| AgentActionError::Policy {
            agent: agent_id,
            source,
        })?;
    debug!(agent_id = %agent_id, tick, action = %action.kind(), "agent decided");

    let lock_err = |source| AgentActionError::Lock {
        agent: agent_id,
        source,
    };
    let target = match &action {
        Action::Harvest { resource_id } => Some(*resource_id),
        _ => None,
    };
    let mut guards: Vec<EntityGuard> = Vec::with_capacity(2);
    if let Some(resource_id) = target {
        guards.push(ctx.locks.lock_resource(resource_id).await.map_err(lock_err)?);
    }
    guards.push(ctx.locks.lock_agent(agent_id).await.map_err(lock_err)?);

    let mut agent = ctx.store.agent(agent_id).await.map_err(store_err)?;
    if agent.dead {
        return Ok(AgentStep::Dead);
    }
    let mut resource = match target {
        Some(resource_id) => match ctx.store.resource(resource_id).await {
            Ok(resource) => Some(resource),
            Err(StoreError::NotFound { .. }) => None,
            Err(source) => return Err(store_err(source)),
        },
        None => None,
    };

    let exec = ExecutionContext {
        world: &ctx.world,
        observation: &observation,
        tick,
        energy: &ctx.energy,
    };
    let kind = action.kind();
    let mut batch = WriteBatch::default();
    let mut moved = None;
    let (cost, rejected) = match execute_action(&mut agent, &action, resource.as_mut(), &exec) {
        Ok(result) => {
            if let Some(details) = result.details {
                batch = batch.with_log(ActionLogEntry::new(
                    ctx.simulation_id,
                    agent_id,
                    tick,
                    kind,
                    details,
                ));
            }
            if let Some(resource) = resource.take() {
                batch = batch.with_resource(resource);
            }
            moved = result.moved;
            (result.energy_cost, false)
        }
        Err(err) if err.is_rule_violation() => {
            debug!(agent_id = %agent_id, tick, reason = %err, "action rejected");
            batch = batch.with_log(ActionLogEntry::new(
                ctx.simulation_id,
                agent_id,
                tick,
                kind,
                ActionLogDetails::Rejected {
                    reason: err.to_string(),
                },
            ));
            (costs::rejection_cost(&ctx.energy), true)
        }
        Err(source) => {
            return Err(AgentActionError::Action {
                agent: agent_id,
                source,
            });
        }
    };

    let vitals = apply_energy_cost(&mut agent, cost);
    batch = batch.with_agent(agent);
    ctx.store.commit(batch).await.map_err(store_err)?;
    drop(guards);

    if let Some((from, to)) = moved {
        ctx.publish(&SimEvent::AgentMoved {
            simulation_id: ctx.simulation_id,
            agent_id,
            from,
            to,
            tick,
        });
    }
    if vitals.died {
        warn!(agent_id = %agent_id, tick, "agent died");
        ctx.publish(&SimEvent::AgentDied {
            simulation_id: ctx.simulation_id,
            agent_id,
            tick,
        });
    }

    Ok(if rejected {
        AgentStep::Rejected {
            kind,
            died: vitals.died,
        }
    } else {
        AgentStep::Applied {
            kind,
            died: vitals.died,
        }
    })
}
