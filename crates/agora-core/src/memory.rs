//! In-process [`WorldStore`] over `RwLock`ed maps.
//!
//! The default store, and the one every test runs against. All tables sit
//! behind a single [`tokio::sync::RwLock`], so a commit or compare-and-update
//! is atomic with respect to every other operation.

use std::collections::BTreeMap;

use agora_types::{
    ActionLogEntry, Agent, AgentId, BoundingBox, Resource, ResourceId, Simulation, SimulationId,
    SimulationUpdate, World, WorldId,
};
use tokio::sync::RwLock;

use crate::store::{StoreError, StoreFuture, WorldStore, WriteBatch};

#[derive(Debug, Clone, Default)]
struct Tables {
    simulations: BTreeMap<SimulationId, Simulation>,
    worlds: BTreeMap<WorldId, World>,
    agents: BTreeMap<AgentId, Agent>,
    resources: BTreeMap<ResourceId, Resource>,
    action_log: Vec<ActionLogEntry>,
}

/// A [`WorldStore`] that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// An independent copy of the current contents.
    pub async fn fork(&self) -> Self {
        let tables = self.tables.read().await.clone();
        Self {
            tables: RwLock::new(tables),
        }
    }
}

impl WorldStore for MemoryStore {
    fn simulation(&self, id: SimulationId) -> StoreFuture<'_, Simulation> {
        Box::pin(async move {
            self.tables
                .read()
                .await
                .simulations
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("simulation", id))
        })
    }

    fn world(&self, id: WorldId) -> StoreFuture<'_, World> {
        Box::pin(async move {
            self.tables
                .read()
                .await
                .worlds
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("world", id))
        })
    }

    fn agent(&self, id: AgentId) -> StoreFuture<'_, Agent> {
        Box::pin(async move {
            self.tables
                .read()
                .await
                .agents
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("agent", id))
        })
    }

    fn resource(&self, id: ResourceId) -> StoreFuture<'_, Resource> {
        Box::pin(async move {
            self.tables
                .read()
                .await
                .resources
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("resource", id))
        })
    }

    fn agents(&self, simulation: SimulationId) -> StoreFuture<'_, Vec<Agent>> {
        Box::pin(async move {
            Ok(self
                .tables
                .read()
                .await
                .agents
                .values()
                .filter(|a| a.simulation_id == simulation)
                .cloned()
                .collect())
        })
    }

    fn resources(&self, simulation: SimulationId) -> StoreFuture<'_, Vec<Resource>> {
        Box::pin(async move {
            Ok(self
                .tables
                .read()
                .await
                .resources
                .values()
                .filter(|r| r.simulation_id == simulation)
                .cloned()
                .collect())
        })
    }

    fn agents_in_box(
        &self,
        simulation: SimulationId,
        bbox: BoundingBox,
    ) -> StoreFuture<'_, Vec<Agent>> {
        Box::pin(async move {
            Ok(self
                .tables
                .read()
                .await
                .agents
                .values()
                .filter(|a| a.simulation_id == simulation && bbox.contains(a.position))
                .cloned()
                .collect())
        })
    }

    fn resources_in_box(
        &self,
        simulation: SimulationId,
        bbox: BoundingBox,
    ) -> StoreFuture<'_, Vec<Resource>> {
        Box::pin(async move {
            Ok(self
                .tables
                .read()
                .await
                .resources
                .values()
                .filter(|r| r.simulation_id == simulation && bbox.contains(r.position))
                .cloned()
                .collect())
        })
    }

    fn insert_simulation(&self, simulation: Simulation, world: World) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            if tables.simulations.contains_key(&simulation.id) {
                return Err(StoreError::Duplicate {
                    entity: "simulation",
                    id: simulation.id.to_string(),
                });
            }
            if tables.worlds.contains_key(&world.id) {
                return Err(StoreError::Duplicate {
                    entity: "world",
                    id: world.id.to_string(),
                });
            }
            tables.worlds.insert(world.id, world);
            tables.simulations.insert(simulation.id, simulation);
            Ok(())
        })
    }

    fn insert_agent(&self, agent: Agent) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            if tables.agents.contains_key(&agent.id) {
                return Err(StoreError::Duplicate {
                    entity: "agent",
                    id: agent.id.to_string(),
                });
            }
            tables.agents.insert(agent.id, agent);
            Ok(())
        })
    }

    fn insert_resource(&self, resource: Resource) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            if tables.resources.contains_key(&resource.id) {
                return Err(StoreError::Duplicate {
                    entity: "resource",
                    id: resource.id.to_string(),
                });
            }
            tables.resources.insert(resource.id, resource);
            Ok(())
        })
    }

    fn commit(&self, batch: WriteBatch) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            // Validate first so a failing batch writes nothing.
            if let Some(missing) = batch.agents.iter().find(|a| !tables.agents.contains_key(&a.id))
            {
                return Err(StoreError::not_found("agent", missing.id));
            }
            if let Some(missing) = batch
                .resources
                .iter()
                .find(|r| !tables.resources.contains_key(&r.id))
            {
                return Err(StoreError::not_found("resource", missing.id));
            }
            for agent in batch.agents {
                tables.agents.insert(agent.id, agent);
            }
            for resource in batch.resources {
                tables.resources.insert(resource.id, resource);
            }
            tables.action_log.extend(batch.action_log);
            Ok(())
        })
    }

    fn action_log(
        &self,
        simulation: SimulationId,
        agent: Option<AgentId>,
    ) -> StoreFuture<'_, Vec<ActionLogEntry>> {
        Box::pin(async move {
            Ok(self
                .tables
                .read()
                .await
                .action_log
                .iter()
                .filter(|e| e.simulation_id == simulation && agent.is_none_or(|id| e.agent_id == id))
                .cloned()
                .collect())
        })
    }

    fn compare_and_update_simulation(
        &self,
        id: SimulationId,
        expected_version: u64,
        update: SimulationUpdate,
    ) -> StoreFuture<'_, Simulation> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            let record = tables
                .simulations
                .get_mut(&id)
                .ok_or_else(|| StoreError::not_found("simulation", id))?;
            if record.version != expected_version {
                return Err(StoreError::ConcurrencyConflict {
                    simulation: id,
                    expected: expected_version,
                    actual: record.version,
                });
            }
            let version = record
                .version
                .checked_add(1)
                .ok_or(StoreError::VersionOverflow { simulation: id })?;
            update.apply_to(record);
            record.version = version;
            Ok(record.clone())
        })
    }
}
