//! Events announced by the scheduler and their pub/sub topics.
//!
//! Every event is serialised as JSON with an internal `type` tag and published
//! on the subject returned by [`SimEvent::topic`]:
//!
//! | Event | Topic |
//! |-------|-------|
//! | `TickCompleted` | `simulation.{id}.tick` |
//! | `WorldUpdated` | `simulation.{id}.world.{worldId}` |
//! | `ResourceGrown` | `simulation.{id}.resource.{resourceId}.grown` |
//! | `ResourceHarvested` | `simulation.{id}.resource.{resourceId}.harvested` |
//! | `AgentMoved` | `simulation.{id}.agent.{agentId}.moved` |
//! | `AgentDied` | `simulation.{id}.agent.{agentId}.died` |

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{AgentId, ResourceId, SimulationId, WorldId};
use crate::structs::Position;

/// An event published by the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    /// A cluster (or the sequential path) finished a tick.
    TickCompleted {
        /// The simulation.
        simulation_id: SimulationId,
        /// The completed tick.
        tick: u64,
        /// Agents ticked.
        agents: Vec<AgentId>,
    },
    /// The global tick advanced.
    WorldUpdated {
        /// The simulation.
        simulation_id: SimulationId,
        /// The world grid.
        world_id: WorldId,
        /// The new global tick.
        tick: u64,
        /// Living agents.
        agents_alive: u32,
        /// Resources currently available.
        resources_available: u32,
    },
    /// A depleted resource became available again.
    ResourceGrown {
        /// The simulation.
        simulation_id: SimulationId,
        /// The resource.
        resource_id: ResourceId,
        /// Tick of the regrowth.
        tick: u64,
    },
    /// A harvest completed; one event is sent per harvester.
    ResourceHarvested {
        /// The simulation.
        simulation_id: SimulationId,
        /// The resource.
        resource_id: ResourceId,
        /// The harvester credited.
        agent_id: AgentId,
        /// The harvester's energy after the credit.
        energy_level: i64,
        /// Tick of completion.
        tick: u64,
    },
    /// An agent moved.
    AgentMoved {
        /// The simulation.
        simulation_id: SimulationId,
        /// The agent.
        agent_id: AgentId,
        /// Cell before the move.
        from: Position,
        /// Cell after the move.
        to: Position,
        /// Tick of the move.
        tick: u64,
    },
    /// An agent ran out of energy.
    AgentDied {
        /// The simulation.
        simulation_id: SimulationId,
        /// The agent.
        agent_id: AgentId,
        /// Tick of death.
        tick: u64,
    },
}

impl SimEvent {
    /// The pub/sub subject this event is published on.
    pub fn topic(&self) -> String {
        match self {
            Self::TickCompleted { simulation_id, .. } => format!("simulation.{simulation_id}.tick"),
            Self::WorldUpdated {
                simulation_id,
                world_id,
                ..
            } => format!("simulation.{simulation_id}.world.{world_id}"),
            Self::ResourceGrown {
                simulation_id,
                resource_id,
                ..
            } => format!("simulation.{simulation_id}.resource.{resource_id}.grown"),
            Self::ResourceHarvested {
                simulation_id,
                resource_id,
                ..
            } => format!("simulation.{simulation_id}.resource.{resource_id}.harvested"),
            Self::AgentMoved {
                simulation_id,
                agent_id,
                ..
            } => format!("simulation.{simulation_id}.agent.{agent_id}.moved"),
            Self::AgentDied {
                simulation_id,
                agent_id,
                ..
            } => format!("simulation.{simulation_id}.agent.{agent_id}.died"),
        }
    }

    /// The simulation the event belongs to.
    pub const fn simulation_id(&self) -> SimulationId {
        match self {
            Self::TickCompleted { simulation_id, .. }
            | Self::WorldUpdated { simulation_id, .. }
            | Self::ResourceGrown { simulation_id, .. }
            | Self::ResourceHarvested { simulation_id, .. }
            | Self::AgentMoved { simulation_id, .. }
            | Self::AgentDied { simulation_id, .. } => *simulation_id,
        }
    }

    /// JSON payload of the event.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Subject on which an agent's policy answers decision requests.
pub fn decide_topic(simulation_id: SimulationId, agent_id: AgentId) -> String {
    format!("simulation.{simulation_id}.agent.{agent_id}.decide")
}
