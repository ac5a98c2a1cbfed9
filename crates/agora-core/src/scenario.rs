//! Initial world, agents and resources for a new simulation.
//!
//! The `scenario` section of `agora-config.yaml` describes the starting
//! state. [`seed_simulation`] writes it into a [`WorldStore`]. When the
//! section lists no agents the engine falls back to [`ScenarioConfig::demo`].

use std::collections::BTreeSet;

use agora_types::{
    Agent, AgentId, Position, Resource, ResourceId, Simulation, SimulationId, World, WorldId,
};
use serde::Deserialize;
use tracing::info;

use crate::store::{StoreError, WorldStore};

/// Starting state of a simulation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// World grid.
    pub world: ScenarioWorld,
    /// Agents to create.
    pub agents: Vec<AgentSpec>,
    /// Resources to place.
    pub resources: Vec<ResourceSpec>,
}

/// World grid of a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScenarioWorld {
    /// Optional display name, only logged.
    pub name: Option<String>,
    /// Grid width in cells.
    pub width: u32,
    /// Grid height in cells.
    pub height: u32,
    /// Impassable cells.
    pub obstacles: Vec<Position>,
}

impl Default for ScenarioWorld {
    fn default() -> Self {
        Self {
            name: None,
            width: 32,
            height: 32,
            obstacles: Vec::new(),
        }
    }
}

/// One agent of a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentSpec {
    /// Display name.
    pub name: String,
    /// Starting cell.
    pub position: Position,
    /// Observation radius.
    #[serde(default = "default_visibility_range")]
    pub visibility_range: u32,
    /// Maximum path steps per tick.
    #[serde(default = "default_range_per_move")]
    pub range_per_move: u32,
    /// Starting energy.
    #[serde(default = "default_energy_level")]
    pub energy_level: i64,
}

/// One resource of a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceSpec {
    /// Cell the resource occupies.
    pub position: Position,
    /// Energy credited to each harvester.
    #[serde(default = "default_energy_yield")]
    pub energy_yield: i64,
    /// Harvesters needed at once.
    #[serde(default = "default_required_agents")]
    pub required_agents: u32,
    /// Manhattan radius within which an agent may join.
    #[serde(default = "default_harvesting_area")]
    pub harvesting_area: u32,
    /// Ticks between a harvest and regrowth.
    #[serde(default = "default_regrow_time")]
    pub regrow_time: u64,
}

const fn default_visibility_range() -> u32 {
    5
}

const fn default_range_per_move() -> u32 {
    1
}

const fn default_energy_level() -> i64 {
    100
}

const fn default_energy_yield() -> i64 {
    10
}

const fn default_required_agents() -> u32 {
    1
}

const fn default_harvesting_area() -> u32 {
    1
}

const fn default_regrow_time() -> u64 {
    10
}

impl ScenarioConfig {
    /// A small two-camp world: a pair of foragers sharing a two-person
    /// resource in one corner and a lone forager far away in the other.
    pub fn demo() -> Self {
        let agent = |name: &str, x, y| AgentSpec {
            name: name.to_owned(),
            position: Position::new(x, y),
            visibility_range: default_visibility_range(),
            range_per_move: default_range_per_move(),
            energy_level: default_energy_level(),
        };
        let resource = |x, y, required_agents| ResourceSpec {
            position: Position::new(x, y),
            energy_yield: default_energy_yield(),
            required_agents,
            harvesting_area: default_harvesting_area(),
            regrow_time: default_regrow_time(),
        };
        Self {
            world: ScenarioWorld {
                name: Some(String::from("demo")),
                ..ScenarioWorld::default()
            },
            agents: vec![
                agent("ada", 2, 2),
                agent("brin", 4, 3),
                agent("cole", 28, 28),
            ],
            resources: vec![resource(3, 4, 2), resource(6, 1, 1), resource(27, 26, 1)],
        }
    }
}

/// Write a scenario into `store` and return the new simulation's ID.
///
/// The simulation starts at tick 0, version 0, not running.
pub async fn seed_simulation(
    store: &dyn WorldStore,
    scenario: &ScenarioConfig,
) -> Result<SimulationId, StoreError> {
    let simulation_id = SimulationId::new();
    let world_id = WorldId::new();
    let world = World {
        id: world_id,
        simulation_id,
        width: scenario.world.width,
        height: scenario.world.height,
        obstacles: scenario.world.obstacles.iter().copied().collect(),
    };
    let simulation = Simulation {
        id: simulation_id,
        world_id,
        tick: 0,
        running: false,
        version: 0,
    };
    store.insert_simulation(simulation, world).await?;

    for spec in &scenario.agents {
        store
            .insert_agent(Agent {
                id: AgentId::new(),
                simulation_id,
                name: spec.name.clone(),
                position: spec.position,
                visibility_range: spec.visibility_range,
                range_per_move: spec.range_per_move,
                energy_level: spec.energy_level,
                dead: false,
                harvesting: None,
            })
            .await?;
    }
    for spec in &scenario.resources {
        store
            .insert_resource(Resource {
                id: ResourceId::new(),
                simulation_id,
                world_id,
                position: spec.position,
                energy_yield: spec.energy_yield,
                required_agents: spec.required_agents,
                harvesting_area: spec.harvesting_area,
                regrow_time: spec.regrow_time,
                available: true,
                being_harvested: false,
                harvesters: BTreeSet::new(),
                last_harvest_tick: None,
                start_harvest_tick: None,
            })
            .await?;
    }

    info!(
        simulation_id = %simulation_id,
        world = scenario.world.name.as_deref().unwrap_or("unnamed"),
        agents = scenario.agents.len(),
        resources = scenario.resources.len(),
        "scenario seeded"
    );
    Ok(simulation_id)
}
