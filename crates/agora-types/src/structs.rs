//! Core entity structs: grid geometry, agents, resources, the world grid,
//! the simulation record, and the append-only action log.
//!
//! Relationships between entities are plain ID fields. Nothing here holds a
//! reference to another entity; traversal goes through the store.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{ActionKind, ResourceState};
use crate::ids::{ActionLogId, AgentId, ResourceId, SimulationId, WorldId};

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// A cell on the world grid.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[ts(export, export_to = "bindings/")]
pub struct Position {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl Position {
    /// Create a position from its coordinates.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance to `other`, saturating at `u32::MAX`.
    pub const fn manhattan(self, other: Self) -> u32 {
        self.x
            .abs_diff(other.x)
            .saturating_add(self.y.abs_diff(other.y))
    }
}

impl core::fmt::Display for Position {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Axis-aligned rectangle of grid cells, inclusive on every edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Smallest column inside the box.
    pub min_x: i32,
    /// Smallest row inside the box.
    pub min_y: i32,
    /// Largest column inside the box.
    pub max_x: i32,
    /// Largest row inside the box.
    pub max_y: i32,
}

impl BoundingBox {
    /// The square of half-width `radius` centred on `center`.
    ///
    /// The square circumscribes the Manhattan ball of the same radius, so
    /// callers filter by [`Position::manhattan`] afterwards.
    pub fn around(center: Position, radius: u32) -> Self {
        let r = i32::try_from(radius).unwrap_or(i32::MAX);
        Self {
            min_x: center.x.saturating_sub(r),
            min_y: center.y.saturating_sub(r),
            max_x: center.x.saturating_add(r),
            max_y: center.y.saturating_add(r),
        }
    }

    /// Whether `pos` lies inside the box.
    pub const fn contains(&self, pos: Position) -> bool {
        pos.x >= self.min_x && pos.x <= self.max_x && pos.y >= self.min_y && pos.y <= self.max_y
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// An autonomous agent living in a simulation.
///
/// Position and energy change at most once per tick, through the agent's own
/// action and the energy rules. Once `dead` is set the agent is excluded from
/// clustering and ticking for good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Agent {
    /// Unique identifier.
    pub id: AgentId,
    /// The simulation this agent belongs to.
    pub simulation_id: SimulationId,
    /// Display name, used in conversation and harvest log entries.
    pub name: String,
    /// Current cell.
    pub position: Position,
    /// Observation radius (Manhattan).
    pub visibility_range: u32,
    /// Maximum number of path steps per tick.
    pub range_per_move: u32,
    /// Current energy. The agent dies when this drops to zero or below.
    pub energy_level: i64,
    /// Whether the agent has died.
    pub dead: bool,
    /// The resource this agent is currently harvesting, if any.
    pub harvesting: Option<ResourceId>,
}

impl Agent {
    /// Clustering threshold of this agent: how far it can see plus how far
    /// it can walk in one tick.
    pub const fn interaction_radius(&self) -> u32 {
        self.visibility_range.saturating_add(self.range_per_move)
    }
}

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

/// A harvestable resource fixed to one grid cell.
///
/// Invariant: `available` is `false` whenever a harvest has completed and the
/// regrow delay has not yet elapsed. `harvesters` is cleared on every
/// completed harvest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Resource {
    /// Unique identifier.
    pub id: ResourceId,
    /// The simulation this resource belongs to.
    pub simulation_id: SimulationId,
    /// The world grid the resource sits on.
    pub world_id: WorldId,
    /// Cell of the resource.
    pub position: Position,
    /// Energy credited to every harvester when a harvest completes.
    pub energy_yield: i64,
    /// Number of simultaneous harvesters needed to complete a harvest.
    pub required_agents: u32,
    /// Manhattan radius within which an agent may join the harvest.
    pub harvesting_area: u32,
    /// Ticks after a completed harvest before the resource is available again.
    pub regrow_time: u64,
    /// Whether the resource can currently be harvested.
    ///
    /// Stays `true` while harvesters gather: the harvest only completes on
    /// an available resource, and completion is what sets it to `false`.
    /// An unavailable resource therefore never has harvesters.
    pub available: bool,
    /// Whether at least one agent has joined the current harvest.
    pub being_harvested: bool,
    /// Agents that have joined the current harvest.
    pub harvesters: BTreeSet<AgentId>,
    /// Tick at which the last harvest completed, or `None` if never harvested
    /// (or regrown since).
    pub last_harvest_tick: Option<u64>,
    /// Tick at which the first harvester joined the current harvest.
    pub start_harvest_tick: Option<u64>,
}

impl Resource {
    /// Lifecycle state derived from the mutable fields.
    pub fn state(&self) -> ResourceState {
        if !self.available {
            ResourceState::Depleted
        } else if self.harvesters.is_empty() {
            ResourceState::Available
        } else {
            ResourceState::BeingHarvested
        }
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// The grid a simulation plays out on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct World {
    /// Unique identifier.
    pub id: WorldId,
    /// The simulation this world belongs to.
    pub simulation_id: SimulationId,
    /// Number of columns.
    pub width: u32,
    /// Number of rows.
    pub height: u32,
    /// Impassable cells.
    pub obstacles: BTreeSet<Position>,
}

impl World {
    /// Whether `pos` lies on the grid.
    pub fn in_bounds(&self, pos: Position) -> bool {
        let inside = |v: i32, limit: u32| u32::try_from(v).is_ok_and(|v| v < limit);
        inside(pos.x, self.width) && inside(pos.y, self.height)
    }

    /// Whether `pos` is on the grid and not an obstacle.
    pub fn is_passable(&self, pos: Position) -> bool {
        self.in_bounds(pos) && !self.obstacles.contains(&pos)
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// The persisted control record of one simulation.
///
/// `version` is bumped on every persisted change to `tick` or `running` and
/// is the stamp used for optimistic concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Simulation {
    /// Unique identifier.
    pub id: SimulationId,
    /// The world grid of this simulation.
    pub world_id: WorldId,
    /// Last fully completed tick.
    pub tick: u64,
    /// Whether the simulation loop should be running.
    pub running: bool,
    /// Optimistic concurrency stamp.
    pub version: u64,
}

/// Field changes applied by a compare-and-update on a [`Simulation`].
///
/// `None` leaves the field untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationUpdate {
    /// New tick value.
    pub tick: Option<u64>,
    /// New running flag.
    pub running: Option<bool>,
}

impl SimulationUpdate {
    /// An update that only sets the tick.
    pub const fn tick(tick: u64) -> Self {
        Self {
            tick: Some(tick),
            running: None,
        }
    }

    /// An update that only sets the running flag.
    pub const fn running(running: bool) -> Self {
        Self {
            tick: None,
            running: Some(running),
        }
    }

    /// Apply the update to a simulation record (without touching `version`).
    pub fn apply_to(&self, simulation: &mut Simulation) {
        if let Some(tick) = self.tick {
            simulation.tick = tick;
        }
        if let Some(running) = self.running {
            simulation.running = running;
        }
    }
}

// ---------------------------------------------------------------------------
// Action log
// ---------------------------------------------------------------------------

/// Immutable record of something an agent did during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ActionLogEntry {
    /// Unique identifier.
    pub id: ActionLogId,
    /// The simulation the entry belongs to.
    pub simulation_id: SimulationId,
    /// The acting agent.
    pub agent_id: AgentId,
    /// Tick the action took place in.
    pub tick: u64,
    /// Kind of action.
    pub kind: ActionKind,
    /// Action-specific details.
    pub details: ActionLogDetails,
    /// Wall-clock time the entry was written.
    pub created_at: DateTime<Utc>,
}

impl ActionLogEntry {
    /// Build a new entry stamped with the current time.
    pub fn new(
        simulation_id: SimulationId,
        agent_id: AgentId,
        tick: u64,
        kind: ActionKind,
        details: ActionLogDetails,
    ) -> Self {
        Self {
            id: ActionLogId::new(),
            simulation_id,
            agent_id,
            tick,
            kind,
            details,
            created_at: Utc::now(),
        }
    }
}

/// Action-specific payload of an [`ActionLogEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionLogDetails {
    /// The agent walked along a path.
    Moved {
        /// Cell before the move.
        from: Position,
        /// Cell after the move.
        to: Position,
        /// Number of steps taken.
        steps: u32,
    },
    /// The agent joined a harvest in progress (or started one).
    JoinedHarvest {
        /// The resource being harvested.
        resource_id: ResourceId,
        /// Harvesters after joining, including this agent.
        harvesters: u32,
        /// Harvesters needed to complete.
        required_agents: u32,
    },
    /// A joint harvest completed and credited this agent.
    Harvested {
        /// The harvested resource.
        resource_id: ResourceId,
        /// Energy credited to this agent.
        energy_gained: i64,
        /// The other agents that took part.
        co_harvesters: Vec<AgentId>,
        /// Names of the other agents that took part.
        co_harvester_names: Vec<String>,
    },
    /// The agent said something to another agent.
    Talked {
        /// The agent spoken to.
        listener: AgentId,
        /// What was said.
        message: String,
    },
    /// The agent recorded a plan.
    Planned {
        /// The plan text.
        note: String,
    },
    /// The chosen action broke a domain rule and had no effect.
    Rejected {
        /// Why the action was refused.
        reason: String,
    },
}
