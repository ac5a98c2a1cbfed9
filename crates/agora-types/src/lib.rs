//! Shared type definitions for the Agora simulation.
//!
//! This crate is the single source of truth for the entity records, typed
//! IDs, actions and events used across the workspace. Types that cross the
//! pub/sub boundary are exported to `TypeScript` via `ts-rs`.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for all entity identifiers
//! - [`enums`] -- Action kinds and resource lifecycle states
//! - [`structs`] -- Core entity structs (agents, resources, world, simulation, action log)
//! - [`actions`] -- Parameterised actions returned by agent policies
//! - [`observation`] -- Observation payload delivered to policies each tick
//! - [`events`] -- Published events and their topics

pub mod actions;
pub mod enums;
pub mod events;
pub mod ids;
pub mod observation;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use actions::Action;
pub use enums::{ActionKind, ResourceState};
pub use events::{SimEvent, decide_topic};
pub use ids::{ActionLogId, AgentId, ResourceId, SimulationId, WorldId};
pub use observation::Observation;
pub use structs::{
    ActionLogDetails, ActionLogEntry, Agent, BoundingBox, Position, Resource, Simulation,
    SimulationUpdate, World,
};
