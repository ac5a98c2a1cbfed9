//! Grid geometry and resource rules for the Agora simulation.
//!
//! # Modules
//!
//! - [`error`] -- Error types for pathfinding and harvest joins.
//! - [`lifecycle`] -- The resource state machine: regrowth, harvest
//!   completion, and the rules for joining a harvest.
//! - [`pathfinding`] -- Breadth-first shortest paths on the obstacle grid.

pub mod error;
pub mod lifecycle;
pub mod pathfinding;

pub use error::{HarvestError, PathError, WorldError};
pub use lifecycle::{JoinOutcome, Transition, advance, check_joinable, join_harvest};
pub use pathfinding::find_path;
