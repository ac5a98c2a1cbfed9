//! Agent rules for the Agora simulation.
//!
//! Everything in this crate is synchronous and side-effect free apart from
//! mutating the records passed in; loading, locking and persisting those
//! records is the scheduler's job.
//!
//! # Modules
//!
//! - [`actions`] -- Rule checks and state changes for each action kind.
//! - [`config`] -- Energy costs.
//! - [`error`] -- Domain rule violations raised by action handlers.
//! - [`perception`] -- Observation assembly and action availability.
//! - [`vitals`] -- Energy deduction, harvest credit, and death.

pub mod actions;
pub mod config;
pub mod error;
pub mod perception;
pub mod vitals;

pub use actions::handlers::{ExecutionContext, HandlerResult, execute_action};
pub use config::EnergyConfig;
pub use error::ActionError;
pub use perception::{available_actions, build_observation};
pub use vitals::{VitalTickResult, apply_energy_cost, credit_harvest};
