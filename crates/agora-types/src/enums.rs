//! Enumeration types shared across the workspace.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// The kinds of action an agent can choose in a tick.
///
/// The set of kinds available to a given agent is derived each tick from its
/// state and observation; a policy picks one of them and fills in the
/// parameters as an [`crate::Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Walk toward a destination cell.
    Move,
    /// Join the harvest of a nearby resource.
    Harvest,
    /// Say something to another agent in view.
    Talk,
    /// Record a plan for later ticks.
    Plan,
    /// Do nothing this tick.
    Idle,
}

impl core::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Move => "move",
            Self::Harvest => "harvest",
            Self::Talk => "talk",
            Self::Plan => "plan",
            Self::Idle => "idle",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a resource, derived from its mutable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// Available and nobody has joined yet.
    Available,
    /// Available with at least one harvester joined.
    BeingHarvested,
    /// Harvested and waiting for the regrow delay.
    Depleted,
}
