//! Observation payload handed to an agent policy each tick.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::ActionKind;
use crate::ids::AgentId;
use crate::structs::{Agent, Resource};

/// Everything an agent can see when it decides what to do.
///
/// Nearby agents and resources are within Manhattan distance
/// `visibility_range` of the observing agent. Dead agents are never listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Observation {
    /// The tick being decided.
    pub tick: u64,
    /// The observing agent's own state.
    pub agent: Agent,
    /// Living agents in view, excluding the observer.
    pub nearby_agents: Vec<Agent>,
    /// Resources in view.
    pub nearby_resources: Vec<Resource>,
    /// Action kinds the observer may choose this tick.
    pub available_actions: BTreeSet<ActionKind>,
}

impl Observation {
    /// Whether `agent_id` is among the agents in view.
    pub fn sees_agent(&self, agent_id: AgentId) -> bool {
        self.nearby_agents.iter().any(|a| a.id == agent_id)
    }

    /// Whether the observer may choose `kind` this tick.
    pub fn allows(&self, kind: ActionKind) -> bool {
        self.available_actions.contains(&kind)
    }
}
