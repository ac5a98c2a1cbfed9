//! Parameterised actions returned by an agent policy.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::ActionKind;
use crate::ids::{AgentId, ResourceId};
use crate::structs::Position;

/// An action chosen by a policy for one agent in one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Walk toward `destination`, at most `range_per_move` steps.
    Move {
        /// Target cell.
        destination: Position,
    },
    /// Join the harvest of a resource.
    Harvest {
        /// The resource to harvest.
        resource_id: ResourceId,
    },
    /// Say something to another agent.
    Talk {
        /// The agent spoken to.
        target: AgentId,
        /// What is said.
        message: String,
    },
    /// Record a plan.
    Plan {
        /// Free-form plan text.
        note: String,
    },
    /// Do nothing.
    Idle,
}

impl Action {
    /// The kind of this action.
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::Move { .. } => ActionKind::Move,
            Self::Harvest { .. } => ActionKind::Harvest,
            Self::Talk { .. } => ActionKind::Talk,
            Self::Plan { .. } => ActionKind::Plan,
            Self::Idle => ActionKind::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_kind_matches_variant() {
        let action = Action::Move {
            destination: Position::new(1, 2),
        };
        assert_eq!(action.kind(), ActionKind::Move);
        assert_eq!(Action::Idle.kind(), ActionKind::Idle);
    }

    #[test]
    fn action_deserializes_from_tagged_json() {
        let json = r#"{"action":"plan","note":"go east"}"#;
        let action: Result<Action, _> = serde_json::from_str(json);
        assert_eq!(
            action.ok(),
            Some(Action::Plan {
                note: String::from("go east")
            })
        );
    }
}
