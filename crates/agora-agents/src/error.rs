//! Error types for the agora-agents crate.
//!
//! Almost every [`ActionError`] is a domain rule violation: the chosen action
//! is refused, the agent still pays its base tick cost, and the tick goes on.
//! Only [`ActionError::ArithmeticOverflow`] indicates a fault.

use agora_types::{ActionKind, AgentId, Position, ResourceId};
use agora_world::{HarvestError, PathError, WorldError};

/// Errors that can occur while applying an agent's action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    /// The agent is dead and cannot act.
    #[error("agent {agent} is dead")]
    AgentDead {
        /// The agent.
        agent: AgentId,
    },

    /// The action kind is not among the agent's available actions.
    #[error("action {kind} is not available")]
    NotAvailable {
        /// The refused kind.
        kind: ActionKind,
    },

    /// A move targets the cell the agent already stands on.
    #[error("agent is already at destination {position}")]
    AlreadyAtDestination {
        /// The agent's cell.
        position: Position,
    },

    /// The destination is off the grid or unreachable.
    #[error(transparent)]
    Path(#[from] PathError),

    /// A talk targets an agent that is not in view.
    #[error("agent {target} is not in view")]
    TargetNotInView {
        /// The intended listener.
        target: AgentId,
    },

    /// A harvest targets a resource that is not in view.
    #[error("resource {resource} is not in view")]
    ResourceNotInView {
        /// The intended resource.
        resource: ResourceId,
    },

    /// The resource refused the join.
    #[error("harvest not possible: {0}")]
    Harvest(#[from] HarvestError),

    /// An arithmetic overflow occurred while applying the action.
    #[error("arithmetic overflow: {context}")]
    ArithmeticOverflow {
        /// Description of what was being computed.
        context: String,
    },
}

impl ActionError {
    /// Whether this error is a refused action rather than a fault.
    pub const fn is_rule_violation(&self) -> bool {
        !matches!(self, Self::ArithmeticOverflow { .. })
    }
}

impl From<WorldError> for ActionError {
    fn from(err: WorldError) -> Self {
        match err {
            WorldError::Path(source) => Self::Path(source),
            WorldError::Harvest(source) => Self::Harvest(source),
            WorldError::ArithmeticOverflow => Self::ArithmeticOverflow {
                context: String::from("world calculation"),
            },
        }
    }
}
