//! Error types for the `agora-world` crate.

use agora_types::{AgentId, Position, ResourceId};

/// Errors from pathfinding on the world grid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// The start or end cell is off the grid.
    #[error("position {position} is out of bounds")]
    OutOfBounds {
        /// The offending cell.
        position: Position,
    },

    /// No obstacle-free path connects the two cells.
    #[error("no path from {from} to {to}")]
    NotFound {
        /// Start cell.
        from: Position,
        /// End cell.
        to: Position,
    },
}

/// Reasons a request to join a harvest is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HarvestError {
    /// The resource is depleted and waiting to regrow.
    #[error("resource {resource} is not available")]
    NotAvailable {
        /// The resource.
        resource: ResourceId,
    },

    /// The agent is too far from the resource to join.
    #[error("agent is {distance} cells from resource {resource}, harvesting area is {area}")]
    OutOfRange {
        /// The resource.
        resource: ResourceId,
        /// Manhattan distance from the agent.
        distance: u32,
        /// The resource's harvesting area.
        area: u32,
    },

    /// Joining would exceed the number of harvesters the resource needs.
    #[error("resource {resource} already has {harvesters} of {required} harvesters")]
    Full {
        /// The resource.
        resource: ResourceId,
        /// Current harvesters.
        harvesters: u32,
        /// Harvesters needed.
        required: u32,
    },

    /// The agent is already harvesting this resource.
    #[error("agent {agent} already harvests resource {resource}")]
    AlreadyJoined {
        /// The agent.
        agent: AgentId,
        /// The resource.
        resource: ResourceId,
    },
}

/// Errors that can occur during world operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    /// Pathfinding failed.
    #[error(transparent)]
    Path(#[from] PathError),

    /// A harvest join was refused.
    #[error(transparent)]
    Harvest(#[from] HarvestError),

    /// Arithmetic overflow during a checked operation.
    #[error("arithmetic overflow in world calculation")]
    ArithmeticOverflow,
}
