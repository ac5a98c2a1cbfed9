//! Error types for one agent step, one resource step, and one cluster tick.
//!
//! The split mirrors how each is handled: an [`AgentActionError`] skips one
//! agent for one tick, a [`ResourceTransitionError`] aborts the whole cluster
//! tick (resource state is shared), and [`ExecutorError`] is what a cluster
//! loop sees when its tick did not complete.

use agora_agents::ActionError;
use agora_types::{AgentId, ResourceId};
use agora_world::WorldError;

use crate::locks::LockTimeout;
use crate::policy::PolicyError;
use crate::store::StoreError;

/// A single agent's load, decide, or apply step failed.
#[derive(Debug, thiserror::Error)]
pub enum AgentActionError {
    /// The agent's state could not be read or written.
    #[error("agent {agent}: store error: {source}")]
    Store {
        /// The agent.
        agent: AgentId,
        /// The underlying store error.
        source: StoreError,
    },

    /// The policy failed to produce a decision.
    #[error("agent {agent}: policy error: {source}")]
    Policy {
        /// The agent.
        agent: AgentId,
        /// The underlying policy error.
        source: PolicyError,
    },

    /// Applying the action hit a fault (not a rule violation).
    #[error("agent {agent}: action error: {source}")]
    Action {
        /// The agent.
        agent: AgentId,
        /// The underlying action error.
        source: ActionError,
    },

    /// The agent or its target resource could not be locked.
    #[error("agent {agent}: {source}")]
    Lock {
        /// The agent.
        agent: AgentId,
        /// The underlying timeout.
        source: LockTimeout,
    },
}

impl AgentActionError {
    /// The agent the failure belongs to.
    pub const fn agent(&self) -> AgentId {
        match self {
            Self::Store { agent, .. }
            | Self::Policy { agent, .. }
            | Self::Action { agent, .. }
            | Self::Lock { agent, .. } => *agent,
        }
    }
}

/// A resource lifecycle update failed mid-transition.
#[derive(Debug, thiserror::Error)]
pub enum ResourceTransitionError {
    /// The resource or a harvester could not be locked.
    #[error("resource {resource}: {source}")]
    Lock {
        /// The resource.
        resource: ResourceId,
        /// The underlying timeout.
        source: LockTimeout,
    },

    /// The resource or its harvesters could not be read or written.
    #[error("resource {resource}: store error: {source}")]
    Store {
        /// The resource.
        resource: ResourceId,
        /// The underlying store error.
        source: StoreError,
    },

    /// The lifecycle rules failed.
    #[error("resource {resource}: {source}")]
    World {
        /// The resource.
        resource: ResourceId,
        /// The underlying world error.
        source: WorldError,
    },
}

/// A cluster tick did not complete.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// A resource transition failed; no agent acted.
    #[error("cluster tick aborted: {source}")]
    ResourceTransition {
        /// The underlying transition error.
        #[from]
        source: ResourceTransitionError,
    },

    /// The cluster's inputs could not be read.
    #[error("cluster tick store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },
}
