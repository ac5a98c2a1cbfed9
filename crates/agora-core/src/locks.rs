//! Per-entity async locks around read-modify-write of agents and resources.
//!
//! Locks are held only for the load-apply-commit of one record set, never
//! across a policy call. Lock order is always resource before agent, and
//! several agents are locked in ascending ID order, so two holders can never
//! wait on each other. Every acquisition is bounded by a timeout.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use agora_types::{AgentId, ResourceId};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Key of a lockable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EntityKey {
    Resource(ResourceId),
    Agent(AgentId),
}

impl core::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Resource(id) => write!(f, "resource {id}"),
            Self::Agent(id) => write!(f, "agent {id}"),
        }
    }
}

/// A lock could not be acquired in time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("timed out after {timeout_ms}ms waiting for the lock on {entity}")]
pub struct LockTimeout {
    /// The contended record.
    pub entity: String,
    /// The timeout that elapsed.
    pub timeout_ms: u64,
}

/// Held lock on one record; released on drop.
pub type EntityGuard = OwnedMutexGuard<()>;

/// Process-wide table of per-entity mutexes.
#[derive(Debug)]
pub struct EntityLocks {
    table: Mutex<BTreeMap<EntityKey, Arc<Mutex<()>>>>,
    timeout: Duration,
}

impl EntityLocks {
    /// Create a lock table whose acquisitions wait at most `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Mutex::new(BTreeMap::new()),
            timeout,
        }
    }

    /// Lock a resource.
    pub async fn lock_resource(&self, id: ResourceId) -> Result<EntityGuard, LockTimeout> {
        self.acquire(EntityKey::Resource(id)).await
    }

    /// Lock one agent.
    pub async fn lock_agent(&self, id: AgentId) -> Result<EntityGuard, LockTimeout> {
        self.acquire(EntityKey::Agent(id)).await
    }

    /// Lock several agents, in ascending ID order.
    pub async fn lock_agents(
        &self,
        ids: &BTreeSet<AgentId>,
    ) -> Result<Vec<EntityGuard>, LockTimeout> {
        let mut guards = Vec::with_capacity(ids.len());
        for &id in ids {
            guards.push(self.acquire(EntityKey::Agent(id)).await?);
        }
        Ok(guards)
    }

    async fn acquire(&self, key: EntityKey) -> Result<EntityGuard, LockTimeout> {
        let mutex = {
            let mut table = self.table.lock().await;
            Arc::clone(table.entry(key).or_default())
        };
        tokio::time::timeout(self.timeout, mutex.lock_owned())
            .await
            .map_err(|_elapsed| LockTimeout {
                entity: key.to_string(),
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            })
    }
}
