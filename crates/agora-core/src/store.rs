//! The persistence seam.
//!
//! The scheduler only needs point lookups by ID, per-simulation listings and
//! bounding-box queries, an atomic multi-record write, and a
//! compare-and-update on the simulation record. [`WorldStore`] captures
//! exactly that. Methods return boxed futures so the trait stays object safe
//! and can be shared as `Arc<dyn WorldStore>`.

use agora_types::{
    ActionLogEntry, Agent, AgentId, BoundingBox, Resource, ResourceId, Simulation, SimulationId,
    SimulationUpdate, World, WorldId,
};
use futures::future::BoxFuture;

/// Boxed future returned by every [`WorldStore`] method.
pub type StoreFuture<'a, T> = BoxFuture<'a, Result<T, StoreError>>;

/// Errors raised by a [`WorldStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record with the given ID exists.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// The missing ID.
        id: String,
    },

    /// A record with the given ID already exists.
    #[error("{entity} {id} already exists")]
    Duplicate {
        /// Kind of record.
        entity: &'static str,
        /// The duplicated ID.
        id: String,
    },

    /// The simulation record changed since it was read.
    #[error(
        "concurrency conflict on simulation {simulation}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        /// The simulation record.
        simulation: SimulationId,
        /// Version the caller read.
        expected: u64,
        /// Version found at write time.
        actual: u64,
    },

    /// A version counter would overflow.
    #[error("version counter overflow on simulation {simulation}")]
    VersionOverflow {
        /// The simulation record.
        simulation: SimulationId,
    },

    /// The storage backend failed.
    #[error("storage backend error: {source}")]
    Backend {
        /// The backend error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StoreError {
    /// Build a [`StoreError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl core::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether this is an optimistic concurrency conflict.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Records written together by [`WorldStore::commit`].
///
/// A commit is all-or-nothing: either every record in the batch is written
/// or none is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    /// Agent records to upsert.
    pub agents: Vec<Agent>,
    /// Resource records to upsert.
    pub resources: Vec<Resource>,
    /// Action log entries to append.
    pub action_log: Vec<ActionLogEntry>,
}

impl WriteBatch {
    /// Add an agent record.
    #[must_use]
    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.agents.push(agent);
        self
    }

    /// Add a resource record.
    #[must_use]
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    /// Add an action log entry.
    #[must_use]
    pub fn with_log(mut self, entry: ActionLogEntry) -> Self {
        self.action_log.push(entry);
        self
    }

    /// Whether the batch writes nothing.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty() && self.resources.is_empty() && self.action_log.is_empty()
    }
}

/// Storage of world state, keyed by ID, one flat table per entity type.
pub trait WorldStore: Send + Sync {
    /// Fetch a simulation record.
    fn simulation(&self, id: SimulationId) -> StoreFuture<'_, Simulation>;

    /// Fetch a world grid.
    fn world(&self, id: WorldId) -> StoreFuture<'_, World>;

    /// Fetch an agent.
    fn agent(&self, id: AgentId) -> StoreFuture<'_, Agent>;

    /// Fetch a resource.
    fn resource(&self, id: ResourceId) -> StoreFuture<'_, Resource>;

    /// Every agent of a simulation, dead or alive, in ascending ID order.
    fn agents(&self, simulation: SimulationId) -> StoreFuture<'_, Vec<Agent>>;

    /// Every resource of a simulation, in ascending ID order.
    fn resources(&self, simulation: SimulationId) -> StoreFuture<'_, Vec<Resource>>;

    /// Agents of a simulation whose position lies inside `bbox`.
    fn agents_in_box(
        &self,
        simulation: SimulationId,
        bbox: BoundingBox,
    ) -> StoreFuture<'_, Vec<Agent>>;

    /// Resources of a simulation whose position lies inside `bbox`.
    fn resources_in_box(
        &self,
        simulation: SimulationId,
        bbox: BoundingBox,
    ) -> StoreFuture<'_, Vec<Resource>>;

    /// Insert a new simulation together with its world grid.
    fn insert_simulation(&self, simulation: Simulation, world: World) -> StoreFuture<'_, ()>;

    /// Insert a new agent.
    fn insert_agent(&self, agent: Agent) -> StoreFuture<'_, ()>;

    /// Insert a new resource.
    fn insert_resource(&self, resource: Resource) -> StoreFuture<'_, ()>;

    /// Write every record of `batch` atomically.
    fn commit(&self, batch: WriteBatch) -> StoreFuture<'_, ()>;

    /// Action log entries of a simulation, optionally for one agent, in
    /// append order.
    fn action_log(
        &self,
        simulation: SimulationId,
        agent: Option<AgentId>,
    ) -> StoreFuture<'_, Vec<ActionLogEntry>>;

    /// Apply `update` to the simulation record if its version still equals
    /// `expected_version`, bumping the version. Returns the updated record.
    ///
    /// Fails with [`StoreError::ConcurrencyConflict`] (leaving the record
    /// untouched) when the version has moved on.
    fn compare_and_update_simulation(
        &self,
        id: SimulationId,
        expected_version: u64,
        update: SimulationUpdate,
    ) -> StoreFuture<'_, Simulation>;

    /// Upsert a single agent.
    fn put_agent(&self, agent: Agent) -> StoreFuture<'_, ()> {
        self.commit(WriteBatch::default().with_agent(agent))
    }

    /// Upsert a single resource.
    fn put_resource(&self, resource: Resource) -> StoreFuture<'_, ()> {
        self.commit(WriteBatch::default().with_resource(resource))
    }

    /// Append a single action log entry.
    fn append_action_log(&self, entry: ActionLogEntry) -> StoreFuture<'_, ()> {
        self.commit(WriteBatch::default().with_log(entry))
    }
}
