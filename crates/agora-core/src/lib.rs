//! Cluster scheduler, tick coordinator, and collaborator seams for the Agora
//! simulation.
//!
//! Agents that are far apart never need to synchronise. This crate
//! partitions them into spatial clusters, advances each cluster on its own
//! loop, re-partitions as they move, and can bring every cluster back to one
//! common tick. A fully sequential path produces the same results for tests
//! and small worlds.
//!
//! # Modules
//!
//! - [`clustering`] -- Connected components of the interaction-radius graph.
//! - [`executor`] -- One tick for one cluster: resources, then agents.
//! - [`scheduler`] -- Per-cluster loops, re-partitioning, catch-up stop.
//! - [`runner`] -- Per-simulation control loop, sequential or clustered.
//! - [`registry`] -- Start, stop and single-step simulations by ID.
//! - [`step`] -- The resource step and the agent step shared by both paths.
//! - [`store`] -- [`WorldStore`] persistence seam and [`WriteBatch`].
//! - [`memory`] -- In-process [`WorldStore`].
//! - [`versioned`] -- Optimistic concurrency on the simulation record.
//! - [`locks`] -- Per-entity async locks.
//! - [`policy`] -- [`AgentPolicy`] seam and the built-in policies.
//! - [`publish`] -- [`EventPublisher`] seam.
//! - [`scenario`] -- Initial world, agents and resources.
//! - [`config`] -- Configuration loading from `agora-config.yaml`.
//! - [`error`] -- Agent, resource and cluster tick errors.
//!
//! [`WorldStore`]: store::WorldStore
//! [`WriteBatch`]: store::WriteBatch
//! [`AgentPolicy`]: policy::AgentPolicy
//! [`EventPublisher`]: publish::EventPublisher

pub mod clustering;
pub mod config;
pub mod error;
pub mod executor;
pub mod locks;
pub mod memory;
pub mod policy;
pub mod publish;
pub mod registry;
pub mod runner;
pub mod scenario;
pub mod scheduler;
pub mod step;
pub mod store;
pub mod versioned;

pub use clustering::{ClusterMember, compute_clusters};
pub use config::{ConfigError, ExecutionMode, SimulationConfig};
pub use error::{AgentActionError, ExecutorError, ResourceTransitionError};
pub use executor::{ClusterExecutor, ClusterTickReport};
pub use locks::EntityLocks;
pub use memory::MemoryStore;
pub use policy::{AgentPolicy, ForagerPolicy, IdlePolicy, PolicyError, WanderPolicy};
pub use publish::{EventPublisher, RecordingPublisher, TracingPublisher};
pub use registry::{RegistryError, SimulationRegistry};
pub use runner::{SimulationEndReason, SimulationResult, SimulationRunner, log_simulation_end};
pub use scenario::{ScenarioConfig, seed_simulation};
pub use scheduler::{ClusterProgress, ClusterScheduler, LoopId, SchedulerError};
pub use step::SimulationContext;
pub use store::{StoreError, WorldStore, WriteBatch};
pub use versioned::VersionedStore;
