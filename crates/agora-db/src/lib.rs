//! `PostgreSQL` persistence for the Agora simulation.
//!
//! [`PgWorldStore`] implements [`agora_core::WorldStore`] so the scheduler and
//! tick coordinator can run against a real database instead of the in-memory
//! store. The schema lives in `migrations/` and is applied with
//! [`PostgresPool::run_migrations`].
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`store`] -- The [`WorldStore`](agora_core::WorldStore) implementation
//! - [`error`] -- Data layer errors and their mapping to store errors

pub mod error;
pub mod postgres;
pub mod store;

pub use error::DbError;
pub use postgres::{PostgresConfig, PostgresPool};
pub use store::PgWorldStore;
