//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during engine startup and simulation execution.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: agora_core::ConfigError,
    },

    /// Seeding or loading the simulation failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: agora_core::StoreError,
    },

    /// The database could not be reached or migrated.
    #[error("database error: {source}")]
    Database {
        /// The underlying data layer error.
        #[from]
        source: agora_db::DbError,
    },

    /// Starting, stopping or awaiting the simulation failed.
    #[error("registry error: {source}")]
    Registry {
        /// The underlying registry error.
        #[from]
        source: agora_core::RegistryError,
    },

    /// NATS connection failed.
    #[error("NATS error: {message}")]
    Nats {
        /// Description of the NATS failure.
        message: String,
    },
}
