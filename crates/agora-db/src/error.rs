//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`sqlx`] errors with additional context about which operation failed.
//! At the [`WorldStore`](agora_core::WorldStore) boundary every [`DbError`]
//! becomes a [`StoreError`].

use agora_core::StoreError;
use agora_types::SimulationId;

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No row with the given ID exists.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Table the row was looked up in.
        entity: &'static str,
        /// The missing ID.
        id: String,
    },

    /// A row with the given ID already exists.
    #[error("{entity} {id} already exists")]
    Duplicate {
        /// Table the row was inserted into.
        entity: &'static str,
        /// The duplicated ID.
        id: String,
    },

    /// The simulation row's version moved on since it was read.
    #[error("version conflict on simulation {simulation}: expected {expected}, found {actual}")]
    VersionConflict {
        /// The simulation row.
        simulation: SimulationId,
        /// Version the caller read.
        expected: u64,
        /// Version found in the table.
        actual: u64,
    },

    /// A stored value does not fit the domain type.
    #[error("invalid {column} value in {table}: {value}")]
    OutOfRange {
        /// Table the value was read from or written to.
        table: &'static str,
        /// Column holding the value.
        column: &'static str,
        /// The offending value.
        value: String,
    },

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DbError {
    /// Build a [`DbError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl core::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Build a [`DbError::OutOfRange`].
    pub fn out_of_range(
        table: &'static str,
        column: &'static str,
        value: impl core::fmt::Display,
    ) -> Self {
        Self::OutOfRange {
            table,
            column,
            value: value.to_string(),
        }
    }

    /// Map a unique-key violation on insert to [`DbError::Duplicate`].
    pub fn on_insert(error: sqlx::Error, entity: &'static str, id: impl core::fmt::Display) -> Self {
        match &error {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Duplicate {
                entity,
                id: id.to_string(),
            },
            _ => Self::Postgres(error),
        }
    }
}

impl From<DbError> for StoreError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::NotFound { entity, id } => Self::NotFound { entity, id },
            DbError::Duplicate { entity, id } => Self::Duplicate { entity, id },
            DbError::VersionConflict {
                simulation,
                expected,
                actual,
            } => Self::ConcurrencyConflict {
                simulation,
                expected,
                actual,
            },
            other => Self::Backend {
                source: Box::new(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_stay_retryable_across_the_boundary() {
        let err = DbError::VersionConflict {
            simulation: SimulationId::new(),
            expected: 3,
            actual: 4,
        };
        assert!(StoreError::from(err).is_conflict());
    }

    #[test]
    fn backend_failures_are_wrapped() {
        let err = StoreError::from(DbError::Config(String::from("bad url")));
        assert!(matches!(err, StoreError::Backend { .. }));
        assert!(err.to_string().contains("bad url"));
    }

    #[test]
    fn missing_rows_keep_their_identity() {
        let err = StoreError::from(DbError::not_found("agent", "a1"));
        assert!(matches!(err, StoreError::NotFound { entity: "agent", .. }));
    }
}
