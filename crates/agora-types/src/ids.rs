//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Every persisted entity has its own ID type so a resource ID can never be
//! passed where an agent ID is expected. All IDs use UUID v7, which sorts by
//! creation time; the sequential tick path relies on that ordering for its
//! stable "sorted by ID" iteration.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for a simulation run.
    SimulationId
}

define_id! {
    /// Unique identifier for the grid world a simulation plays out on.
    WorldId
}

define_id! {
    /// Unique identifier for an agent.
    AgentId
}

define_id! {
    /// Unique identifier for a harvestable resource.
    ResourceId
}

define_id! {
    /// Unique identifier for an append-only action log entry.
    ActionLogId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let agent = AgentId::new();
        let resource = ResourceId::new();
        assert_ne!(agent.into_inner(), Uuid::nil());
        assert_ne!(resource.into_inner(), Uuid::nil());
    }

    #[test]
    fn ids_sort_by_creation_order() {
        let first = AgentId::new();
        let second = AgentId::new();
        assert!(first < second);
    }

    #[test]
    fn id_display_matches_uuid() {
        let id = SimulationId::new();
        assert_eq!(id.to_string(), id.into_inner().to_string());
    }
}
