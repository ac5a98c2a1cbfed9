//! Optimistic concurrency on the simulation record.
//!
//! The simulation's `tick` and `running` fields are the only state shared by
//! every cluster loop and by external callers. They are never locked;
//! instead every write names the version it was based on, and a write based
//! on a stale version fails with [`StoreError::ConcurrencyConflict`].

use std::sync::Arc;

use agora_types::{Simulation, SimulationId, SimulationUpdate};
use tracing::warn;

use crate::store::{StoreError, WorldStore};

/// Version-checked access to simulation records.
#[derive(Clone)]
pub struct VersionedStore {
    store: Arc<dyn WorldStore>,
}

impl VersionedStore {
    /// Wrap a store.
    pub fn new(store: Arc<dyn WorldStore>) -> Self {
        Self { store }
    }

    /// Read the current record, including its version.
    pub async fn read(&self, id: SimulationId) -> Result<Simulation, StoreError> {
        self.store.simulation(id).await
    }

    /// Write `update` if the record is still at `expected_version`.
    ///
    /// Returns the new version.
    pub async fn compare_and_update(
        &self,
        id: SimulationId,
        expected_version: u64,
        update: SimulationUpdate,
    ) -> Result<u64, StoreError> {
        let updated = self
            .store
            .compare_and_update_simulation(id, expected_version, update)
            .await?;
        Ok(updated.version)
    }

    /// Write `update` on top of the record `current`, returning the updated
    /// record.
    pub async fn update_from(
        &self,
        current: &Simulation,
        update: SimulationUpdate,
    ) -> Result<Simulation, StoreError> {
        self.store
            .compare_and_update_simulation(current.id, current.version, update)
            .await
    }

    /// Re-read and retry `update` on conflict, at most `retries` extra times.
    ///
    /// Only for writes that are safe to re-apply on a fresh record, such as
    /// setting the running flag.
    pub async fn update_with_retry(
        &self,
        id: SimulationId,
        update: SimulationUpdate,
        retries: u32,
    ) -> Result<Simulation, StoreError> {
        let mut attempt: u32 = 0;
        loop {
            let current = self.read(id).await?;
            match self.update_from(&current, update).await {
                Err(err) if err.is_conflict() && attempt < retries => {
                    attempt = attempt.saturating_add(1);
                    warn!(simulation_id = %id, attempt, "simulation record conflict, retrying");
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use agora_types::{World, WorldId};

    use super::*;
    use crate::memory::MemoryStore;

    async fn seeded() -> (VersionedStore, SimulationId) {
        let store = Arc::new(MemoryStore::new());
        let id = SimulationId::new();
        let world = World {
            id: WorldId::new(),
            simulation_id: id,
            width: 4,
            height: 4,
            obstacles: BTreeSet::new(),
        };
        let sim = Simulation {
            id,
            world_id: world.id,
            tick: 0,
            running: false,
            version: 0,
        };
        store.insert_simulation(sim, world).await.unwrap();
        (VersionedStore::new(store), id)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exactly_one_concurrent_update_wins() {
        let (versioned, id) = seeded().await;
        let a = versioned.clone();
        let b = versioned.clone();
        let (first, second) = tokio::join!(
            tokio::spawn(async move { a.compare_and_update(id, 0, SimulationUpdate::tick(1)).await }),
            tokio::spawn(async move { b.compare_and_update(id, 0, SimulationUpdate::tick(7)).await }),
        );
        let results = [first.unwrap(), second.unwrap()];
        let winners: Vec<u64> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
        assert_eq!(winners, vec![1]);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(loser.is_conflict());

        let record = versioned.read(id).await.unwrap();
        assert_eq!(record.version, 1);
        assert!(record.tick == 1 || record.tick == 7);
    }

    #[tokio::test]
    async fn retry_applies_on_fresh_record() {
        let (versioned, id) = seeded().await;
        versioned
            .compare_and_update(id, 0, SimulationUpdate::tick(3))
            .await
            .unwrap();
        let record = versioned
            .update_with_retry(id, SimulationUpdate::running(true), 3)
            .await
            .unwrap();
        assert!(record.running);
        assert_eq!(record.tick, 3);
        assert_eq!(record.version, 2);
    }
}
