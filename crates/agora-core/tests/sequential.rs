//! End-to-end tests for the sequential tick path and the resource
//! lifecycle as seen through the store.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::missing_panics_doc
)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use agora_agents::EnergyConfig;
use agora_core::config::{SchedulerConfig, SimulationBoundsConfig};
use agora_core::scenario::{AgentSpec, ResourceSpec, ScenarioWorld};
use agora_core::step::tick_resource;
use agora_core::{
    EntityLocks, ForagerPolicy, MemoryStore, RecordingPublisher, ScenarioConfig,
    SimulationContext, SimulationEndReason, SimulationRunner, WorldStore, seed_simulation,
};
use agora_types::{ActionLogDetails, Position, SimEvent, SimulationId, SimulationUpdate};
use agora_world::Transition;

async fn runner(
    store: &Arc<MemoryStore>,
    simulation_id: SimulationId,
    publisher: Arc<RecordingPublisher>,
    max_ticks: u64,
) -> SimulationRunner {
    let ctx = SimulationContext::load(
        simulation_id,
        Arc::clone(store) as Arc<dyn WorldStore>,
        publisher,
        Arc::new(ForagerPolicy),
        Arc::new(EntityLocks::new(Duration::from_secs(1))),
        EnergyConfig::default(),
    )
    .await
    .unwrap();
    let scheduler = SchedulerConfig {
        pacing_interval_ms: 0,
        ..SchedulerConfig::default()
    };
    let bounds = SimulationBoundsConfig {
        max_ticks,
        ..SimulationBoundsConfig::default()
    };
    let runner = SimulationRunner::new(ctx, scheduler, bounds);
    runner
        .versioned()
        .update_with_retry(simulation_id, SimulationUpdate::running(true), 3)
        .await
        .unwrap();
    runner
}

fn spec(name: &str, x: i32, y: i32, energy_level: i64) -> AgentSpec {
    AgentSpec {
        name: name.to_owned(),
        position: Position::new(x, y),
        visibility_range: 5,
        range_per_move: 1,
        energy_level,
    }
}

fn grid() -> ScenarioWorld {
    ScenarioWorld {
        name: Some(String::from("grid")),
        width: 20,
        height: 20,
        obstacles: Vec::new(),
    }
}

#[tokio::test]
async fn lone_forager_reaches_and_harvests_the_resource() {
    let scenario = ScenarioConfig {
        world: grid(),
        agents: vec![spec("forager", 10, 10, 100)],
        resources: vec![ResourceSpec {
            position: Position::new(12, 12),
            energy_yield: 10,
            required_agents: 1,
            harvesting_area: 1,
            regrow_time: 999,
        }],
    };
    let store = Arc::new(MemoryStore::new());
    let id = seed_simulation(store.as_ref(), &scenario).await.unwrap();
    let publisher = Arc::new(RecordingPublisher::new());
    let runner = runner(&store, id, Arc::clone(&publisher), 20).await;

    let result = runner.run().await.unwrap();
    assert_eq!(result.end_reason, SimulationEndReason::MaxTicksReached);
    assert_eq!(result.final_tick, 20);

    let resource = store.resources(id).await.unwrap().remove(0);
    assert!(!resource.available);
    assert!(resource.last_harvest_tick.is_some_and(|t| t > 0));
    assert!(resource.harvesters.is_empty());

    let agent = store.agents(id).await.unwrap().remove(0);
    assert!(agent.position.manhattan(resource.position) <= 1);
    assert!(agent.harvesting.is_none());

    let harvested: Vec<SimEvent> = publisher
        .events()
        .into_iter()
        .filter(|e| matches!(e, SimEvent::ResourceHarvested { .. }))
        .collect();
    assert_eq!(harvested.len(), 1);
    assert!(publisher.topics().iter().any(|t| t.ends_with(".moved")));
}

#[tokio::test]
async fn starving_agents_die_and_stop_the_simulation() {
    let scenario = ScenarioConfig {
        world: grid(),
        agents: vec![spec("a", 1, 1, 2), spec("b", 15, 15, 2)],
        resources: Vec::new(),
    };
    let store = Arc::new(MemoryStore::new());
    let id = seed_simulation(store.as_ref(), &scenario).await.unwrap();
    let publisher = Arc::new(RecordingPublisher::new());
    let runner = runner(&store, id, Arc::clone(&publisher), 0).await;

    let result = runner.run().await.unwrap();
    assert_eq!(result.end_reason, SimulationEndReason::Extinction);
    assert_eq!(result.final_tick, 2);

    let agents = store.agents(id).await.unwrap();
    assert!(agents.iter().all(|a| a.dead && a.energy_level <= 0));
    assert!(!store.simulation(id).await.unwrap().running);

    let deaths = publisher
        .events()
        .into_iter()
        .filter(|e| matches!(e, SimEvent::AgentDied { .. }))
        .count();
    assert_eq!(deaths, 2);
}

#[tokio::test]
async fn joint_harvest_credits_every_harvester_and_regrows_once() {
    let scenario = ScenarioConfig {
        world: grid(),
        agents: vec![spec("left", 4, 5, 50), spec("right", 6, 5, 50)],
        resources: vec![ResourceSpec {
            position: Position::new(5, 5),
            energy_yield: 8,
            required_agents: 2,
            harvesting_area: 1,
            regrow_time: 3,
        }],
    };
    let store = Arc::new(MemoryStore::new());
    let id = seed_simulation(store.as_ref(), &scenario).await.unwrap();
    let publisher = Arc::new(RecordingPublisher::new());
    let runner = runner(&store, id, Arc::clone(&publisher), 0).await;

    // Tick 1: both join. Tick 2: the harvest completes first thing.
    runner.tick_once().await.unwrap();
    let joined = store.resources(id).await.unwrap().remove(0);
    assert_eq!(joined.harvesters.len(), 2);
    assert!(joined.being_harvested);
    assert_eq!(joined.start_harvest_tick, Some(1));

    runner.tick_once().await.unwrap();
    let depleted = store.resources(id).await.unwrap().remove(0);
    assert!(!depleted.available);
    assert!(depleted.harvesters.is_empty());
    assert_eq!(depleted.last_harvest_tick, Some(2));
    for agent in store.agents(id).await.unwrap() {
        // 50 - 1 (join) + 8 (yield) - 1 (idle on tick 2)
        assert_eq!(agent.energy_level, 56);
        assert!(agent.harvesting.is_none());
    }

    let log = store.action_log(id, None).await.unwrap();
    let harvests: Vec<&ActionLogDetails> = log
        .iter()
        .map(|e| &e.details)
        .filter(|d| matches!(d, ActionLogDetails::Harvested { .. }))
        .collect();
    assert_eq!(harvests.len(), 2);
    for details in harvests {
        let ActionLogDetails::Harvested {
            co_harvesters,
            co_harvester_names,
            energy_gained,
            ..
        } = details
        else {
            panic!("filtered to harvest entries");
        };
        assert_eq!(*energy_gained, 8);
        assert_eq!(co_harvesters.len(), 1);
        assert_eq!(co_harvester_names.len(), 1);
    }
    let events = publisher.events();
    let harvested: BTreeSet<_> = events
        .iter()
        .filter_map(|e| match e {
            SimEvent::ResourceHarvested {
                agent_id,
                energy_level,
                ..
            } => Some((*agent_id, *energy_level)),
            _ => None,
        })
        .collect();
    assert_eq!(harvested.len(), 2);
    assert!(harvested.iter().all(|(_, energy)| *energy == 57));

    // Regrowth is due at tick 5 and happens exactly once.
    let ctx = SimulationContext::load(
        id,
        Arc::clone(&store) as Arc<dyn WorldStore>,
        Arc::clone(&publisher) as Arc<dyn agora_core::EventPublisher>,
        Arc::new(ForagerPolicy),
        Arc::new(EntityLocks::new(Duration::from_secs(1))),
        EnergyConfig::default(),
    )
    .await
    .unwrap();
    let at = |tick| tick_resource(&ctx, depleted.id, tick);
    assert_eq!(at(4).await.unwrap(), Transition::Unchanged);
    assert_eq!(at(5).await.unwrap(), Transition::Regrown);
    for tick in 5..9 {
        assert_eq!(at(tick).await.unwrap(), Transition::Unchanged);
    }
    let regrown = store.resource(depleted.id).await.unwrap();
    assert!(regrown.available);
    assert!(regrown.harvesters.is_empty());
    assert_eq!(regrown.last_harvest_tick, None);
    let grown = publisher
        .topics()
        .into_iter()
        .filter(|t| t.ends_with(".grown"))
        .count();
    assert_eq!(grown, 1);
}
