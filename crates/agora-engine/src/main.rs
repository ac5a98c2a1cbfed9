//! Engine binary for the Agora simulation.
//!
//! Loads configuration, chooses the world store, event publisher and agent
//! policy the configuration names, seeds the scenario, and runs one
//! simulation until it ends or the process receives Ctrl-C.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `$AGORA_CONFIG` (default `agora-config.yaml`)
//! 2. Initialize structured logging (tracing)
//! 3. Open the world store (in memory or `PostgreSQL`)
//! 4. Connect to NATS when the publisher or policy needs it
//! 5. Seed the scenario
//! 6. Register and start the simulation
//! 7. Wait for the end or Ctrl-C, then log the result

mod error;
mod nats;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agora_core::config::{
    InfrastructureConfig, LogFormat, LoggingConfig, PolicyConfig, PolicyKind, PublisherKind,
    StoreKind,
};
use agora_core::{
    AgentPolicy, EntityLocks, EventPublisher, ForagerPolicy, IdlePolicy, MemoryStore,
    ScenarioConfig, SimulationConfig, SimulationContext, SimulationRegistry, SimulationResult,
    SimulationRunner, TracingPublisher, WanderPolicy, WorldStore, log_simulation_end,
    seed_simulation,
};
use agora_db::{PgWorldStore, PostgresPool};
use agora_types::SimulationId;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::nats::{NatsPolicy, NatsPublisher};

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "agora-config.yaml";

/// How often the engine checks whether the simulation has ended.
const END_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if any initialization step or the simulation itself fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1-2. Configuration, then logging at the configured level.
    let config = load_config()?;
    init_tracing(&config.logging);
    info!(
        mode = ?config.scheduler.mode,
        store = ?config.infrastructure.store,
        publisher = ?config.infrastructure.publisher,
        policy = ?config.policy.kind,
        max_ticks = config.simulation.max_ticks,
        "agora-engine starting"
    );

    // 3. World store.
    let store = Box::pin(open_store(&config.infrastructure)).await?;

    // 4. NATS, only when something needs it.
    let needs_nats = config.infrastructure.publisher == PublisherKind::Nats
        || config.policy.kind == PolicyKind::Nats;
    let nats_client = if needs_nats {
        let url = &config.infrastructure.nats_url;
        info!(nats_url = url, "Connecting to NATS");
        Some(nats::connect(url).await?)
    } else {
        None
    };
    let publisher = build_publisher(config.infrastructure.publisher, nats_client.clone())?;
    let policy = build_policy(&config.policy, nats_client)?;

    // 5. Scenario.
    let scenario = if config.scenario.agents.is_empty() {
        info!("Scenario has no agents, seeding the demo scenario");
        ScenarioConfig::demo()
    } else {
        config.scenario
    };
    let simulation_id = seed_simulation(store.as_ref(), &scenario).await?;
    info!(
        simulation_id = %simulation_id,
        agents = scenario.agents.len(),
        resources = scenario.resources.len(),
        "Scenario seeded"
    );

    // 6. Register and start.
    let locks = Arc::new(EntityLocks::new(Duration::from_millis(
        config.scheduler.lock_timeout_ms,
    )));
    let ctx = SimulationContext::load(
        simulation_id,
        store,
        publisher,
        policy,
        locks,
        config.energy,
    )
    .await?;
    let runner = SimulationRunner::new(ctx, config.scheduler, config.simulation);
    let registry = SimulationRegistry::new();
    registry.register(runner).await?;
    registry.start_simulation(simulation_id).await?;

    // 7. Wait, then report.
    let result = wait_for_end_or_interrupt(&registry, simulation_id).await?;
    log_simulation_end(&result);
    info!(
        end_reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        "agora-engine shutdown complete"
    );
    Ok(())
}

/// Load the configuration named by `AGORA_CONFIG`, falling back to defaults
/// when the file does not exist.
fn load_config() -> Result<SimulationConfig, EngineError> {
    let path = std::env::var_os("AGORA_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        Ok(SimulationConfig::from_file(&path)?)
    } else {
        Ok(SimulationConfig::parse("")?)
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }
}

async fn open_store(infra: &InfrastructureConfig) -> Result<Arc<dyn WorldStore>, EngineError> {
    match infra.store {
        StoreKind::Memory => {
            info!("Using in-memory world store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreKind::Postgres => {
            let pool = PostgresPool::connect_and_migrate(&infra.postgres_url).await?;
            Ok(Arc::new(PgWorldStore::new(pool)))
        }
    }
}

fn build_publisher(
    kind: PublisherKind,
    client: Option<async_nats::Client>,
) -> Result<Arc<dyn EventPublisher>, EngineError> {
    match (kind, client) {
        (PublisherKind::Tracing, _) => Ok(Arc::new(TracingPublisher)),
        (PublisherKind::Nats, Some(client)) => Ok(Arc::new(NatsPublisher::new(client))),
        (PublisherKind::Nats, None) => Err(missing_client("publisher")),
    }
}

fn build_policy(
    config: &PolicyConfig,
    client: Option<async_nats::Client>,
) -> Result<Arc<dyn AgentPolicy>, EngineError> {
    match (config.kind, client) {
        (PolicyKind::Idle, _) => Ok(Arc::new(IdlePolicy)),
        (PolicyKind::Forager, _) => Ok(Arc::new(ForagerPolicy)),
        (PolicyKind::Wander, _) => Ok(Arc::new(WanderPolicy::new(config.seed))),
        (PolicyKind::Nats, Some(client)) => Ok(Arc::new(NatsPolicy::new(
            client,
            Duration::from_millis(config.decision_timeout_ms),
        ))),
        (PolicyKind::Nats, None) => Err(missing_client("policy")),
    }
}

fn missing_client(component: &str) -> EngineError {
    EngineError::Nats {
        message: format!("NATS {component} selected but no client was connected"),
    }
}

/// Block until the simulation ends on its own, or stop it on Ctrl-C.
async fn wait_for_end_or_interrupt(
    registry: &SimulationRegistry,
    simulation_id: SimulationId,
) -> Result<SimulationResult, EngineError> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for Ctrl-C, stopping anyway");
                }
                info!(simulation_id = %simulation_id, "Interrupt received, stopping simulation");
                return Ok(registry.stop_simulation(simulation_id).await?);
            }
            () = tokio::time::sleep(END_POLL_INTERVAL) => {
                if !registry.is_running(simulation_id).await {
                    return Ok(registry.wait_for_end(simulation_id).await?);
                }
            }
        }
    }
}
