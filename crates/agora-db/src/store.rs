//! [`WorldStore`] over `PostgreSQL`.
//!
//! One table per entity type, keyed by UUID. Agents and resources store their
//! position as two indexed integer columns so bounding-box queries are a pair
//! of `BETWEEN` ranges. The simulation row carries the optimistic version
//! counter; a compare-and-update is a single conditional `UPDATE`.
//!
//! Unsigned domain values are stored in signed columns and range-checked on
//! the way in and out.

use agora_core::store::{StoreFuture, WorldStore, WriteBatch};
use agora_types::{
    ActionKind, ActionLogDetails, ActionLogEntry, ActionLogId, Agent, AgentId, BoundingBox,
    Position, Resource, ResourceId, Simulation, SimulationId, SimulationUpdate, World, WorldId,
};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::DbError;
use crate::postgres::PostgresPool;

const AGENT_COLUMNS: &str = "id, simulation_id, name, x, y, visibility_range, range_per_move, \
     energy_level, dead, harvesting";

const RESOURCE_COLUMNS: &str = "id, simulation_id, world_id, x, y, energy_yield, required_agents, \
     harvesting_area, regrow_time, available, being_harvested, harvesters, last_harvest_tick, \
     start_harvest_tick";

// ---------------------------------------------------------------------------
// Integer conversions
// ---------------------------------------------------------------------------

fn to_i64(table: &'static str, column: &'static str, value: u64) -> Result<i64, DbError> {
    i64::try_from(value).map_err(|_e| DbError::out_of_range(table, column, value))
}

fn to_i32(table: &'static str, column: &'static str, value: u32) -> Result<i32, DbError> {
    i32::try_from(value).map_err(|_e| DbError::out_of_range(table, column, value))
}

fn from_i64(table: &'static str, column: &'static str, value: i64) -> Result<u64, DbError> {
    u64::try_from(value).map_err(|_e| DbError::out_of_range(table, column, value))
}

fn from_i32(table: &'static str, column: &'static str, value: i32) -> Result<u32, DbError> {
    u32::try_from(value).map_err(|_e| DbError::out_of_range(table, column, value))
}

fn opt_to_i64(
    table: &'static str,
    column: &'static str,
    value: Option<u64>,
) -> Result<Option<i64>, DbError> {
    value.map(|v| to_i64(table, column, v)).transpose()
}

fn opt_from_i64(
    table: &'static str,
    column: &'static str,
    value: Option<i64>,
) -> Result<Option<u64>, DbError> {
    value.map(|v| from_i64(table, column, v)).transpose()
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
struct SimulationRow {
    id: Uuid,
    world_id: Uuid,
    tick: i64,
    running: bool,
    version: i64,
}

impl TryFrom<SimulationRow> for Simulation {
    type Error = DbError;

    fn try_from(row: SimulationRow) -> Result<Self, DbError> {
        Ok(Self {
            id: SimulationId(row.id),
            world_id: WorldId(row.world_id),
            tick: from_i64("simulations", "tick", row.tick)?,
            running: row.running,
            version: from_i64("simulations", "version", row.version)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WorldRow {
    id: Uuid,
    simulation_id: Uuid,
    width: i32,
    height: i32,
    obstacles: Json<Vec<Position>>,
}

impl TryFrom<WorldRow> for World {
    type Error = DbError;

    fn try_from(row: WorldRow) -> Result<Self, DbError> {
        Ok(Self {
            id: WorldId(row.id),
            simulation_id: SimulationId(row.simulation_id),
            width: from_i32("worlds", "width", row.width)?,
            height: from_i32("worlds", "height", row.height)?,
            obstacles: row.obstacles.0.into_iter().collect(),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AgentRow {
    id: Uuid,
    simulation_id: Uuid,
    name: String,
    x: i32,
    y: i32,
    visibility_range: i32,
    range_per_move: i32,
    energy_level: i64,
    dead: bool,
    harvesting: Option<Uuid>,
}

impl TryFrom<AgentRow> for Agent {
    type Error = DbError;

    fn try_from(row: AgentRow) -> Result<Self, DbError> {
        Ok(Self {
            id: AgentId(row.id),
            simulation_id: SimulationId(row.simulation_id),
            name: row.name,
            position: Position::new(row.x, row.y),
            visibility_range: from_i32("agents", "visibility_range", row.visibility_range)?,
            range_per_move: from_i32("agents", "range_per_move", row.range_per_move)?,
            energy_level: row.energy_level,
            dead: row.dead,
            harvesting: row.harvesting.map(ResourceId),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ResourceRow {
    id: Uuid,
    simulation_id: Uuid,
    world_id: Uuid,
    x: i32,
    y: i32,
    energy_yield: i64,
    required_agents: i32,
    harvesting_area: i32,
    regrow_time: i64,
    available: bool,
    being_harvested: bool,
    harvesters: Vec<Uuid>,
    last_harvest_tick: Option<i64>,
    start_harvest_tick: Option<i64>,
}

impl TryFrom<ResourceRow> for Resource {
    type Error = DbError;

    fn try_from(row: ResourceRow) -> Result<Self, DbError> {
        Ok(Self {
            id: ResourceId(row.id),
            simulation_id: SimulationId(row.simulation_id),
            world_id: WorldId(row.world_id),
            position: Position::new(row.x, row.y),
            energy_yield: row.energy_yield,
            required_agents: from_i32("resources", "required_agents", row.required_agents)?,
            harvesting_area: from_i32("resources", "harvesting_area", row.harvesting_area)?,
            regrow_time: from_i64("resources", "regrow_time", row.regrow_time)?,
            available: row.available,
            being_harvested: row.being_harvested,
            harvesters: row.harvesters.into_iter().map(AgentId).collect(),
            last_harvest_tick: opt_from_i64(
                "resources",
                "last_harvest_tick",
                row.last_harvest_tick,
            )?,
            start_harvest_tick: opt_from_i64(
                "resources",
                "start_harvest_tick",
                row.start_harvest_tick,
            )?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ActionLogRow {
    id: Uuid,
    simulation_id: Uuid,
    agent_id: Uuid,
    tick: i64,
    kind: Json<ActionKind>,
    details: Json<ActionLogDetails>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ActionLogRow> for ActionLogEntry {
    type Error = DbError;

    fn try_from(row: ActionLogRow) -> Result<Self, DbError> {
        Ok(Self {
            id: ActionLogId(row.id),
            simulation_id: SimulationId(row.simulation_id),
            agent_id: AgentId(row.agent_id),
            tick: from_i64("action_log", "tick", row.tick)?,
            kind: row.kind.0,
            details: row.details.0,
            created_at: row.created_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, DbError>
where
    T: TryFrom<R, Error = DbError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ---------------------------------------------------------------------------
// Statements shared by insert and commit
// ---------------------------------------------------------------------------

async fn write_agent(conn: &mut PgConnection, agent: &Agent, insert: bool) -> Result<u64, DbError> {
    let sql = if insert {
        "INSERT INTO agents (id, simulation_id, name, x, y, visibility_range, range_per_move, \
         energy_level, dead, harvesting) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
    } else {
        "UPDATE agents SET simulation_id = $2, name = $3, x = $4, y = $5, visibility_range = $6, \
         range_per_move = $7, energy_level = $8, dead = $9, harvesting = $10 WHERE id = $1"
    };
    let result = sqlx::query(sql)
        .bind(agent.id.into_inner())
        .bind(agent.simulation_id.into_inner())
        .bind(&agent.name)
        .bind(agent.position.x)
        .bind(agent.position.y)
        .bind(to_i32("agents", "visibility_range", agent.visibility_range)?)
        .bind(to_i32("agents", "range_per_move", agent.range_per_move)?)
        .bind(agent.energy_level)
        .bind(agent.dead)
        .bind(agent.harvesting.map(ResourceId::into_inner))
        .execute(&mut *conn)
        .await
        .map_err(|e| DbError::on_insert(e, "agent", agent.id))?;
    Ok(result.rows_affected())
}

async fn write_resource(
    conn: &mut PgConnection,
    resource: &Resource,
    insert: bool,
) -> Result<u64, DbError> {
    let sql = if insert {
        "INSERT INTO resources (id, simulation_id, world_id, x, y, energy_yield, \
         required_agents, harvesting_area, regrow_time, available, being_harvested, harvesters, \
         last_harvest_tick, start_harvest_tick) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
    } else {
        "UPDATE resources SET simulation_id = $2, world_id = $3, x = $4, y = $5, \
         energy_yield = $6, required_agents = $7, harvesting_area = $8, regrow_time = $9, \
         available = $10, being_harvested = $11, harvesters = $12, last_harvest_tick = $13, \
         start_harvest_tick = $14 WHERE id = $1"
    };
    let harvesters: Vec<Uuid> = resource
        .harvesters
        .iter()
        .copied()
        .map(AgentId::into_inner)
        .collect();
    let result = sqlx::query(sql)
        .bind(resource.id.into_inner())
        .bind(resource.simulation_id.into_inner())
        .bind(resource.world_id.into_inner())
        .bind(resource.position.x)
        .bind(resource.position.y)
        .bind(resource.energy_yield)
        .bind(to_i32("resources", "required_agents", resource.required_agents)?)
        .bind(to_i32("resources", "harvesting_area", resource.harvesting_area)?)
        .bind(to_i64("resources", "regrow_time", resource.regrow_time)?)
        .bind(resource.available)
        .bind(resource.being_harvested)
        .bind(&harvesters)
        .bind(opt_to_i64(
            "resources",
            "last_harvest_tick",
            resource.last_harvest_tick,
        )?)
        .bind(opt_to_i64(
            "resources",
            "start_harvest_tick",
            resource.start_harvest_tick,
        )?)
        .execute(&mut *conn)
        .await
        .map_err(|e| DbError::on_insert(e, "resource", resource.id))?;
    Ok(result.rows_affected())
}

async fn append_log(conn: &mut PgConnection, entry: &ActionLogEntry) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO action_log (id, simulation_id, agent_id, tick, kind, details, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(entry.id.into_inner())
    .bind(entry.simulation_id.into_inner())
    .bind(entry.agent_id.into_inner())
    .bind(to_i64("action_log", "tick", entry.tick)?)
    .bind(Json(entry.kind))
    .bind(Json(&entry.details))
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| DbError::on_insert(e, "action log entry", entry.id))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// PgWorldStore
// ---------------------------------------------------------------------------

/// A [`WorldStore`] backed by a [`PostgresPool`].
#[derive(Debug, Clone)]
pub struct PgWorldStore {
    pool: PostgresPool,
}

impl PgWorldStore {
    /// Wrap a pool whose migrations have already been applied.
    pub const fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub const fn pool(&self) -> &PostgresPool {
        &self.pool
    }

    const fn pg(&self) -> &PgPool {
        self.pool.pool()
    }

    async fn fetch_simulation(&self, id: SimulationId) -> Result<Simulation, DbError> {
        sqlx::query_as::<_, SimulationRow>(
            "SELECT id, world_id, tick, running, version FROM simulations WHERE id = $1",
        )
        .bind(id.into_inner())
        .fetch_optional(self.pg())
        .await?
        .ok_or_else(|| DbError::not_found("simulation", id))?
        .try_into()
    }

    async fn fetch_world(&self, id: WorldId) -> Result<World, DbError> {
        sqlx::query_as::<_, WorldRow>(
            "SELECT id, simulation_id, width, height, obstacles FROM worlds WHERE id = $1",
        )
        .bind(id.into_inner())
        .fetch_optional(self.pg())
        .await?
        .ok_or_else(|| DbError::not_found("world", id))?
        .try_into()
    }

    async fn fetch_agent(&self, id: AgentId) -> Result<Agent, DbError> {
        sqlx::query_as::<_, AgentRow>(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = $1"))
            .bind(id.into_inner())
            .fetch_optional(self.pg())
            .await?
            .ok_or_else(|| DbError::not_found("agent", id))?
            .try_into()
    }

    async fn fetch_resource(&self, id: ResourceId) -> Result<Resource, DbError> {
        sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = $1"
        ))
        .bind(id.into_inner())
        .fetch_optional(self.pg())
        .await?
        .ok_or_else(|| DbError::not_found("resource", id))?
        .try_into()
    }

    async fn list_agents(
        &self,
        simulation: SimulationId,
        bbox: Option<BoundingBox>,
    ) -> Result<Vec<Agent>, DbError> {
        let rows = match bbox {
            None => {
                sqlx::query_as::<_, AgentRow>(&format!(
                    "SELECT {AGENT_COLUMNS} FROM agents WHERE simulation_id = $1 ORDER BY id"
                ))
                .bind(simulation.into_inner())
                .fetch_all(self.pg())
                .await?
            }
            Some(b) => {
                sqlx::query_as::<_, AgentRow>(&format!(
                    "SELECT {AGENT_COLUMNS} FROM agents WHERE simulation_id = $1 \
                     AND x BETWEEN $2 AND $3 AND y BETWEEN $4 AND $5 ORDER BY id"
                ))
                .bind(simulation.into_inner())
                .bind(b.min_x)
                .bind(b.max_x)
                .bind(b.min_y)
                .bind(b.max_y)
                .fetch_all(self.pg())
                .await?
            }
        };
        convert_all(rows)
    }

    async fn list_resources(
        &self,
        simulation: SimulationId,
        bbox: Option<BoundingBox>,
    ) -> Result<Vec<Resource>, DbError> {
        let rows = match bbox {
            None => {
                sqlx::query_as::<_, ResourceRow>(&format!(
                    "SELECT {RESOURCE_COLUMNS} FROM resources WHERE simulation_id = $1 ORDER BY id"
                ))
                .bind(simulation.into_inner())
                .fetch_all(self.pg())
                .await?
            }
            Some(b) => {
                sqlx::query_as::<_, ResourceRow>(&format!(
                    "SELECT {RESOURCE_COLUMNS} FROM resources WHERE simulation_id = $1 \
                     AND x BETWEEN $2 AND $3 AND y BETWEEN $4 AND $5 ORDER BY id"
                ))
                .bind(simulation.into_inner())
                .bind(b.min_x)
                .bind(b.max_x)
                .bind(b.min_y)
                .bind(b.max_y)
                .fetch_all(self.pg())
                .await?
            }
        };
        convert_all(rows)
    }

    async fn insert_simulation_row(
        &self,
        simulation: &Simulation,
        world: &World,
    ) -> Result<(), DbError> {
        let obstacles: Vec<Position> = world.obstacles.iter().copied().collect();
        let mut tx = self.pg().begin().await?;
        sqlx::query(
            "INSERT INTO simulations (id, world_id, tick, running, version) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(simulation.id.into_inner())
        .bind(simulation.world_id.into_inner())
        .bind(to_i64("simulations", "tick", simulation.tick)?)
        .bind(simulation.running)
        .bind(to_i64("simulations", "version", simulation.version)?)
        .execute(&mut *tx)
        .await
        .map_err(|e| DbError::on_insert(e, "simulation", simulation.id))?;
        sqlx::query(
            "INSERT INTO worlds (id, simulation_id, width, height, obstacles) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(world.id.into_inner())
        .bind(world.simulation_id.into_inner())
        .bind(to_i32("worlds", "width", world.width)?)
        .bind(to_i32("worlds", "height", world.height)?)
        .bind(Json(&obstacles))
        .execute(&mut *tx)
        .await
        .map_err(|e| DbError::on_insert(e, "world", world.id))?;
        tx.commit().await?;
        tracing::debug!(simulation_id = %simulation.id, "Inserted simulation");
        Ok(())
    }

    async fn commit_batch(&self, batch: &WriteBatch) -> Result<(), DbError> {
        if batch.is_empty() {
            return Ok(());
        }
        // Dropping the transaction on an early return rolls it back.
        let mut tx = self.pg().begin().await?;
        for agent in &batch.agents {
            if write_agent(&mut tx, agent, false).await? == 0 {
                return Err(DbError::not_found("agent", agent.id));
            }
        }
        for resource in &batch.resources {
            if write_resource(&mut tx, resource, false).await? == 0 {
                return Err(DbError::not_found("resource", resource.id));
            }
        }
        for entry in &batch.action_log {
            append_log(&mut tx, entry).await?;
        }
        tx.commit().await?;
        tracing::trace!(
            agents = batch.agents.len(),
            resources = batch.resources.len(),
            log_entries = batch.action_log.len(),
            "Committed write batch"
        );
        Ok(())
    }

    async fn list_action_log(
        &self,
        simulation: SimulationId,
        agent: Option<AgentId>,
    ) -> Result<Vec<ActionLogEntry>, DbError> {
        let rows = sqlx::query_as::<_, ActionLogRow>(
            "SELECT id, simulation_id, agent_id, tick, kind, details, created_at \
             FROM action_log \
             WHERE simulation_id = $1 AND ($2::UUID IS NULL OR agent_id = $2) \
             ORDER BY seq",
        )
        .bind(simulation.into_inner())
        .bind(agent.map(AgentId::into_inner))
        .fetch_all(self.pg())
        .await?;
        convert_all(rows)
    }

    async fn compare_and_update(
        &self,
        id: SimulationId,
        expected_version: u64,
        update: SimulationUpdate,
    ) -> Result<Simulation, DbError> {
        let expected = to_i64("simulations", "version", expected_version)?;
        let row = sqlx::query_as::<_, SimulationRow>(
            "UPDATE simulations \
             SET tick = COALESCE($3, tick), running = COALESCE($4, running), version = version + 1 \
             WHERE id = $1 AND version = $2 \
             RETURNING id, world_id, tick, running, version",
        )
        .bind(id.into_inner())
        .bind(expected)
        .bind(opt_to_i64("simulations", "tick", update.tick)?)
        .bind(update.running)
        .fetch_optional(self.pg())
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                // Either the row is gone or its version moved on.
                let current = self.fetch_simulation(id).await?;
                Err(DbError::VersionConflict {
                    simulation: id,
                    expected: expected_version,
                    actual: current.version,
                })
            }
        }
    }
}

impl WorldStore for PgWorldStore {
    fn simulation(&self, id: SimulationId) -> StoreFuture<'_, Simulation> {
        Box::pin(async move { Ok(self.fetch_simulation(id).await?) })
    }

    fn world(&self, id: WorldId) -> StoreFuture<'_, World> {
        Box::pin(async move { Ok(self.fetch_world(id).await?) })
    }

    fn agent(&self, id: AgentId) -> StoreFuture<'_, Agent> {
        Box::pin(async move { Ok(self.fetch_agent(id).await?) })
    }

    fn resource(&self, id: ResourceId) -> StoreFuture<'_, Resource> {
        Box::pin(async move { Ok(self.fetch_resource(id).await?) })
    }

    fn agents(&self, simulation: SimulationId) -> StoreFuture<'_, Vec<Agent>> {
        Box::pin(async move { Ok(self.list_agents(simulation, None).await?) })
    }

    fn resources(&self, simulation: SimulationId) -> StoreFuture<'_, Vec<Resource>> {
        Box::pin(async move { Ok(self.list_resources(simulation, None).await?) })
    }

    fn agents_in_box(
        &self,
        simulation: SimulationId,
        bbox: BoundingBox,
    ) -> StoreFuture<'_, Vec<Agent>> {
        Box::pin(async move { Ok(self.list_agents(simulation, Some(bbox)).await?) })
    }

    fn resources_in_box(
        &self,
        simulation: SimulationId,
        bbox: BoundingBox,
    ) -> StoreFuture<'_, Vec<Resource>> {
        Box::pin(async move { Ok(self.list_resources(simulation, Some(bbox)).await?) })
    }

    fn insert_simulation(&self, simulation: Simulation, world: World) -> StoreFuture<'_, ()> {
        Box::pin(async move { Ok(self.insert_simulation_row(&simulation, &world).await?) })
    }

    fn insert_agent(&self, agent: Agent) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.pg().acquire().await.map_err(DbError::from)?;
            write_agent(&mut conn, &agent, true).await?;
            Ok(())
        })
    }

    fn insert_resource(&self, resource: Resource) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.pg().acquire().await.map_err(DbError::from)?;
            write_resource(&mut conn, &resource, true).await?;
            Ok(())
        })
    }

    fn commit(&self, batch: WriteBatch) -> StoreFuture<'_, ()> {
        Box::pin(async move { Ok(self.commit_batch(&batch).await?) })
    }

    fn action_log(
        &self,
        simulation: SimulationId,
        agent: Option<AgentId>,
    ) -> StoreFuture<'_, Vec<ActionLogEntry>> {
        Box::pin(async move { Ok(self.list_action_log(simulation, agent).await?) })
    }

    fn compare_and_update_simulation(
        &self,
        id: SimulationId,
        expected_version: u64,
        update: SimulationUpdate,
    ) -> StoreFuture<'_, Simulation> {
        Box::pin(async move { Ok(self.compare_and_update(id, expected_version, update).await?) })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn unsigned_values_past_i64_are_rejected() {
        let err = to_i64("simulations", "tick", u64::MAX).err();
        assert!(matches!(
            err,
            Some(DbError::OutOfRange {
                column: "tick",
                ..
            })
        ));
    }

    #[test]
    fn negative_columns_do_not_decode() {
        let row = AgentRow {
            id: Uuid::now_v7(),
            simulation_id: Uuid::now_v7(),
            name: String::from("a"),
            x: 0,
            y: 0,
            visibility_range: -1,
            range_per_move: 1,
            energy_level: 10,
            dead: false,
            harvesting: None,
        };
        assert!(Agent::try_from(row).is_err());
    }

    #[test]
    fn resource_row_round_trips_harvesters() {
        let harvester = Uuid::now_v7();
        let row = ResourceRow {
            id: Uuid::now_v7(),
            simulation_id: Uuid::now_v7(),
            world_id: Uuid::now_v7(),
            x: 3,
            y: 4,
            energy_yield: 10,
            required_agents: 2,
            harvesting_area: 1,
            regrow_time: 5,
            available: true,
            being_harvested: true,
            harvesters: vec![harvester],
            last_harvest_tick: None,
            start_harvest_tick: Some(7),
        };
        let resource = Resource::try_from(row);
        assert!(resource.is_ok());
        if let Ok(resource) = resource {
            assert_eq!(resource.position, Position::new(3, 4));
            assert_eq!(resource.harvesters, BTreeSet::from([AgentId(harvester)]));
            assert_eq!(resource.start_harvest_tick, Some(7));
        }
    }
}
