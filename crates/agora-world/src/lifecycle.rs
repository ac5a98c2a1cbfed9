//! The resource lifecycle state machine.
//!
//! A resource is `Available`, `BeingHarvested` (available with harvesters
//! joined), or `Depleted` (harvested, waiting for its regrow delay). The
//! per-tick transitions live in [`advance`]; joining a harvest is a separate
//! operation driven by an agent's action, in [`join_harvest`].
//!
//! Both functions mutate the resource record in place and report what
//! happened. Crediting energy to harvesters, writing the action log and
//! publishing events is left to the caller, which holds the locks.

use agora_types::{AgentId, Position, Resource};
use tracing::debug;

use crate::error::{HarvestError, WorldError};

/// Outcome of one lifecycle evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed.
    Unchanged,
    /// The regrow delay elapsed and the resource is available again.
    Regrown,
    /// Enough harvesters had joined; the harvest completed.
    Harvested {
        /// The agents to credit, in ascending ID order.
        harvesters: Vec<AgentId>,
        /// Energy to credit to each of them.
        energy_yield: i64,
    },
}

/// Evaluate the lifecycle transitions of `resource` for `tick`.
///
/// At most one transition fires per call:
///
/// - `Depleted -> Available` when the resource is unavailable, has no
///   harvesters, and `last_harvest_tick + regrow_time <= tick`. The last
///   harvest tick is cleared.
/// - `Available/BeingHarvested -> Depleted` when the resource is available
///   and has at least `required_agents` (and at least one) harvesters. The
///   harvesters are cleared and `last_harvest_tick` becomes `tick`.
///
/// Evaluating an available resource with too few harvesters changes nothing,
/// so the function is idempotent for repeated calls with the same tick.
///
/// `available` is still `true` while harvesters are joined; it is the
/// harvest guard, and only completion clears it. The invariant that holds
/// is the converse: an unavailable resource has no harvesters.
///
/// # Errors
///
/// Returns [`WorldError::ArithmeticOverflow`] if the number of harvesters
/// does not fit in a `u32`.
pub fn advance(resource: &mut Resource, tick: u64) -> Result<Transition, WorldError> {
    if !resource.available {
        let regrow_due = resource
            .last_harvest_tick
            .and_then(|last| last.checked_add(resource.regrow_time))
            .is_some_and(|due| due <= tick);
        if resource.harvesters.is_empty() && regrow_due {
            resource.available = true;
            resource.being_harvested = false;
            resource.last_harvest_tick = None;
            resource.start_harvest_tick = None;
            debug!(resource_id = %resource.id, tick, "resource regrown");
            return Ok(Transition::Regrown);
        }
        return Ok(Transition::Unchanged);
    }

    let joined =
        u32::try_from(resource.harvesters.len()).map_err(|_e| WorldError::ArithmeticOverflow)?;
    if joined == 0 || joined < resource.required_agents {
        return Ok(Transition::Unchanged);
    }

    let harvesters: Vec<AgentId> = std::mem::take(&mut resource.harvesters)
        .into_iter()
        .collect();
    resource.available = false;
    resource.being_harvested = false;
    resource.last_harvest_tick = Some(tick);
    resource.start_harvest_tick = None;
    debug!(
        resource_id = %resource.id,
        tick,
        harvesters = harvesters.len(),
        "harvest completed"
    );
    Ok(Transition::Harvested {
        harvesters,
        energy_yield: resource.energy_yield,
    })
}

/// Result of a successful join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Harvesters after joining, including the new one.
    pub harvesters: u32,
    /// Harvesters the resource needs.
    pub required_agents: u32,
    /// Whether this agent started the harvest.
    pub started: bool,
}

impl JoinOutcome {
    /// Whether the harvest will complete on the next lifecycle evaluation.
    pub const fn ready(&self) -> bool {
        self.harvesters >= self.required_agents
    }
}

/// Add `agent` to the harvesters of `resource`.
///
/// The join is allowed when the resource is available, the agent stands
/// within `harvesting_area` of it, and either nobody has joined yet (any
/// `required_agents` value may be started) or the new total does not exceed
/// `required_agents`. The first joiner sets `being_harvested` and records
/// `start_harvest_tick`. `available` is left `true`; the next [`advance`]
/// completes the harvest once enough agents have joined.
///
/// # Errors
///
/// Returns a [`HarvestError`] describing why the join is refused. The
/// resource is left untouched in that case.
pub fn join_harvest(
    resource: &mut Resource,
    agent: AgentId,
    agent_position: Position,
    tick: u64,
) -> Result<JoinOutcome, WorldError> {
    check_joinable(resource, agent, agent_position)?;

    let started = resource.harvesters.is_empty();
    resource.harvesters.insert(agent);
    if started {
        resource.being_harvested = true;
        resource.start_harvest_tick = Some(tick);
    }
    let harvesters =
        u32::try_from(resource.harvesters.len()).map_err(|_e| WorldError::ArithmeticOverflow)?;
    Ok(JoinOutcome {
        harvesters,
        required_agents: resource.required_agents,
        started,
    })
}

/// Check the join rules of [`join_harvest`] without mutating anything.
///
/// # Errors
///
/// Returns the [`HarvestError`] the join would fail with.
pub fn check_joinable(
    resource: &Resource,
    agent: AgentId,
    agent_position: Position,
) -> Result<(), HarvestError> {
    if !resource.available {
        return Err(HarvestError::NotAvailable {
            resource: resource.id,
        });
    }
    if resource.harvesters.contains(&agent) {
        return Err(HarvestError::AlreadyJoined {
            agent,
            resource: resource.id,
        });
    }
    let distance = agent_position.manhattan(resource.position);
    if distance > resource.harvesting_area {
        return Err(HarvestError::OutOfRange {
            resource: resource.id,
            distance,
            area: resource.harvesting_area,
        });
    }
    let current = u32::try_from(resource.harvesters.len()).unwrap_or(u32::MAX);
    if current > 0 && current.saturating_add(1) > resource.required_agents {
        return Err(HarvestError::Full {
            resource: resource.id,
            harvesters: current,
            required: resource.required_agents,
        });
    }
    Ok(())
}
