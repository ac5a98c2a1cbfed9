//! Execution handlers for agent actions.
//!
//! Each handler checks the domain rules for its action against the
//! observation the agent decided on, then mutates the agent (and, for a
//! harvest join, the resource) in place. Handlers never charge energy; the
//! caller combines [`HandlerResult::energy_cost`] with
//! [`crate::vitals::apply_energy_cost`].
//!
//! A refused action returns an [`ActionError`] and leaves every record
//! untouched.

use agora_types::{
    Action, ActionKind, ActionLogDetails, Agent, AgentId, Observation, Position, Resource, World,
};
use agora_world::{find_path, join_harvest};

use crate::config::EnergyConfig;
use crate::error::ActionError;

use super::costs;

/// Maximum allowed length for a message (characters).
const MAX_MESSAGE_LENGTH: usize = 500;

/// World context an action is applied against.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    /// The world grid, for pathfinding.
    pub world: &'a World,
    /// What the agent saw when it decided.
    pub observation: &'a Observation,
    /// The tick being applied.
    pub tick: u64,
    /// Energy rules.
    pub energy: &'a EnergyConfig,
}

/// What an applied action did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerResult {
    /// Kind of the applied action.
    pub kind: ActionKind,
    /// Cells walked, zero for anything but a move.
    pub steps: u32,
    /// `(from, to)` when the agent changed cell.
    pub moved: Option<(Position, Position)>,
    /// Energy to charge for this tick.
    pub energy_cost: i64,
    /// Action log payload, `None` for an idle tick.
    pub details: Option<ActionLogDetails>,
}

/// Walk along the shortest path toward `destination`.
///
/// The agent advances `min(range_per_move, path_len - 1)` steps.
pub fn execute_move(
    agent: &mut Agent,
    destination: Position,
    ctx: &ExecutionContext<'_>,
) -> Result<HandlerResult, ActionError> {
    if agent.position == destination {
        return Err(ActionError::AlreadyAtDestination {
            position: destination,
        });
    }
    let path = find_path(ctx.world, agent.position, destination)?;
    let remaining = u32::try_from(path.len().saturating_sub(1)).unwrap_or(u32::MAX);
    let steps = agent.range_per_move.min(remaining);
    let index = usize::try_from(steps).map_err(|_e| ActionError::ArithmeticOverflow {
        context: String::from("path index"),
    })?;
    let Some(&to) = path.get(index) else {
        return Err(ActionError::ArithmeticOverflow {
            context: String::from("path step out of range"),
        });
    };

    let from = agent.position;
    agent.position = to;
    Ok(HandlerResult {
        kind: ActionKind::Move,
        steps,
        moved: Some((from, to)),
        energy_cost: costs::action_cost(ActionKind::Move, steps, ctx.energy),
        details: Some(ActionLogDetails::Moved { from, to, steps }),
    })
}

/// Join the harvest of `resource`.
///
/// The resource must have been visible when the agent decided. The join
/// rules themselves are checked against the fresh resource record.
pub fn execute_harvest(
    agent: &mut Agent,
    resource: &mut Resource,
    ctx: &ExecutionContext<'_>,
) -> Result<HandlerResult, ActionError> {
    if !ctx
        .observation
        .nearby_resources
        .iter()
        .any(|r| r.id == resource.id)
    {
        return Err(ActionError::ResourceNotInView {
            resource: resource.id,
        });
    }
    let outcome = join_harvest(resource, agent.id, agent.position, ctx.tick)?;
    agent.harvesting = Some(resource.id);
    Ok(HandlerResult {
        kind: ActionKind::Harvest,
        steps: 0,
        moved: None,
        energy_cost: costs::action_cost(ActionKind::Harvest, 0, ctx.energy),
        details: Some(ActionLogDetails::JoinedHarvest {
            resource_id: resource.id,
            harvesters: outcome.harvesters,
            required_agents: outcome.required_agents,
        }),
    })
}

/// Say `message` to `target`, which must be in view.
///
/// Messages longer than 500 characters are truncated.
pub fn execute_talk(
    target: AgentId,
    message: &str,
    ctx: &ExecutionContext<'_>,
) -> Result<HandlerResult, ActionError> {
    if !ctx.observation.sees_agent(target) {
        return Err(ActionError::TargetNotInView { target });
    }
    let message: String = message.chars().take(MAX_MESSAGE_LENGTH).collect();
    Ok(HandlerResult {
        kind: ActionKind::Talk,
        steps: 0,
        moved: None,
        energy_cost: costs::action_cost(ActionKind::Talk, 0, ctx.energy),
        details: Some(ActionLogDetails::Talked {
            listener: target,
            message,
        }),
    })
}

/// Record a plan.
pub fn execute_plan(note: &str, ctx: &ExecutionContext<'_>) -> HandlerResult {
    HandlerResult {
        kind: ActionKind::Plan,
        steps: 0,
        moved: None,
        energy_cost: costs::action_cost(ActionKind::Plan, 0, ctx.energy),
        details: Some(ActionLogDetails::Planned {
            note: note.chars().take(MAX_MESSAGE_LENGTH).collect(),
        }),
    }
}

/// Do nothing.
pub fn execute_idle(ctx: &ExecutionContext<'_>) -> HandlerResult {
    HandlerResult {
        kind: ActionKind::Idle,
        steps: 0,
        moved: None,
        energy_cost: costs::action_cost(ActionKind::Idle, 0, ctx.energy),
        details: None,
    }
}

/// Dispatch `action` to its handler.
///
/// `resource` is the fresh, locked record of the resource a harvest targets
/// and is ignored for every other action.
pub fn execute_action(
    agent: &mut Agent,
    action: &Action,
    resource: Option<&mut Resource>,
    ctx: &ExecutionContext<'_>,
) -> Result<HandlerResult, ActionError> {
    if agent.dead {
        return Err(ActionError::AgentDead { agent: agent.id });
    }
    let kind = action.kind();
    if !ctx.observation.allows(kind) {
        return Err(ActionError::NotAvailable { kind });
    }
    match action {
        Action::Move { destination } => execute_move(agent, *destination, ctx),
        Action::Harvest { resource_id } => match resource {
            Some(resource) if resource.id == *resource_id => execute_harvest(agent, resource, ctx),
            _ => Err(ActionError::ResourceNotInView {
                resource: *resource_id,
            }),
        },
        Action::Talk { target, message } => execute_talk(*target, message, ctx),
        Action::Plan { note } => Ok(execute_plan(note, ctx)),
        Action::Idle => Ok(execute_idle(ctx)),
    }
}
