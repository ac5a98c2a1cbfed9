//! Observation assembly and action availability.
//!
//! [`available_actions`] is a pure function of an agent and what it can see;
//! it decides which [`ActionKind`]s a policy may choose. [`build_observation`]
//! filters the candidates returned by a bounding-box query down to the
//! agent's Manhattan view and attaches the available actions.

use std::collections::BTreeSet;

use agora_types::{ActionKind, Agent, Observation, Resource};
use agora_world::check_joinable;

/// The action kinds `agent` may choose given what it sees.
///
/// - Dead agents get nothing.
/// - `Idle` and `Plan` are always available to the living.
/// - `Move` needs a positive `range_per_move` and no harvest in progress.
/// - `Harvest` needs no harvest in progress and a visible resource the agent
///   may join right now.
/// - `Talk` needs another living agent in view.
pub fn available_actions(
    agent: &Agent,
    nearby_agents: &[Agent],
    nearby_resources: &[Resource],
) -> BTreeSet<ActionKind> {
    let mut kinds = BTreeSet::new();
    if agent.dead {
        return kinds;
    }
    kinds.insert(ActionKind::Idle);
    kinds.insert(ActionKind::Plan);

    let harvesting = agent.harvesting.is_some();
    if agent.range_per_move > 0 && !harvesting {
        kinds.insert(ActionKind::Move);
    }
    if !harvesting
        && nearby_resources
            .iter()
            .any(|r| check_joinable(r, agent.id, agent.position).is_ok())
    {
        kinds.insert(ActionKind::Harvest);
    }
    if nearby_agents.iter().any(|a| a.id != agent.id && !a.dead) {
        kinds.insert(ActionKind::Talk);
    }
    kinds
}

/// Build the observation `agent` decides on for `tick`.
///
/// `candidate_agents` and `candidate_resources` are typically the result of
/// a bounding-box query of half-width `visibility_range`; anything beyond
/// the Manhattan view, the agent itself, and dead agents are dropped.
/// Entities are listed in ascending ID order.
pub fn build_observation(
    tick: u64,
    agent: Agent,
    candidate_agents: Vec<Agent>,
    candidate_resources: Vec<Resource>,
) -> Observation {
    let range = agent.visibility_range;
    let mut nearby_agents: Vec<Agent> = candidate_agents
        .into_iter()
        .filter(|a| a.id != agent.id && !a.dead && a.position.manhattan(agent.position) <= range)
        .collect();
    nearby_agents.sort_by_key(|a| a.id);
    let mut nearby_resources: Vec<Resource> = candidate_resources
        .into_iter()
        .filter(|r| r.position.manhattan(agent.position) <= range)
        .collect();
    nearby_resources.sort_by_key(|r| r.id);

    let available_actions = available_actions(&agent, &nearby_agents, &nearby_resources);
    Observation {
        tick,
        agent,
        nearby_agents,
        nearby_resources,
        available_actions,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use agora_types::{AgentId, Position, ResourceId, SimulationId, WorldId};

    use super::*;

    fn agent(x: i32, y: i32) -> Agent {
        Agent {
            id: AgentId::new(),
            simulation_id: SimulationId::new(),
            name: String::from("a"),
            position: Position::new(x, y),
            visibility_range: 5,
            range_per_move: 1,
            energy_level: 10,
            dead: false,
            harvesting: None,
        }
    }

    fn resource(x: i32, y: i32) -> Resource {
        Resource {
            id: ResourceId::new(),
            simulation_id: SimulationId::new(),
            world_id: WorldId::new(),
            position: Position::new(x, y),
            energy_yield: 5,
            required_agents: 1,
            harvesting_area: 1,
            regrow_time: 10,
            available: true,
            being_harvested: false,
            harvesters: BTreeSet::new(),
            last_harvest_tick: None,
            start_harvest_tick: None,
        }
    }

    #[test]
    fn dead_agent_has_no_actions() {
        let mut a = agent(0, 0);
        a.dead = true;
        assert!(available_actions(&a, &[], &[]).is_empty());
    }

    #[test]
    fn lone_agent_can_move_plan_idle() {
        let a = agent(0, 0);
        let kinds = available_actions(&a, &[], &[]);
        assert_eq!(
            kinds,
            BTreeSet::from([ActionKind::Move, ActionKind::Plan, ActionKind::Idle])
        );
    }

    #[test]
    fn harvest_needs_joinable_resource() {
        let a = agent(0, 0);
        let far = resource(3, 0);
        assert!(!available_actions(&a, &[], &[far]).contains(&ActionKind::Harvest));
        let near = resource(1, 0);
        assert!(available_actions(&a, &[], &[near]).contains(&ActionKind::Harvest));
    }

    #[test]
    fn harvesting_agent_cannot_move_or_rejoin() {
        let mut a = agent(0, 0);
        a.harvesting = Some(ResourceId::new());
        let kinds = available_actions(&a, &[], &[resource(0, 0)]);
        assert!(!kinds.contains(&ActionKind::Move));
        assert!(!kinds.contains(&ActionKind::Harvest));
    }

    #[test]
    fn talk_needs_living_neighbour() {
        let a = agent(0, 0);
        let mut b = agent(1, 1);
        assert!(available_actions(&a, &[b.clone()], &[]).contains(&ActionKind::Talk));
        b.dead = true;
        assert!(!available_actions(&a, &[b], &[]).contains(&ActionKind::Talk));
    }

    #[test]
    fn observation_filters_by_manhattan_view() {
        let a = agent(10, 10);
        let self_copy = a.clone();
        let near = agent(12, 12);
        let corner = agent(15, 15);
        let obs = build_observation(
            3,
            a,
            vec![self_copy, near.clone(), corner],
            vec![resource(14, 10), resource(10, 16)],
        );
        assert_eq!(obs.tick, 3);
        assert_eq!(obs.nearby_agents.len(), 1);
        assert!(obs.sees_agent(near.id));
        assert_eq!(obs.nearby_resources.len(), 1);
        assert!(obs.allows(ActionKind::Talk));
    }
}
