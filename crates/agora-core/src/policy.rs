//! The agent policy seam and the built-in policies.
//!
//! Once per agent per tick the executor hands the agent's [`Observation`]
//! to an [`AgentPolicy`] and applies the returned [`Action`]. A policy may be
//! slow or network bound; the executor never holds a lock across the call.
//! Failures are per agent: the agent is skipped for the tick and everyone
//! else proceeds.
//!
//! The built-in policies are deterministic for a given observation:
//!
//! - [`IdlePolicy`] always idles.
//! - [`ForagerPolicy`] harvests whenever it can, otherwise walks to the
//!   nearest resource it could join, otherwise idles.
//! - [`WanderPolicy`] takes a random step, seeded per agent and tick.

use agora_types::{Action, ActionKind, AgentId, Observation, Position, Resource};
use futures::future::BoxFuture;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Errors that can occur while obtaining a decision.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The agent did not respond within the deadline.
    #[error("agent {agent_id} timed out (deadline: {deadline_ms}ms)")]
    Timeout {
        /// The agent that timed out.
        agent_id: AgentId,
        /// The deadline in milliseconds.
        deadline_ms: u64,
    },

    /// The decision transport failed.
    #[error("decision transport error: {message}")]
    Transport {
        /// Description of the error.
        message: String,
    },

    /// The response could not be understood.
    #[error("invalid decision response: {message}")]
    InvalidResponse {
        /// Description of the error.
        message: String,
    },
}

/// A source of agent decisions.
pub trait AgentPolicy: Send + Sync {
    /// Choose an action for `observation.agent` given what it sees.
    fn decide<'a>(
        &'a self,
        observation: &'a Observation,
    ) -> BoxFuture<'a, Result<Action, PolicyError>>;
}

/// A policy that always returns [`Action::Idle`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IdlePolicy;

impl AgentPolicy for IdlePolicy {
    fn decide<'a>(
        &'a self,
        _observation: &'a Observation,
    ) -> BoxFuture<'a, Result<Action, PolicyError>> {
        Box::pin(async { Ok(Action::Idle) })
    }
}

/// Harvest when possible, otherwise walk toward the nearest resource that
/// could be joined.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForagerPolicy;

impl ForagerPolicy {
    /// The decision, computed synchronously.
    pub fn choose(observation: &Observation) -> Action {
        let agent = &observation.agent;
        let here = agent.position;

        if observation.allows(ActionKind::Harvest)
            && let Some(target) = nearest(
                observation
                    .nearby_resources
                    .iter()
                    .filter(|r| agora_world::check_joinable(r, agent.id, here).is_ok()),
                here,
            )
        {
            return Action::Harvest {
                resource_id: target.id,
            };
        }

        if observation.allows(ActionKind::Move)
            && let Some(target) = nearest(
                observation
                    .nearby_resources
                    .iter()
                    .filter(|r| r.position != here && has_room(r)),
                here,
            )
        {
            return Action::Move {
                destination: target.position,
            };
        }

        Action::Idle
    }
}

impl AgentPolicy for ForagerPolicy {
    fn decide<'a>(
        &'a self,
        observation: &'a Observation,
    ) -> BoxFuture<'a, Result<Action, PolicyError>> {
        Box::pin(async move { Ok(Self::choose(observation)) })
    }
}

fn has_room(resource: &Resource) -> bool {
    let joined = u32::try_from(resource.harvesters.len()).unwrap_or(u32::MAX);
    resource.available && (joined == 0 || joined < resource.required_agents)
}

fn nearest<'r>(
    resources: impl Iterator<Item = &'r Resource>,
    from: Position,
) -> Option<&'r Resource> {
    resources.min_by_key(|r| (r.position.manhattan(from), r.id))
}

/// Random walk, reproducible for a given seed, agent and tick.
#[derive(Debug, Clone, Copy)]
pub struct WanderPolicy {
    seed: u64,
}

impl WanderPolicy {
    /// Create a wander policy from a seed.
    pub const fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// The decision, computed synchronously.
    pub fn choose(&self, observation: &Observation) -> Action {
        let agent = &observation.agent;
        if !observation.allows(ActionKind::Move) {
            return Action::Idle;
        }
        let (hi, lo) = agent.id.into_inner().as_u64_pair();
        let mixed = self.seed
            ^ hi
            ^ lo.rotate_left(17)
            ^ observation.tick.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let mut rng = StdRng::seed_from_u64(mixed);

        let reach = i32::try_from(agent.range_per_move).unwrap_or(i32::MAX).max(1);
        let distance = rng.random_range(1..=reach);
        let (dx, dy) = match rng.random_range(0..4_u8) {
            0 => (distance, 0),
            1 => (distance.saturating_neg(), 0),
            2 => (0, distance),
            _ => (0, distance.saturating_neg()),
        };
        Action::Move {
            destination: Position::new(
                agent.position.x.saturating_add(dx),
                agent.position.y.saturating_add(dy),
            ),
        }
    }
}

impl AgentPolicy for WanderPolicy {
    fn decide<'a>(
        &'a self,
        observation: &'a Observation,
    ) -> BoxFuture<'a, Result<Action, PolicyError>> {
        Box::pin(async move { Ok(self.choose(observation)) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use agora_agents::build_observation;
    use agora_types::{Agent, ResourceId, SimulationId, WorldId};

    use super::*;

    fn agent(x: i32, y: i32) -> Agent {
        Agent {
            id: AgentId::new(),
            simulation_id: SimulationId::new(),
            name: String::from("forager"),
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
            regrow_time: 5,
            available: true,
            being_harvested: false,
            harvesters: BTreeSet::new(),
            last_harvest_tick: None,
            start_harvest_tick: None,
        }
    }

    #[test]
    fn forager_walks_to_nearest_resource() {
        let near = resource(12, 12);
        let far = resource(14, 14);
        let obs = build_observation(1, agent(10, 10), Vec::new(), vec![far, near.clone()]);
        assert_eq!(
            ForagerPolicy::choose(&obs),
            Action::Move {
                destination: near.position
            }
        );
    }

    #[test]
    fn forager_harvests_when_in_area() {
        let r = resource(10, 11);
        let obs = build_observation(1, agent(10, 10), Vec::new(), vec![r.clone()]);
        assert_eq!(
            ForagerPolicy::choose(&obs),
            Action::Harvest { resource_id: r.id }
        );
    }

    #[test]
    fn forager_idles_without_resources() {
        let obs = build_observation(1, agent(10, 10), Vec::new(), Vec::new());
        assert_eq!(ForagerPolicy::choose(&obs), Action::Idle);
    }

    #[test]
    fn wander_is_reproducible() {
        let policy = WanderPolicy::new(7);
        let obs = build_observation(3, agent(5, 5), Vec::new(), Vec::new());
        let first = policy.choose(&obs);
        assert_eq!(first, policy.choose(&obs));
        assert!(matches!(
            first,
            Action::Move { destination } if destination.manhattan(Position::new(5, 5)) == 1
        ));
    }

    #[tokio::test]
    async fn idle_policy_idles() {
        let obs = build_observation(1, agent(0, 0), Vec::new(), Vec::new());
        assert_eq!(IdlePolicy.decide(&obs).await.unwrap(), Action::Idle);
    }
}
