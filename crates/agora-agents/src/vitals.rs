//! Energy bookkeeping and death.
//!
//! All arithmetic saturates. An agent whose energy is zero or below after a
//! deduction is marked dead; dead agents are never charged or credited again.

use agora_types::Agent;
use tracing::debug;

/// Result of charging one tick of energy to an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VitalTickResult {
    /// Energy actually deducted.
    pub energy_spent: i64,
    /// Whether the agent died as a result.
    pub died: bool,
}

/// Deduct `cost` from the agent's energy and mark it dead at zero or below.
pub fn apply_energy_cost(agent: &mut Agent, cost: i64) -> VitalTickResult {
    if agent.dead {
        return VitalTickResult {
            energy_spent: 0,
            died: false,
        };
    }
    agent.energy_level = agent.energy_level.saturating_sub(cost);
    let died = agent.energy_level <= 0;
    if died {
        agent.dead = true;
        debug!(agent_id = %agent.id, energy = agent.energy_level, "agent ran out of energy");
    }
    VitalTickResult {
        energy_spent: cost,
        died,
    }
}

/// Credit a completed harvest to the agent and clear its harvesting pointer.
///
/// Returns `false` (and changes nothing) for a dead agent.
pub fn credit_harvest(agent: &mut Agent, energy_yield: i64) -> bool {
    if agent.dead {
        return false;
    }
    agent.energy_level = agent.energy_level.saturating_add(energy_yield);
    agent.harvesting = None;
    true
}

#[cfg(test)]
mod tests {
    use agora_types::{AgentId, Position, ResourceId, SimulationId};

    use super::*;

    fn agent(energy_level: i64) -> Agent {
        Agent {
            id: AgentId::new(),
            simulation_id: SimulationId::new(),
            name: String::from("vera"),
            position: Position::new(0, 0),
            visibility_range: 3,
            range_per_move: 1,
            energy_level,
            dead: false,
            harvesting: None,
        }
    }

    #[test]
    fn agent_dies_at_zero() {
        let mut a = agent(2);
        assert!(!apply_energy_cost(&mut a, 1).died);
        let result = apply_energy_cost(&mut a, 1);
        assert!(result.died);
        assert!(a.dead);
        assert_eq!(a.energy_level, 0);
    }

    #[test]
    fn dead_agent_is_not_charged() {
        let mut a = agent(0);
        a.dead = true;
        let result = apply_energy_cost(&mut a, 5);
        assert_eq!(result.energy_spent, 0);
        assert_eq!(a.energy_level, 0);
    }

    #[test]
    fn credit_clears_harvest_pointer() {
        let mut a = agent(3);
        a.harvesting = Some(ResourceId::new());
        assert!(credit_harvest(&mut a, 10));
        assert_eq!(a.energy_level, 13);
        assert_eq!(a.harvesting, None);
    }
}
