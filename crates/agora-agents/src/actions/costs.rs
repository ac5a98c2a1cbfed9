//! Energy cost of an applied or refused action.

use agora_types::ActionKind;

use crate::config::EnergyConfig;

/// Energy charged for an applied action of `kind` that moved `steps` cells.
///
/// Saturates instead of overflowing; the result is always non-negative.
pub fn action_cost(kind: ActionKind, steps: u32, config: &EnergyConfig) -> i64 {
    let base = i64::from(config.tick_cost);
    let extra = match kind {
        ActionKind::Move => i64::from(config.move_step_cost).saturating_mul(i64::from(steps)),
        ActionKind::Talk => i64::from(config.talk_cost),
        ActionKind::Plan => i64::from(config.plan_cost),
        ActionKind::Harvest | ActionKind::Idle => 0,
    };
    base.saturating_add(extra)
}

/// Energy charged when the chosen action was refused.
pub fn rejection_cost(config: &EnergyConfig) -> i64 {
    i64::from(config.tick_cost)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_pays_per_step() {
        let config = EnergyConfig::default();
        assert_eq!(action_cost(ActionKind::Move, 3, &config), 4);
        assert_eq!(action_cost(ActionKind::Idle, 0, &config), 1);
    }

    #[test]
    fn talk_and_plan_costs_are_configurable() {
        let config = EnergyConfig {
            tick_cost: 2,
            move_step_cost: 1,
            talk_cost: 3,
            plan_cost: 5,
        };
        assert_eq!(action_cost(ActionKind::Talk, 0, &config), 5);
        assert_eq!(action_cost(ActionKind::Plan, 0, &config), 7);
        assert_eq!(rejection_cost(&config), 2);
    }
}
