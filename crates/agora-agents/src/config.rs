//! Energy costs charged to agents each tick.
//!
//! These values correspond to the `energy` section of `agora-config.yaml`.
//! Every field has a default so partially specified sections deserialize.

use serde::Deserialize;

/// Per-tick energy rules.
///
/// After an agent's action is applied it pays `tick_cost`, plus
/// `move_step_cost` for every path step taken, plus `talk_cost` or
/// `plan_cost` for those actions. A rejected action only pays `tick_cost`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnergyConfig {
    /// Base cost paid by every living agent each tick (default: 1).
    #[serde(default = "default_tick_cost")]
    pub tick_cost: u32,

    /// Cost per path step moved (default: 1).
    #[serde(default = "default_move_step_cost")]
    pub move_step_cost: u32,

    /// Extra cost of talking (default: 0).
    #[serde(default)]
    pub talk_cost: u32,

    /// Extra cost of planning (default: 0).
    #[serde(default)]
    pub plan_cost: u32,
}

const fn default_tick_cost() -> u32 {
    1
}

const fn default_move_step_cost() -> u32 {
    1
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            tick_cost: default_tick_cost(),
            move_step_cost: default_move_step_cost(),
            talk_cost: 0,
            plan_cost: 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn partial_section_uses_defaults() {
        let config: EnergyConfig = serde_yml::from_str("talk_cost: 2").unwrap();
        assert_eq!(config.tick_cost, 1);
        assert_eq!(config.move_step_cost, 1);
        assert_eq!(config.talk_cost, 2);
        assert_eq!(config.plan_cost, 0);
    }
}
