// Personality criteria and roles

use rand::Rng;
use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

/// What a traveler does for a living.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum Role {
    Trader,
    Soldier,
    Bandit,
    Agent,
    Guard,
    Thug,
}

impl Role {
    /// Roles that go looking for someone to rob.
    pub fn is_aggressive(self) -> bool {
        matches!(self, Role::Bandit | Role::Thug)
    }

    pub fn is_merchant(self) -> bool {
        self == Role::Trader
    }

    /// Draw a role with probability proportional to its weight.
    ///
    /// Falls back to `Trader` when no weight is positive.
    pub fn draw<R: Rng>(weights: &[(Role, f64)], rng: &mut R) -> Role {
        let total: f64 = weights.iter().map(|(_, w)| w.max(0.0)).sum();
        if total <= 0.0 {
            return Role::Trader;
        }
        let mut pick = rng.random_range(0.0..total);
        for &(role, weight) in weights {
            let weight = weight.max(0.0);
            if pick < weight {
                return role;
            }
            pick -= weight;
        }
        weights.last().map_or(Role::Trader, |(role, _)| *role)
    }
}

/// Decision criteria, each in `[1, criteria_max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Traits {
    pub buy: f64,
    pub sell: f64,
    pub attack: f64,
    pub defense: f64,
    pub fight: f64,
    pub run: f64,
    pub yield_: f64,
    pub greed: f64,
    pub invest: f64,
}

impl Traits {
    pub fn uniform(value: f64) -> Self {
        Self {
            buy: value,
            sell: value,
            attack: value,
            defense: value,
            fight: value,
            run: value,
            yield_: value,
            greed: value,
            invest: value,
        }
    }

    pub fn draw<R: Rng>(rng: &mut R, criteria_max: f64) -> Self {
        let max = criteria_max.max(1.0);
        let mut roll = || {
            if max > 1.0 {
                rng.random_range(1.0..=max)
            } else {
                1.0
            }
        };
        Self {
            buy: roll(),
            sell: roll(),
            attack: roll(),
            defense: roll(),
            fight: roll(),
            run: roll(),
            yield_: roll(),
            greed: roll(),
            invest: roll(),
        }
    }
}
