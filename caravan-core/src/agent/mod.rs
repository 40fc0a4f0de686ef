// Traveling agents: carried goods, properties and the mind that drives them

pub mod beliefs;
pub mod combat;
pub mod decision;
pub mod loot;
pub mod traits;

pub use beliefs::{Belief, BeliefTable, MarketView, PriceQuote, SettlementBelief};
pub use combat::{CombatStat, FightChoice, Stats, TargetCandidate};
pub use decision::{Decision, DecisionContext, Intent, Mind};
pub use loot::{LootItem, loot_value, plan_loot};
pub use traits::{Role, Traits};

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::holding::Holding;
use crate::types::{AgentId, CommodityId, NationId, SettlementId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub role: Role,
    pub nation: NationId,
    pub location: SettlementId,
    pub destination: Option<SettlementId>,
    /// Goods carried on the road.
    pub goods: Holding,
    /// Facilities the agent owns, one holding per settlement.
    pub properties: Vec<(SettlementId, Holding)>,
    pub purse: f64,
    pub stats: Stats,
    pub speed: f64,
    pub alive: bool,
    pub mind: Mind,
    pub intent: Intent,
    pub target: Option<AgentId>,
    pub equipment: BTreeMap<usize, CommodityId>,
    pub last_fight_choice: Option<FightChoice>,
}

impl Agent {
    /// A new agent whose role, personality and decision phase come from
    /// `seed`.
    pub fn spawn(
        name: impl Into<String>,
        nation: NationId,
        location: SettlementId,
        seed: u64,
        config: &SimConfig,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let role = Role::draw(&config.role_weights, &mut rng);
        let traits = Traits::draw(&mut rng, config.criteria_max);
        let counter = if config.decision_time > 0 {
            rng.random_range(0..=config.decision_time)
        } else {
            0
        };
        Self {
            name: name.into(),
            role,
            nation,
            location,
            destination: None,
            goods: Holding::new(0),
            properties: Vec::new(),
            purse: 0.0,
            stats: [1; combat::STAT_COUNT],
            speed: 1.0,
            alive: true,
            mind: Mind::new(seed, traits, counter),
            intent: Intent::Idle,
            target: None,
            equipment: BTreeMap::new(),
            last_fight_choice: None,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_purse(mut self, purse: f64) -> Self {
        self.purse = purse;
        self
    }

    pub fn with_stats(mut self, stats: Stats) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Carry weight net of the traveler's own capacity; positive means
    /// overloaded.
    pub fn net_weight(&self, config: &SimConfig) -> f64 {
        config.traveler_carry + self.goods.weight()
    }

    pub fn property(&self, settlement: SettlementId) -> Option<&Holding> {
        self.properties
            .iter()
            .find(|(s, _)| *s == settlement)
            .map(|(_, h)| h)
    }

    /// Holding at `settlement`, created empty on first use.
    pub fn property_mut(&mut self, settlement: SettlementId) -> &mut Holding {
        let index = match self.properties.iter().position(|(s, _)| *s == settlement) {
            Some(i) => i,
            None => {
                self.properties.push((settlement, Holding::new(0)));
                self.properties.len() - 1
            }
        };
        &mut self.properties[index].1
    }

    /// Score of the equipment the agent has on.
    pub fn equipment_score(&self) -> f64 {
        let stock = self.goods.stock();
        combat::equipment_score(
            self.equipment
                .values()
                .filter_map(|id| stock.get(*id).filter(|c| c.amount() >= 1.0))
                .map(|c| c.combat_stats()),
            &self.stats,
            &self.mind.traits,
        )
    }

    /// Commit the outcome of a decision pass.
    pub fn apply(&mut self, decision: Decision) {
        self.intent = decision.intent;
        self.destination = decision.destination;
        if self.target.is_none() {
            self.target = decision.target;
        }
        self.equipment = decision.equipment;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_spawn_is_deterministic() {
        let mut ids: SlotMap<SettlementId, ()> = SlotMap::with_key();
        let home = ids.insert(());
        let config = SimConfig::default();
        let a = Agent::spawn("a", NationId(0), home, 99, &config);
        let b = Agent::spawn("a", NationId(0), home, 99, &config);
        assert_eq!(a, b);
        assert!((0..=config.decision_time).contains(&a.mind.decision_counter()));
    }

    #[test]
    fn test_property_created_once() {
        let mut ids: SlotMap<SettlementId, ()> = SlotMap::with_key();
        let town = ids.insert(());
        let mut agent = Agent::spawn("a", NationId(0), town, 1, &SimConfig::default());
        assert!(agent.property(town).is_none());
        agent.property_mut(town);
        agent.property_mut(town);
        assert_eq!(agent.properties.len(), 1);
    }
}
