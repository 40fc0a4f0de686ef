// World state: settlements, agents and the tick that drives them

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use thiserror::Error;

use crate::agent::{
    Agent, DecisionContext, FightChoice, Intent, LootItem, MarketView, PriceQuote, TargetCandidate,
    combat, loot_value, plan_loot,
};
use crate::catalog::Catalog;
use crate::config::SimConfig;
use crate::holding::{Holding, HoldingError, InvestmentPlan};
use crate::ledger::Lot;
use crate::types::{
    AgentId, CommodityId, FacilityKey, GoodId, Millis, NationId, Quantity, SettlementId,
};

static EMPTY_CATALOG: Catalog = Catalog::empty();

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to serialize world: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to deserialize world: {0}")]
    Deserialize(#[source] serde_json::Error),
}

/// A town with a market and facilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub name: String,
    pub nation: NationId,
    pub holding: Holding,
    pub neighbors: Vec<SettlementId>,
}

/// What happened when an attacker caught up with its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encounter {
    /// Target gave up its goods without a fight.
    Yielded,
    /// Target fights or runs; melee is resolved elsewhere.
    Contested(FightChoice),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct World {
    pub config: SimConfig,
    #[serde(with = "crate::types::map_pairs")]
    catalogs: BTreeMap<NationId, Catalog>,
    settlements: SlotMap<SettlementId, Settlement>,
    agents: SlotMap<AgentId, Agent>,
    time: Millis,
}

impl Default for World {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

fn catalog_for(catalogs: &BTreeMap<NationId, Catalog>, nation: NationId) -> &Catalog {
    catalogs.get(&nation).unwrap_or(&EMPTY_CATALOG)
}

impl World {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            catalogs: BTreeMap::new(),
            settlements: SlotMap::with_key(),
            agents: SlotMap::with_key(),
            time: 0,
        }
    }

    pub fn time(&self) -> Millis {
        self.time
    }

    // === Catalogs ===

    pub fn add_catalog(&mut self, nation: NationId, catalog: Catalog) {
        self.catalogs.insert(nation, catalog);
    }

    pub fn catalog(&self, nation: NationId) -> &Catalog {
        catalog_for(&self.catalogs, nation)
    }

    // === Settlements ===

    /// Add a settlement tracking every commodity of its nation's catalog.
    pub fn add_settlement(
        &mut self,
        name: impl Into<String>,
        nation: NationId,
        population: u64,
    ) -> SettlementId {
        let holding = Holding::seeded(population, self.catalog(nation), &self.config);
        self.settlements.insert(Settlement {
            name: name.into(),
            nation,
            holding,
            neighbors: Vec::new(),
        })
    }

    /// Link two settlements both ways.
    pub fn connect(&mut self, a: SettlementId, b: SettlementId) {
        if a == b || !self.settlements.contains_key(a) || !self.settlements.contains_key(b) {
            return;
        }
        for (from, to) in [(a, b), (b, a)] {
            if let Some(s) = self.settlements.get_mut(from) {
                if !s.neighbors.contains(&to) {
                    s.neighbors.push(to);
                }
            }
        }
    }

    pub fn settlement(&self, id: SettlementId) -> Option<&Settlement> {
        self.settlements.get(id)
    }

    pub fn settlement_mut(&mut self, id: SettlementId) -> Option<&mut Settlement> {
        self.settlements.get_mut(id)
    }

    pub fn settlements(&self) -> impl Iterator<Item = (SettlementId, &Settlement)> {
        self.settlements.iter()
    }

    /// Create stock in a settlement's market.
    pub fn create_goods(&mut self, settlement: SettlementId, id: CommodityId, amount: Quantity) {
        let Some(s) = self.settlements.get_mut(settlement) else {
            return;
        };
        let catalog = catalog_for(&self.catalogs, s.nation);
        s.holding.stock_mut().create(id, amount, catalog);
    }

    pub fn build(
        &mut self,
        settlement: SettlementId,
        key: FacilityKey,
        area: f64,
    ) -> Result<(), HoldingError> {
        let Some(s) = self.settlements.get_mut(settlement) else {
            return Err(HoldingError::UnknownFacility(key));
        };
        let catalog = catalog_for(&self.catalogs, s.nation);
        let proto = catalog
            .facility(key)
            .ok_or(HoldingError::UnknownFacility(key))?;
        s.holding.build(proto, area, catalog, &self.config)
    }

    pub fn demolish(
        &mut self,
        settlement: SettlementId,
        key: FacilityKey,
        area: f64,
    ) -> Result<Quantity, HoldingError> {
        let Some(s) = self.settlements.get_mut(settlement) else {
            return Err(HoldingError::UnknownFacility(key));
        };
        let catalog = catalog_for(&self.catalogs, s.nation);
        s.holding.demolish(key, area, catalog, &self.config)
    }

    // === Agents ===

    pub fn spawn_agent(
        &mut self,
        name: impl Into<String>,
        nation: NationId,
        location: SettlementId,
        seed: u64,
    ) -> AgentId {
        let agent = Agent::spawn(name, nation, location, seed, &self.config);
        self.agents.insert(agent)
    }

    pub fn insert_agent(&mut self, agent: Agent) -> AgentId {
        self.agents.insert(agent)
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(id)
    }

    pub fn agents(&self) -> impl Iterator<Item = (AgentId, &Agent)> {
        self.agents.iter()
    }

    /// Give an agent goods from its nation's catalog.
    pub fn give_goods(&mut self, agent: AgentId, id: CommodityId, amount: Quantity) {
        let Some(a) = self.agents.get_mut(agent) else {
            return;
        };
        let catalog = catalog_for(&self.catalogs, a.nation);
        a.goods.stock_mut().create(id, amount, catalog);
    }

    /// Arrival at a settlement; routing between settlements happens elsewhere.
    pub fn move_agent(&mut self, agent: AgentId, to: SettlementId) {
        if !self.settlements.contains_key(to) {
            return;
        }
        if let Some(a) = self.agents.get_mut(agent) {
            a.location = to;
            if a.destination == Some(to) {
                a.destination = None;
            }
        }
    }

    // === Tick ===

    /// Advance the world by `elapsed`: settlements first, then everything
    /// agents hold, then decision passes in agent order.
    pub fn tick(&mut self, elapsed: Millis) {
        let elapsed = elapsed.max(0);
        self.time += elapsed;

        for (_, s) in self.settlements.iter_mut() {
            let catalog = catalog_for(&self.catalogs, s.nation);
            s.holding.update(elapsed, &self.config, catalog);
        }

        for (_, a) in self.agents.iter_mut() {
            if !a.alive {
                continue;
            }
            let catalog = catalog_for(&self.catalogs, a.nation);
            a.goods.update(elapsed, &self.config, catalog);
            for (_, property) in &mut a.properties {
                property.update(elapsed, &self.config, catalog);
            }
        }

        let market = self.market_view();
        let ids: Vec<AgentId> = self.agents.keys().collect();
        for id in ids {
            let due = match self.agents.get_mut(id) {
                Some(a) if a.alive => a.mind.poll(elapsed, self.config.decision_time),
                _ => false,
            };
            if due {
                self.decide(id, &market);
                self.execute_intent(id);
            }
            self.engage(id);
        }
    }

    /// Prices and adjacency of every settlement as they stand now.
    pub fn market_view(&self) -> MarketView {
        let mut view = MarketView::new();
        for (id, s) in &self.settlements {
            let quotes = s
                .holding
                .stock()
                .iter()
                .map(|c| {
                    (
                        c.id,
                        PriceQuote {
                            price: c.price(),
                            amount: c.amount(),
                        },
                    )
                })
                .collect();
            view.insert(id, s.neighbors.clone(), quotes);
        }
        view
    }

    /// Candidate builds at the agent's location for what it carries and holds
    /// in its purse.
    pub fn plans_for(&self, agent: AgentId) -> Vec<InvestmentPlan> {
        let Some(a) = self.agents.get(agent) else {
            return Vec::new();
        };
        let Some(s) = self.settlements.get(a.location) else {
            return Vec::new();
        };
        s.holding.build_plans(
            catalog_for(&self.catalogs, s.nation),
            a.goods.stock(),
            a.purse,
            &self.config,
        )
    }

    fn target_candidates(&self, attacker: AgentId) -> Vec<TargetCandidate<AgentId>> {
        let Some(a) = self.agents.get(attacker) else {
            return Vec::new();
        };
        self.agents
            .iter()
            .filter(|(id, other)| *id != attacker && other.alive && other.location == a.location)
            .map(|(id, other)| TargetCandidate {
                key: id,
                loot_value: other
                    .goods
                    .stock()
                    .iter()
                    .map(|c| c.amount() * a.mind.estimate(c.id))
                    .sum(),
                equipment_score: other.equipment_score(),
            })
            .collect()
    }

    /// Run one decision pass for an agent and commit its outcome.
    pub fn decide(&mut self, id: AgentId, market: &MarketView) {
        let plans = self.plans_for(id);
        let targets = self.target_candidates(id);
        let config = &self.config;
        let settlements = &self.settlements;
        let Some(agent) = self.agents.get_mut(id) else {
            return;
        };
        let Some(local) = settlements.get(agent.location) else {
            return;
        };
        let ctx = DecisionContext {
            config,
            market,
            location: agent.location,
            local: local.holding.stock(),
            goods: agent.goods.stock(),
            purse: agent.purse,
            role: agent.role,
            stats: &agent.stats,
            plans: &plans,
            targets: &targets,
        };
        let decision = agent.mind.decide(&ctx);
        agent.apply(decision);
    }

    // === Intent execution ===

    /// Carry out the agent's committed intent against its current settlement.
    #[cfg_attr(not(feature = "instrument"), allow(unused_variables))]
    pub fn execute_intent(&mut self, id: AgentId) {
        let Some(agent) = self.agents.get(id) else {
            return;
        };
        match agent.intent.clone() {
            Intent::Idle => {}
            Intent::Sell { commodity, amount } => self.sell(id, commodity, amount),
            Intent::Buy { commodity, budget } => self.buy(id, commodity, budget),
            Intent::Invest { plan } => {
                if let Err(err) = self.invest(id, &plan) {
                    #[cfg(feature = "instrument")]
                    tracing::warn!(
                        target: "decision",
                        action = "invest",
                        facility = plan.facility.id,
                        error = %err
                    );
                }
            }
        }
    }

    fn sell(&mut self, id: AgentId, commodity: CommodityId, amount: Quantity) {
        let margin = self.config.settlement_margin;
        let Some(agent) = self.agents.get_mut(id) else {
            return;
        };
        let Some(s) = self.settlements.get_mut(agent.location) else {
            return;
        };
        let Some(lot) = agent.goods.take_commodity(commodity, amount) else {
            return;
        };
        let sold = lot.amount();
        let catalog = catalog_for(&self.catalogs, s.nation);
        let market = s.holding.stock_mut().ensure(commodity, catalog);
        let revenue = market.sale_value(sold) * margin;
        market.put(lot);
        agent.purse += revenue;

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "decision",
            action = "sell",
            good = commodity.good,
            material = commodity.material,
            amount = sold,
            revenue
        );
    }

    fn buy(&mut self, id: AgentId, commodity: CommodityId, budget: f64) {
        let margin = self.config.settlement_margin;
        let net_weight = match self.agents.get(id) {
            Some(a) => a.net_weight(&self.config),
            None => return,
        };
        let Some(agent) = self.agents.get_mut(id) else {
            return;
        };
        let Some(s) = self.settlements.get_mut(agent.location) else {
            return;
        };
        let Some(market) = s.holding.stock_mut().get_mut(commodity) else {
            return;
        };
        let budget = budget.min(agent.purse);
        if budget <= 0.0 || margin <= 0.0 {
            return;
        }
        let mut quantity = market.quantity(budget * margin).quantity;
        if market.carry() > 0.0 {
            quantity = quantity.min((-net_weight).max(0.0) / market.carry());
        }
        if quantity <= 0.0 {
            return;
        }
        let paid = market.cost(quantity) / margin;
        let lot = market.take(quantity);
        agent.purse = (agent.purse - paid).max(0.0);
        let catalog = catalog_for(&self.catalogs, agent.nation);
        agent.goods.put(lot, catalog);

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "decision",
            action = "buy",
            good = commodity.good,
            material = commodity.material,
            amount = quantity,
            paid
        );
    }

    /// Pay for a plan, move the goods into the agent's holding at this
    /// settlement and build there.
    ///
    /// Requirements are checked against what the plan would bring in before
    /// anything moves, so a failed build leaves the purse and goods untouched.
    pub fn invest(&mut self, id: AgentId, plan: &InvestmentPlan) -> Result<(), HoldingError> {
        let unknown = HoldingError::UnknownFacility(plan.facility);
        let agent = self.agents.get_mut(id).ok_or(unknown.clone())?;
        if plan.cost > agent.purse {
            return Err(HoldingError::Unaffordable {
                cost: plan.cost,
                available: agent.purse,
            });
        }
        let location = agent.location;
        let s = self.settlements.get_mut(location).ok_or(unknown.clone())?;
        let catalog = catalog_for(&self.catalogs, s.nation);
        let proto = catalog.facility(plan.facility).ok_or(unknown)?;

        {
            let market = s.holding.stock();
            let carried = agent.goods.stock();
            let incoming = |good: GoodId| -> Quantity {
                let bought: Quantity = plan
                    .request
                    .iter()
                    .filter(|(commodity, _)| commodity.good == good)
                    .map(|&(commodity, amount)| amount.min(market.amount(commodity)))
                    .sum();
                bought + carried.good_amount(good)
            };
            let empty = Holding::default();
            let property = agent.property(location).unwrap_or(&empty);
            property.check_build(proto, plan.area, incoming)?;
        }

        let mut moved: Vec<Lot> = plan
            .request
            .iter()
            .filter_map(|(commodity, amount)| s.holding.take_commodity(*commodity, *amount))
            .collect();
        for rate in proto.requirements.iter().chain(&proto.inputs) {
            let carried = agent.goods.stock().good_amount(rate.good);
            moved.extend(agent.goods.take(rate.good, carried));
        }
        agent.purse = (agent.purse - plan.cost).max(0.0);

        let property = agent.property_mut(location);
        for lot in moved {
            property.put(lot, catalog);
        }
        property.build(proto, plan.area, catalog, &self.config)?;

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "decision",
            action = "invest",
            facility = plan.facility.id,
            area = plan.area,
            cost = plan.cost
        );
        Ok(())
    }

    // === Combat ===

    /// If the agent has a target at its location, let the target choose how
    /// to respond. A yielding target is looted on the spot.
    pub fn engage(&mut self, attacker: AgentId) -> Option<Encounter> {
        let a = self.agents.get(attacker)?;
        let target = a.target?;
        let Some(t) = self.agents.get(target).filter(|t| t.alive) else {
            if let Some(a) = self.agents.get_mut(attacker) {
                a.target = None;
            }
            return None;
        };
        if t.location != a.location || !a.alive {
            return None;
        }
        let choice = combat::choose_fight(
            t.equipment_score(),
            t.speed,
            a.equipment_score(),
            a.speed,
            &t.mind.traits,
        );
        if let Some(t) = self.agents.get_mut(target) {
            t.last_fight_choice = Some(choice);
        }
        if choice == FightChoice::Yield {
            self.loot(attacker, target, true);
            if let Some(a) = self.agents.get_mut(attacker) {
                a.target = None;
            }
            return Some(Encounter::Yielded);
        }
        Some(Encounter::Contested(choice))
    }

    /// Apply the outcome of a melee resolved outside the core.
    pub fn resolve_encounter(&mut self, attacker: AgentId, attacker_won: bool) {
        let Some(target) = self.agents.get_mut(attacker).and_then(|a| a.target.take()) else {
            return;
        };
        if attacker_won {
            if let Some(t) = self.agents.get_mut(target) {
                t.alive = false;
            }
            self.loot(attacker, target, false);
        }
    }

    /// Move goods from `victim` to `looter` by value per weight until the
    /// looter's goal or capacity is reached. Returns the value taken.
    pub fn loot(&mut self, looter: AgentId, victim: AgentId, victim_alive: bool) -> f64 {
        let (Some(l), Some(v)) = (self.agents.get(looter), self.agents.get(victim)) else {
            return 0.0;
        };
        let items: Vec<LootItem> = v
            .goods
            .stock()
            .iter()
            .map(|c| LootItem {
                id: c.id,
                amount: c.amount(),
                carry: c.carry(),
                value: l.mind.estimate(c.id),
            })
            .collect();
        let mut goal = loot_value(&items);
        if victim_alive {
            goal *= l.mind.traits.greed / self.config.criteria_max.max(1.0);
        }
        let picks = plan_loot(&items, l.net_weight(&self.config), goal);

        let mut lots = Vec::with_capacity(picks.len());
        if let Some(v) = self.agents.get_mut(victim) {
            for (id, amount) in &picks {
                if let Some(lot) = v.goods.take_commodity(*id, *amount) {
                    lots.push(lot);
                }
            }
        }
        let Some(l) = self.agents.get_mut(looter) else {
            return 0.0;
        };
        let catalog = catalog_for(&self.catalogs, l.nation);
        let mut taken = 0.0;
        for lot in lots {
            taken += lot.amount() * l.mind.estimate(lot.id);
            l.goods.put(lot, catalog);
        }
        taken
    }

    // === Persistence ===

    pub fn to_json(&self) -> Result<String, PersistError> {
        serde_json::to_string(self).map_err(PersistError::Serialize)
    }

    pub fn from_json(text: &str) -> Result<Self, PersistError> {
        serde_json::from_str(text).map_err(PersistError::Deserialize)
    }
}
