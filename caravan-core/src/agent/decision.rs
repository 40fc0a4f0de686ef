// Decision pass: score every candidate action and commit to the best

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::config::SimConfig;
use crate::holding::InvestmentPlan;
use crate::ledger::Stock;
use crate::types::{AgentId, CommodityId, Millis, Quantity, SettlementId};

use super::beliefs::{BeliefTable, MarketView, SettlementBelief, limit_factor};
use super::combat::{self, Stats, TargetCandidate, select_target};
use super::traits::{Role, Traits};

/// What an agent has committed to doing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub enum Intent {
    #[default]
    Idle,
    Sell {
        commodity: CommodityId,
        amount: Quantity,
    },
    Buy {
        commodity: CommodityId,
        budget: f64,
    },
    Invest {
        plan: InvestmentPlan,
    },
}

/// Everything a decision pass reads. All of it is read-only.
pub struct DecisionContext<'a> {
    pub config: &'a SimConfig,
    pub market: &'a MarketView,
    pub location: SettlementId,
    /// Stock at the current settlement, for equipment stats.
    pub local: &'a Stock,
    /// What the agent carries.
    pub goods: &'a Stock,
    pub purse: f64,
    pub role: Role,
    pub stats: &'a Stats,
    pub plans: &'a [InvestmentPlan],
    pub targets: &'a [TargetCandidate<AgentId>],
}

/// Result of one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub intent: Intent,
    pub score: f64,
    pub destination: Option<SettlementId>,
    pub target: Option<AgentId>,
    /// Best item per body part.
    pub equipment: BTreeMap<usize, CommodityId>,
}

/// The decision-making state of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mind {
    seed: u64,
    pub traits: Traits,
    pub beliefs: BeliefTable,
    pub nearby: Vec<SettlementBelief>,
    decision_counter: Millis,
}

impl Mind {
    pub fn new(seed: u64, traits: Traits, decision_counter: Millis) -> Self {
        Self {
            seed,
            traits,
            beliefs: BeliefTable::new(),
            nearby: Vec::new(),
            decision_counter,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn decision_counter(&self) -> Millis {
        self.decision_counter
    }

    /// Accumulate `elapsed`; true when a pass is due. The counter keeps the
    /// remainder past the threshold.
    pub fn poll(&mut self, elapsed: Millis, period: Millis) -> bool {
        self.decision_counter += elapsed.max(0);
        if period <= 0 {
            self.decision_counter = 0;
            return true;
        }
        if self.decision_counter > period {
            self.decision_counter -= period;
            true
        } else {
            false
        }
    }

    /// Agent's current estimate for a commodity, zero if never seen.
    pub fn estimate(&self, id: CommodityId) -> f64 {
        self.beliefs.get(id).map_or(0.0, |b| b.estimate)
    }

    // === Beliefs ===

    /// Re-read prices at the current settlement and everything within walking
    /// range, and rebuild the nearby-settlement scores.
    pub fn observe(&mut self, ctx: &DecisionContext) {
        let config = ctx.config;
        let nearby = ctx.market.nearby(ctx.location, config.town_range);

        let mut ranges: BTreeMap<CommodityId, (f64, f64)> = BTreeMap::new();
        for settlement in std::iter::once(ctx.location).chain(nearby.iter().copied()) {
            let Some(quotes) = ctx.market.quotes(settlement) else {
                continue;
            };
            // A zero quote carries no price information.
            for (id, quote) in quotes.iter().filter(|(_, q)| q.price > 0.0) {
                let range = ranges.entry(*id).or_insert((quote.price, quote.price));
                range.0 = range.0.min(quote.price);
                range.1 = range.1.max(quote.price);
            }
        }
        for (id, (min, max)) in ranges {
            let lf = limit_factor(self.seed, id, config.limit_factor_min, config.limit_factor_max);
            self.beliefs
                .entry(id, lf)
                .revalue(min, max, config.settlement_margin);
        }
        let held: Vec<(CommodityId, bool)> = self
            .beliefs
            .iter()
            .map(|(id, _)| (id, ctx.goods.amount(id) > 0.0))
            .collect();
        for (id, owned) in held {
            self.beliefs.set_owned(id, owned);
        }

        self.nearby = nearby
            .into_iter()
            .map(|settlement| self.settlement_belief(ctx.market, settlement))
            .collect();
    }

    fn settlement_belief(&self, market: &MarketView, settlement: SettlementId) -> SettlementBelief {
        let mut belief = SettlementBelief {
            settlement,
            buy_score: 0.0,
            sell_score: 0.0,
        };
        let Some(quotes) = market.quotes(settlement) else {
            return belief;
        };
        for (id, row) in self.beliefs.unowned() {
            if let Some(q) = quotes.get(&id) {
                if q.price > 0.0 && q.amount > 0.0 {
                    belief.buy_score = belief.buy_score.max(row.buy / q.price);
                }
            }
        }
        for (id, row) in self.beliefs.owned() {
            if let Some(q) = quotes.get(&id) {
                if row.sell > 0.0 {
                    belief.sell_score = belief.sell_score.max(q.price / row.sell);
                }
            }
        }
        belief
    }

    // === Scores ===

    /// Sell scores for owned commodities quoted here: local price over the
    /// agent's sell floor. A score below 1 is a sale under the floor.
    pub fn sell_scores(&self, ctx: &DecisionContext) -> Vec<(CommodityId, f64)> {
        self.beliefs
            .owned()
            .filter_map(|(id, row)| {
                let quote = ctx.market.quote(ctx.location, id)?;
                (row.sell > 0.0).then(|| (id, quote.price / row.sell))
            })
            .collect()
    }

    /// Buy scores for unowned commodities in stock here: buy ceiling over local
    /// price, plus an equipment term for items with combat stats. An item can
    /// be worth buying above the ceiling for its equipment value alone.
    pub fn buy_scores(&self, ctx: &DecisionContext) -> Vec<(CommodityId, f64)> {
        if ctx.purse <= 0.0 {
            return Vec::new();
        }
        let role_factor = if ctx.role.is_merchant() { 1.0 } else { 2.0 };
        self.beliefs
            .unowned()
            .filter_map(|(id, row)| {
                let quote = ctx.market.quote(ctx.location, id)?;
                if quote.price <= 0.0 || quote.amount <= 0.0 {
                    return None;
                }
                let base = row.buy / quote.price;
                let equip = ctx.local.get(id).map_or(0.0, |c| {
                    let (attack, defense) = combat::raw_item_scores(c.combat_stats(), ctx.stats);
                    (attack * self.traits.attack + defense * self.traits.defense)
                        * ctx.config.equip_utility_scale
                        * role_factor
                });
                Some((id, base + equip))
            })
            .collect()
    }

    /// Investment scores: net plan value weighted by the invest tendency.
    /// Plans the agent cannot pay for are skipped.
    pub fn invest_scores<'p>(&self, ctx: &DecisionContext<'p>) -> Vec<(&'p InvestmentPlan, f64)> {
        ctx.plans
            .iter()
            .filter(|p| p.cost <= ctx.purse)
            .map(|p| (p, p.net() * self.traits.invest))
            .collect()
    }

    /// The commodity whose sale lightens the load most, and how much of it to
    /// sell to get back under capacity. `None` while within capacity.
    pub fn overweight_sale(&self, ctx: &DecisionContext) -> Option<(CommodityId, Quantity)> {
        let net_weight = ctx.config.traveler_carry + ctx.goods.weight();
        if net_weight <= 0.0 {
            return None;
        }
        let heaviest = ctx
            .goods
            .iter()
            .filter(|c| c.amount() > 0.0 && c.carry() > 0.0)
            .max_by(|a, b| a.weight().total_cmp(&b.weight()))?;
        let amount = (net_weight / heaviest.carry()).min(heaviest.amount());
        Some((heaviest.id, amount))
    }

    // === Pass ===

    /// Run a full decision pass.
    pub fn decide(&mut self, ctx: &DecisionContext) -> Decision {
        self.observe(ctx);

        let destination = self
            .nearby
            .iter()
            .map(|s| (s.settlement, s.weighted(self.traits.buy, self.traits.sell)))
            .filter(|(_, score)| *score > 0.0)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(s, _)| s);

        let (intent, score) = match self.overweight_sale(ctx) {
            Some((commodity, amount)) => (Intent::Sell { commodity, amount }, f64::INFINITY),
            None => self.best_action(ctx),
        };

        let target = if ctx.role.is_aggressive() {
            let own = self.equipment_score(ctx.goods, ctx.stats);
            select_target(
                ctx.targets,
                own,
                &self.traits,
                ctx.config.criteria_max,
                ctx.config.attack_threshold,
            )
        } else {
            None
        };

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "decision",
            seed = self.seed,
            intent = ?intent,
            score,
            nearby = self.nearby.len() as u64,
            has_destination = destination.is_some(),
            has_target = target.is_some()
        );

        Decision {
            intent,
            score,
            destination,
            target,
            equipment: self.choose_equipment(ctx.goods, ctx.stats),
        }
    }

    /// Highest-scoring sell, buy or invest action. Idle unless something
    /// scores strictly above zero.
    fn best_action(&self, ctx: &DecisionContext) -> (Intent, f64) {
        let mut best = (Intent::Idle, 0.0);
        for (commodity, score) in self.sell_scores(ctx) {
            if score > best.1 {
                let amount = ctx.goods.amount(commodity);
                best = (Intent::Sell { commodity, amount }, score);
            }
        }
        let budget = ctx.purse * (self.traits.buy / ctx.config.criteria_max.max(1.0)).min(1.0);
        for (commodity, score) in self.buy_scores(ctx) {
            if score > best.1 {
                best = (Intent::Buy { commodity, budget }, score);
            }
        }
        for (plan, score) in self.invest_scores(ctx) {
            if score > best.1 {
                best = (Intent::Invest { plan: plan.clone() }, score);
            }
        }
        best
    }

    // === Equipment ===

    /// Best item per body part among whole units the agent carries.
    pub fn choose_equipment(&self, goods: &Stock, stats: &Stats) -> BTreeMap<usize, CommodityId> {
        let mut best: BTreeMap<usize, (CommodityId, f64)> = BTreeMap::new();
        for commodity in goods.iter().filter(|c| c.amount() >= 1.0) {
            let item = commodity.combat_stats();
            let Some(part) = item.first().map(|s| s.part_id) else {
                continue;
            };
            let score = combat::item_score(item, stats, &self.traits);
            let current = best.get(&part).map_or(0.0, |(_, s)| *s);
            if score > current {
                best.insert(part, (commodity.id, score));
            }
        }
        best.into_iter().map(|(part, (id, _))| (part, id)).collect()
    }

    /// Score of what the agent would equip from `goods`.
    pub fn equipment_score(&self, goods: &Stock, stats: &Stats) -> f64 {
        let equipped = self.choose_equipment(goods, stats);
        combat::equipment_score(
            equipped
                .values()
                .filter_map(|id| goods.get(*id).map(|c| c.combat_stats())),
            stats,
            &self.traits,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::beliefs::PriceQuote;
    use crate::agent::combat::CombatStat;
    use crate::catalog::Catalog;
    use crate::ledger::Commodity;
    use slotmap::SlotMap;

    const GRAIN: CommodityId = CommodityId::generic(1);
    const SWORD: CommodityId = CommodityId::generic(2);

    struct Fixture {
        here: SettlementId,
        there: SettlementId,
        market: MarketView,
        config: SimConfig,
        local: Stock,
        goods: Stock,
        stats: Stats,
    }

    impl Fixture {
        fn new(here_price: f64, there_price: f64) -> Self {
            let mut ids: SlotMap<SettlementId, ()> = SlotMap::with_key();
            let here = ids.insert(());
            let there = ids.insert(());
            let quote = |price| BTreeMap::from([(GRAIN, PriceQuote { price, amount: 100.0 })]);
            let mut market = MarketView::new();
            market.insert(here, vec![there], quote(here_price));
            market.insert(there, vec![here], quote(there_price));
            let config = SimConfig {
                limit_factor_max: 0.5,
                ..SimConfig::default()
            };
            Self {
                here,
                there,
                market,
                config,
                local: Stock::new(0),
                goods: Stock::new(0),
                stats: [1; combat::STAT_COUNT],
            }
        }

        fn carry(&mut self, amount: f64, carry: f64) {
            let catalog = Catalog::new().with_commodity(Commodity::new(GRAIN, "grain").with_carry(carry));
            self.goods.create(GRAIN, amount, &catalog);
        }

        fn ctx(&self, purse: f64) -> DecisionContext<'_> {
            DecisionContext {
                config: &self.config,
                market: &self.market,
                location: self.here,
                local: &self.local,
                goods: &self.goods,
                purse,
                role: Role::Trader,
                stats: &self.stats,
                plans: &[],
                targets: &[],
            }
        }
    }

    fn mind() -> Mind {
        Mind::new(42, Traits::uniform(5.0), 0)
    }

    #[test]
    fn test_buys_cheap_unowned_goods() {
        let fixture = Fixture::new(10.0, 50.0);
        let mut mind = mind();
        // Full buy tendency commits the whole purse.
        mind.traits.buy = 9.0;
        let decision = mind.decide(&fixture.ctx(90.0));
        assert_eq!(
            decision.intent,
            Intent::Buy {
                commodity: GRAIN,
                budget: 90.0
            }
        );
        assert!(decision.score >= 1.0);
        let belief = mind.beliefs.get(GRAIN).unwrap();
        assert!(belief.min_price <= belief.estimate && belief.estimate <= belief.max_price);
    }

    #[test]
    fn test_sells_owned_goods_above_floor() {
        let mut fixture = Fixture::new(50.0, 10.0);
        fixture.carry(10.0, 0.0);
        let mut mind = mind();
        let decision = mind.decide(&fixture.ctx(0.0));
        assert_eq!(
            decision.intent,
            Intent::Sell {
                commodity: GRAIN,
                amount: 10.0
            }
        );
        assert!(mind.beliefs.is_consistent());
    }

    #[test]
    fn test_overweight_forces_sale() {
        // Selling here is a loss, but 20 weight against 16 capacity.
        let mut fixture = Fixture::new(10.0, 50.0);
        fixture.carry(20.0, 1.0);
        let mut mind = mind();
        let decision = mind.decide(&fixture.ctx(0.0));
        assert_eq!(
            decision.intent,
            Intent::Sell {
                commodity: GRAIN,
                amount: 4.0
            }
        );
    }

    #[test]
    fn test_idle_without_market() {
        let mut fixture = Fixture::new(10.0, 50.0);
        fixture.market = MarketView::new();
        let mut mind = mind();
        let decision = mind.decide(&fixture.ctx(100.0));
        assert_eq!(decision.intent, Intent::Idle);
        assert_eq!(decision.destination, None);
    }

    #[test]
    fn test_equipment_value_drives_purchase() {
        let mut fixture = Fixture::new(10.0, 50.0);
        let catalog = Catalog::new().with_commodity(
            Commodity::new(SWORD, "sword").with_combat_stats(vec![CombatStat::weapon(0, 0, 50.0, 2.0)]),
        );
        fixture.local.create(SWORD, 5.0, &catalog);
        fixture.stats = [5; combat::STAT_COUNT];
        let quote = |price| BTreeMap::from([(SWORD, PriceQuote { price, amount: 5.0 })]);
        fixture.market = MarketView::new();
        fixture.market.insert(fixture.here, vec![fixture.there], quote(50.0));
        fixture.market.insert(fixture.there, vec![fixture.here], quote(10.0));

        let mut mind = mind();
        let decision = mind.decide(&fixture.ctx(500.0));
        // The local price is above the buy ceiling; only the weapon's worth
        // to this fighter makes it a purchase.
        assert!(mind.beliefs.get(SWORD).unwrap().buy < 50.0);
        assert!(matches!(decision.intent, Intent::Buy { commodity, .. } if commodity == SWORD));
        assert!(decision.score > 1.0, "score {}", decision.score);
    }

    #[test]
    fn test_sells_below_floor_when_nothing_better() {
        let mut fixture = Fixture::new(10.0, 50.0);
        fixture.carry(2.0, 0.0);
        let mut mind = mind();
        let decision = mind.decide(&fixture.ctx(0.0));
        assert!(matches!(decision.intent, Intent::Sell { commodity, .. } if commodity == GRAIN));
        assert!(decision.score > 0.0 && decision.score < 1.0, "score {}", decision.score);
    }

    #[test]
    fn test_destination_prefers_better_market() {
        for (north_price, south_price) in [(30.0, 60.0), (60.0, 30.0)] {
            let mut ids: SlotMap<SettlementId, ()> = SlotMap::with_key();
            let here = ids.insert(());
            let north = ids.insert(());
            let south = ids.insert(());
            let quote = |price| BTreeMap::from([(GRAIN, PriceQuote { price, amount: 100.0 })]);
            let mut fixture = Fixture::new(20.0, 20.0);
            fixture.here = here;
            fixture.market = MarketView::new();
            fixture.market.insert(here, vec![north, south], quote(20.0));
            fixture.market.insert(north, vec![here], quote(north_price));
            fixture.market.insert(south, vec![here], quote(south_price));
            fixture.carry(10.0, 0.0);

            let mut mind = mind();
            let decision = mind.decide(&fixture.ctx(0.0));
            assert_eq!(mind.nearby.len(), 2);
            let best = if north_price > south_price { north } else { south };
            assert_eq!(decision.destination, Some(best), "north {north_price}, south {south_price}");
        }
    }

    #[test]
    fn test_zero_quotes_do_not_lower_beliefs() {
        let fixture = Fixture::new(20.0, 0.0);
        let mut mind = mind();
        mind.observe(&fixture.ctx(0.0));
        let belief = mind.beliefs.get(GRAIN).unwrap();
        assert_eq!(belief.min_price, 20.0);
        assert_eq!(belief.max_price, 20.0);
        assert_eq!(belief.estimate, 20.0);
    }

    #[test]
    fn test_poll_keeps_remainder() {
        let mut mind = mind();
        assert!(!mind.poll(1000, 1500));
        assert!(mind.poll(1000, 1500));
        assert_eq!(mind.decision_counter(), 500);
        assert!(!mind.poll(1000, 1500));
    }
}
