// Price beliefs and the market view they are built from

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::types::{CommodityId, Price, Quantity, SettlementId};

// ============================================================================
// Market view
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: Price,
    pub amount: Quantity,
}

/// Point-in-time prices and adjacency of every settlement.
///
/// Taken once before a round of decisions; later trades in the same round do
/// not show up in it.
#[derive(Debug, Clone, Default)]
pub struct MarketView {
    quotes: BTreeMap<SettlementId, BTreeMap<CommodityId, PriceQuote>>,
    neighbors: BTreeMap<SettlementId, Vec<SettlementId>>,
}

impl MarketView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        settlement: SettlementId,
        neighbors: Vec<SettlementId>,
        quotes: BTreeMap<CommodityId, PriceQuote>,
    ) {
        self.neighbors.insert(settlement, neighbors);
        self.quotes.insert(settlement, quotes);
    }

    pub fn quotes(&self, settlement: SettlementId) -> Option<&BTreeMap<CommodityId, PriceQuote>> {
        self.quotes.get(&settlement)
    }

    pub fn quote(&self, settlement: SettlementId, id: CommodityId) -> Option<PriceQuote> {
        self.quotes.get(&settlement)?.get(&id).copied()
    }

    pub fn neighbors(&self, settlement: SettlementId) -> &[SettlementId] {
        self.neighbors
            .get(&settlement)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Settlements within `depth` steps of `from`, nearest first, excluding
    /// `from` itself.
    pub fn nearby(&self, from: SettlementId, depth: u32) -> Vec<SettlementId> {
        let mut seen = BTreeSet::from([from]);
        let mut found = Vec::new();
        let mut queue = VecDeque::from([(from, 0)]);
        while let Some((current, distance)) = queue.pop_front() {
            if distance >= depth {
                continue;
            }
            for &next in self.neighbors(current) {
                if seen.insert(next) {
                    found.push(next);
                    queue.push_back((next, distance + 1));
                }
            }
        }
        found
    }
}

// ============================================================================
// Beliefs
// ============================================================================

/// What an agent thinks one commodity is worth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Belief {
    pub owned: bool,
    /// Where between the observed extremes this agent values the commodity.
    pub limit_factor: f64,
    pub min_price: Price,
    pub max_price: Price,
    pub estimate: Price,
    /// Highest price the agent will pay.
    pub buy: Price,
    /// Lowest price the agent will accept.
    pub sell: Price,
}

impl Belief {
    pub fn new(limit_factor: f64) -> Self {
        Self {
            owned: false,
            limit_factor,
            min_price: 0.0,
            max_price: 0.0,
            estimate: 0.0,
            buy: 0.0,
            sell: 0.0,
        }
    }

    /// Replace the observed range and derive estimate and limits.
    pub fn revalue(&mut self, min_price: Price, max_price: Price, margin: f64) {
        self.min_price = min_price.min(max_price);
        self.max_price = max_price.max(min_price);
        self.estimate = self.min_price + self.limit_factor * (self.max_price - self.min_price);
        self.buy = self.estimate * margin;
        self.sell = if margin > 0.0 {
            self.estimate / margin
        } else {
            0.0
        };
    }
}

/// Per-agent limit factor for a commodity.
///
/// Derived from the agent's seed so it survives save and reload without being
/// stored separately from the row.
pub fn limit_factor(seed: u64, id: CommodityId, min: f64, max: f64) -> f64 {
    let key = (u64::from(id.good) << 32) | u64::from(id.material);
    let mut rng = StdRng::seed_from_u64(seed ^ key.wrapping_mul(0x9E37_79B9_7F4A_7C15));
    if max > min {
        rng.random_range(min..max)
    } else {
        min
    }
}

/// Belief rows with an ownership index kept in step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeliefTable {
    #[serde(with = "crate::types::map_pairs")]
    rows: BTreeMap<CommodityId, Belief>,
    owned: BTreeSet<CommodityId>,
    unowned: BTreeSet<CommodityId>,
}

impl BeliefTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: CommodityId) -> Option<&Belief> {
        self.rows.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CommodityId, &Belief)> {
        self.rows.iter().map(|(id, b)| (*id, b))
    }

    pub fn owned(&self) -> impl Iterator<Item = (CommodityId, &Belief)> {
        self.owned.iter().filter_map(|id| self.rows.get(id).map(|b| (*id, b)))
    }

    pub fn unowned(&self) -> impl Iterator<Item = (CommodityId, &Belief)> {
        self.unowned.iter().filter_map(|id| self.rows.get(id).map(|b| (*id, b)))
    }

    /// Row for `id`, created with `limit_factor` on first sighting.
    pub fn entry(&mut self, id: CommodityId, limit_factor: f64) -> &mut Belief {
        if !self.rows.contains_key(&id) {
            self.unowned.insert(id);
        }
        self.rows.entry(id).or_insert_with(|| Belief::new(limit_factor))
    }

    pub fn set_owned(&mut self, id: CommodityId, owned: bool) {
        let Some(row) = self.rows.get_mut(&id) else {
            return;
        };
        row.owned = owned;
        if owned {
            self.unowned.remove(&id);
            self.owned.insert(id);
        } else {
            self.owned.remove(&id);
            self.unowned.insert(id);
        }
    }

    /// True when both indexes partition the rows exactly.
    pub fn is_consistent(&self) -> bool {
        self.owned.len() + self.unowned.len() == self.rows.len()
            && self
                .rows
                .iter()
                .all(|(id, b)| b.owned == self.owned.contains(id) && b.owned != self.unowned.contains(id))
    }
}

/// Best trading opportunity an agent sees at a nearby settlement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SettlementBelief {
    pub settlement: SettlementId,
    pub buy_score: f64,
    pub sell_score: f64,
}

impl SettlementBelief {
    pub fn weighted(&self, buy_weight: f64, sell_weight: f64) -> f64 {
        self.buy_score * buy_weight + self.sell_score * sell_weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_estimate_between_extremes() {
        let mut belief = Belief::new(0.25);
        belief.revalue(10.0, 50.0, 0.9);
        assert_eq!(belief.estimate, 20.0);
        assert_eq!(belief.buy, 20.0 * 0.9);
        assert_eq!(belief.sell, 20.0 / 0.9);
    }

    #[test]
    fn test_ownership_index_stays_in_sync() {
        let mut table = BeliefTable::new();
        let a = CommodityId::generic(1);
        let b = CommodityId::generic(2);
        table.entry(a, 0.5);
        table.entry(b, 0.5);
        table.set_owned(a, true);
        assert!(table.is_consistent());
        assert_eq!(table.owned().map(|(id, _)| id).collect::<Vec<_>>(), vec![a]);
        assert_eq!(table.unowned().map(|(id, _)| id).collect::<Vec<_>>(), vec![b]);

        table.set_owned(a, false);
        assert!(table.is_consistent());
        assert_eq!(table.owned().count(), 0);
        // Unknown rows are ignored.
        table.set_owned(CommodityId::generic(9), true);
        assert!(table.is_consistent());
    }

    #[test]
    fn test_limit_factor_is_stable() {
        let id = CommodityId::new(3, 4);
        let a = limit_factor(11, id, 0.1, 0.9);
        assert_eq!(a, limit_factor(11, id, 0.1, 0.9));
        assert!((0.1..0.9).contains(&a));
    }

    #[test]
    fn test_nearby_walk_is_bounded_and_excludes_origin() {
        let mut ids: SlotMap<SettlementId, ()> = SlotMap::with_key();
        let s: Vec<_> = (0..4).map(|_| ids.insert(())).collect();
        let mut view = MarketView::new();
        // Chain s0 - s1 - s2 - s3, with s1 linking back to s0.
        view.insert(s[0], vec![s[1]], BTreeMap::new());
        view.insert(s[1], vec![s[0], s[2]], BTreeMap::new());
        view.insert(s[2], vec![s[1], s[3]], BTreeMap::new());
        view.insert(s[3], vec![s[2]], BTreeMap::new());

        assert_eq!(view.nearby(s[0], 2), vec![s[1], s[2]]);
        assert_eq!(view.nearby(s[0], 0), Vec::<SettlementId>::new());
        assert_eq!(view.nearby(s[1], 5), vec![s[0], s[2], s[3]]);
    }
}
