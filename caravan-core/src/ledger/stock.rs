// Commodities held in one place, grouped by good

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::types::{CommodityId, GoodId, Millis, Quantity};

use super::{Commodity, Lot};

/// All commodities of one holding, ordered so every material of a good is
/// adjacent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    #[serde(with = "crate::types::map_pairs")]
    commodities: BTreeMap<CommodityId, Commodity>,
    /// Population used to scale demand on first use; zero for travelers.
    population: u64,
}

impl Stock {
    pub fn new(population: u64) -> Self {
        Self {
            commodities: BTreeMap::new(),
            population,
        }
    }

    pub fn population(&self) -> u64 {
        self.population
    }

    pub fn get(&self, id: CommodityId) -> Option<&Commodity> {
        self.commodities.get(&id)
    }

    pub fn get_mut(&mut self, id: CommodityId) -> Option<&mut Commodity> {
        self.commodities.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Commodity> {
        self.commodities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Commodity> {
        self.commodities.values_mut()
    }

    pub fn len(&self) -> usize {
        self.commodities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commodities.is_empty()
    }

    /// Every material tracked for `good`.
    pub fn materials(&self, good: GoodId) -> impl Iterator<Item = &Commodity> {
        let (lo, hi) = CommodityId::good_range(good);
        self.commodities.range(lo..=hi).map(|(_, c)| c)
    }

    pub fn materials_mut(&mut self, good: GoodId) -> impl Iterator<Item = &mut Commodity> {
        let (lo, hi) = CommodityId::good_range(good);
        self.commodities.range_mut(lo..=hi).map(|(_, c)| c)
    }

    pub fn amount(&self, id: CommodityId) -> Quantity {
        self.get(id).map_or(0.0, Commodity::amount)
    }

    /// Total across all materials of a good.
    pub fn good_amount(&self, good: GoodId) -> Quantity {
        self.materials(good).map(Commodity::amount).sum()
    }

    /// True when at least one material of `good` is under its maximum.
    pub fn good_has_space(&self, good: GoodId) -> bool {
        self.materials(good).any(Commodity::has_space)
    }

    /// Cheapest in-stock material of a good.
    pub fn cheapest(&self, good: GoodId) -> Option<&Commodity> {
        self.materials(good)
            .filter(|c| c.amount() > 0.0)
            .min_by(|a, b| a.price().total_cmp(&b.price()))
    }

    /// Lowest price among materials of a good, in stock or not.
    pub fn good_price(&self, good: GoodId) -> Option<f64> {
        self.materials(good)
            .map(Commodity::price)
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Combined carry weight.
    pub fn weight(&self) -> f64 {
        self.commodities.values().map(Commodity::weight).sum()
    }

    /// Market value at local spot prices.
    pub fn value(&self) -> f64 {
        self.commodities.values().map(Commodity::value).sum()
    }

    /// Commodity for `id`, copied from the catalog the first time it is seen.
    pub fn ensure(&mut self, id: CommodityId, catalog: &Catalog) -> &mut Commodity {
        let population = self.population;
        self.commodities.entry(id).or_insert_with(|| {
            let mut commodity = match catalog.commodity(id) {
                Some(proto) => {
                    let mut copy = proto.clone();
                    copy.set_amount(0.0);
                    copy
                }
                None => Commodity::new(id, catalog.good_name(id.good).unwrap_or_default()),
            };
            commodity.scale(population);
            commodity
        })
    }

    /// Make sure at least one material of `good` is tracked.
    pub fn ensure_good(&mut self, good: GoodId, catalog: &Catalog) {
        if self.materials(good).next().is_none() {
            self.ensure(catalog.default_material(good), catalog);
        }
    }

    pub fn create(&mut self, id: CommodityId, amount: Quantity, catalog: &Catalog) {
        self.ensure(id, catalog).create(amount);
    }

    /// Create a good without a specific material: goes to the lowest tracked
    /// material, or the catalog default.
    pub fn create_good(&mut self, good: GoodId, amount: Quantity, catalog: &Catalog) {
        let id = self
            .materials(good)
            .next()
            .map_or_else(|| catalog.default_material(good), |c| c.id);
        self.create(id, amount, catalog);
    }

    /// Use `amount` of a good, drawing from each material in proportion to
    /// its share. Returns what was used.
    pub fn use_good(&mut self, good: GoodId, amount: Quantity) -> Quantity {
        let total = self.good_amount(good);
        if total <= 0.0 || amount <= 0.0 {
            return 0.0;
        }
        let share = (amount / total).min(1.0);
        self.materials_mut(good)
            .map(|c| {
                let part = c.amount() * share;
                c.draw(part)
            })
            .sum()
    }

    /// Detach `amount` of a good as lots, proportionally across materials.
    pub fn take_good(&mut self, good: GoodId, amount: Quantity) -> Vec<Lot> {
        let total = self.good_amount(good);
        if total <= 0.0 || amount <= 0.0 {
            return Vec::new();
        }
        let share = (amount / total).min(1.0);
        self.materials_mut(good)
            .filter(|c| c.amount() > 0.0)
            .map(|c| {
                let part = c.amount() * share;
                c.take(part)
            })
            .collect()
    }

    /// Detach up to `amount` of one commodity.
    pub fn take(&mut self, id: CommodityId, amount: Quantity) -> Option<Lot> {
        self.commodities.get_mut(&id).map(|c| c.take(amount))
    }

    pub fn put(&mut self, lot: Lot, catalog: &Catalog) {
        self.ensure(lot.id, catalog).put(lot);
    }

    /// Consume and perish every commodity over `elapsed`. Returns the total
    /// that perished.
    pub fn update(&mut self, elapsed: Millis, year_length: Millis) -> Quantity {
        let mut perished = 0.0;
        for commodity in self.commodities.values_mut() {
            let lost = commodity.update(elapsed, year_length);
            #[cfg(feature = "instrument")]
            if lost > 0.0 {
                tracing::debug!(
                    target: "perish",
                    good = commodity.id.good,
                    material = commodity.id.material,
                    amount = lost
                );
            }
            perished += lost;
        }
        perished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LUMBER: GoodId = 2;

    fn catalog() -> Catalog {
        Catalog::new()
            .with_commodity(Commodity::new(CommodityId::new(LUMBER, 4), "pine").with_demand(
                0.5, 10.0, 63.0,
            ))
            .with_commodity(Commodity::new(CommodityId::new(LUMBER, 7), "oak").with_demand(
                0.5, 20.0, 63.0,
            ))
    }

    #[test]
    fn test_copy_on_first_use_scales_by_population() {
        let catalog = catalog();
        let mut stock = Stock::new(10);
        let pine = stock.ensure(CommodityId::new(LUMBER, 4), &catalog);
        assert_eq!(pine.slope(), 0.05);
        assert_eq!(pine.amount(), 0.0);
        // Second touch does not rescale.
        let pine = stock.ensure(CommodityId::new(LUMBER, 4), &catalog);
        assert_eq!(pine.slope(), 0.05);
    }

    #[test]
    fn test_use_good_is_proportional() {
        let catalog = catalog();
        let mut stock = Stock::new(0);
        stock.create(CommodityId::new(LUMBER, 4), 30.0, &catalog);
        stock.create(CommodityId::new(LUMBER, 7), 10.0, &catalog);

        let used = stock.use_good(LUMBER, 20.0);
        assert!((used - 20.0).abs() < 1e-9);
        assert!((stock.amount(CommodityId::new(LUMBER, 4)) - 15.0).abs() < 1e-9);
        assert!((stock.amount(CommodityId::new(LUMBER, 7)) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_take_good_and_put_conserve() {
        let catalog = catalog();
        let mut from = Stock::new(0);
        let mut to = Stock::new(0);
        from.create(CommodityId::new(LUMBER, 4), 8.0, &catalog);
        from.create(CommodityId::new(LUMBER, 7), 2.0, &catalog);

        for lot in from.take_good(LUMBER, 5.0) {
            to.put(lot, &catalog);
        }
        assert!((from.good_amount(LUMBER) - 5.0).abs() < 1e-9);
        assert!((to.good_amount(LUMBER) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_create_good_uses_default_material() {
        let catalog = catalog();
        let mut stock = Stock::new(0);
        stock.create_good(LUMBER, 3.0, &catalog);
        assert_eq!(stock.amount(CommodityId::new(LUMBER, 4)), 3.0);
        assert_eq!(stock.cheapest(LUMBER).map(|c| c.id), Some(CommodityId::new(LUMBER, 4)));
    }
}
