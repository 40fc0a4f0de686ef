// Holding: the commodities and facilities of one settlement or traveler

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tsify_next::Tsify;

use crate::catalog::Catalog;
use crate::config::SimConfig;
use crate::ledger::{Lot, Stock};
use crate::production::{Facility, RunReport, run_all};
use crate::types::{CommodityId, FacilityKey, GoodId, Millis, Quantity};

/// Slack allowed when checking requirement stock.
const REQUIREMENT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HoldingError {
    #[error("unknown facility {0:?}")]
    UnknownFacility(FacilityKey),
    #[error("not enough of good {good}: needed {needed}, have {available}")]
    InsufficientRequirements {
        good: GoodId,
        needed: Quantity,
        available: Quantity,
    },
    #[error("cannot demolish {requested} area, only {available} built")]
    AreaExceeded { available: f64, requested: f64 },
    #[error("invalid area {0}")]
    InvalidArea(f64),
    #[error("cannot pay {cost}, purse holds {available}")]
    Unaffordable { cost: f64, available: f64 },
}

/// A candidate facility build, produced by [`Holding::build_plans`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct InvestmentPlan {
    pub facility: FacilityKey,
    pub area: f64,
    /// Projected output value less input value over the plan horizon.
    pub profit: f64,
    /// Money spent on `request`.
    pub cost: f64,
    /// Goods to buy from the seller, cheapest material of each.
    pub request: Vec<(CommodityId, Quantity)>,
}

impl InvestmentPlan {
    pub fn net(&self) -> f64 {
        self.profit - self.cost
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    stock: Stock,
    /// Sorted by key.
    facilities: Vec<Facility>,
    update_counter: Millis,
}

impl Holding {
    pub fn new(population: u64) -> Self {
        Self {
            stock: Stock::new(population),
            facilities: Vec::new(),
            update_counter: 0,
        }
    }

    /// A holding that tracks every commodity of the catalog from the start.
    pub fn seeded(population: u64, catalog: &Catalog, config: &SimConfig) -> Self {
        let mut holding = Self::new(population);
        for proto in catalog.commodities() {
            holding.stock.ensure(proto.id, catalog);
        }
        holding.set_maximums(config);
        holding
    }

    // === Accessors ===

    pub fn stock(&self) -> &Stock {
        &self.stock
    }

    pub fn stock_mut(&mut self) -> &mut Stock {
        &mut self.stock
    }

    pub fn facilities(&self) -> &[Facility] {
        &self.facilities
    }

    pub fn facility(&self, key: FacilityKey) -> Option<&Facility> {
        self.facilities
            .binary_search_by_key(&key, |f| f.key)
            .ok()
            .map(|i| &self.facilities[i])
    }

    pub fn update_counter(&self) -> Millis {
        self.update_counter
    }

    pub fn weight(&self) -> f64 {
        self.stock.weight()
    }

    // === Transfers ===

    /// Remove `amount` of a good, proportionally across materials.
    pub fn take(&mut self, good: GoodId, amount: Quantity) -> Vec<Lot> {
        self.stock.take_good(good, amount)
    }

    pub fn take_commodity(&mut self, id: CommodityId, amount: Quantity) -> Option<Lot> {
        self.stock.take(id, amount)
    }

    pub fn put(&mut self, lot: Lot, catalog: &Catalog) {
        self.stock.put(lot, catalog);
    }

    // === Build / demolish ===

    /// Check that `area` of `proto` could be built once `incoming(good)` more
    /// of each good has been added to stock. Nothing is changed.
    pub fn check_build(
        &self,
        proto: &Facility,
        area: f64,
        incoming: impl Fn(GoodId) -> Quantity,
    ) -> Result<(), HoldingError> {
        if !area.is_finite() || area <= 0.0 {
            return Err(HoldingError::InvalidArea(area));
        }
        for req in &proto.requirements {
            let needed = req.amount * area;
            let available = self.stock.good_amount(req.good) + incoming(req.good);
            if available + REQUIREMENT_EPSILON < needed {
                return Err(HoldingError::InsufficientRequirements {
                    good: req.good,
                    needed,
                    available,
                });
            }
        }
        Ok(())
    }

    /// Build `area` of `proto`, consuming its requirement goods.
    ///
    /// Grows the existing facility if one with the same key is present. A
    /// share of the consumed goods is banked for reclamation.
    pub fn build(
        &mut self,
        proto: &Facility,
        area: f64,
        catalog: &Catalog,
        config: &SimConfig,
    ) -> Result<(), HoldingError> {
        self.check_build(proto, area, |_| 0.0)?;

        let index = match self.facilities.binary_search_by_key(&proto.key, |f| f.key) {
            Ok(i) => i,
            Err(i) => {
                self.facilities.insert(i, proto.prototype());
                i
            }
        };
        let facility = &mut self.facilities[index];
        for req in &proto.requirements {
            for lot in self.stock.take_good(req.good, req.amount * area) {
                facility.bank_reclaimable(lot.id, lot.amount());
            }
        }
        facility.grow(area);

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "build",
            facility = proto.key.id,
            mode = proto.key.mode,
            added = area,
            area = facility.area()
        );

        for rate in proto.inputs.iter().chain(&proto.outputs) {
            self.stock.ensure_good(rate.good, catalog);
        }
        self.set_maximums(config);
        Ok(())
    }

    /// Remove `area` of a facility and return its share of reclaimables to
    /// stock. Returns the total quantity reclaimed.
    pub fn demolish(
        &mut self,
        key: FacilityKey,
        area: f64,
        catalog: &Catalog,
        config: &SimConfig,
    ) -> Result<Quantity, HoldingError> {
        if !area.is_finite() || area <= 0.0 {
            return Err(HoldingError::InvalidArea(area));
        }
        let index = self
            .facilities
            .binary_search_by_key(&key, |f| f.key)
            .map_err(|_| HoldingError::UnknownFacility(key))?;
        let available = self.facilities[index].area();
        if area > available {
            return Err(HoldingError::AreaExceeded {
                available,
                requested: area,
            });
        }

        let released = self.facilities[index].shrink(area);
        let mut reclaimed = 0.0;
        for (id, amount) in released {
            self.stock.create(id, amount, catalog);
            reclaimed += amount;
        }
        if self.facilities[index].area() <= 0.0 {
            self.facilities.remove(index);
        }

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "build",
            facility = key.id,
            mode = key.mode,
            removed = area,
            reclaimed
        );

        self.set_maximums(config);
        Ok(reclaimed)
    }

    // === Capacity ===

    /// Size every commodity's maximum from consumption and facility use, then
    /// flatten demand curves that would fall under the floor at capacity.
    pub fn set_maximums(&mut self, config: &SimConfig) {
        for commodity in self.stock.iter_mut() {
            commodity.reset_maximum(config.consumption_space_factor);
        }
        for facility in &self.facilities {
            let area = facility.area();
            for input in &facility.inputs {
                let room = if facility.is_breeding_stock(input.good) {
                    input.amount * area
                } else {
                    input.amount * area * config.input_space_factor
                };
                for commodity in self.stock.materials_mut(input.good) {
                    commodity.extend_maximum(room);
                }
            }
            for output in &facility.outputs {
                let room = output.amount * area * config.output_space_factor;
                for commodity in self.stock.materials_mut(output.good) {
                    commodity.extend_maximum(room);
                }
            }
        }
        for commodity in self.stock.iter_mut() {
            commodity.fit_slope_to_maximum();
        }
    }

    // === Update ===

    /// Accumulate `elapsed` and run as many fixed-size steps as it covers.
    /// Returns the number of steps run.
    pub fn update(&mut self, elapsed: Millis, config: &SimConfig, catalog: &Catalog) -> u32 {
        self.update_counter += elapsed.max(0);
        let step = config.holding_update_time;
        if step <= 0 {
            let pending = std::mem::take(&mut self.update_counter);
            if pending > 0 {
                self.step(pending, config, catalog);
                return 1;
            }
            return 0;
        }
        let mut steps = 0;
        while self.update_counter >= step {
            self.step(step, config, catalog);
            self.update_counter -= step;
            steps += 1;
        }
        steps
    }

    /// Consume and perish stock, then run facilities for `elapsed`.
    pub fn step(&mut self, elapsed: Millis, config: &SimConfig, catalog: &Catalog) -> Vec<RunReport> {
        self.stock.update(elapsed, config.year_length());
        run_all(
            &mut self.facilities,
            &mut self.stock,
            config.tick_fraction(elapsed),
            catalog,
        )
    }

    // === Plans ===

    /// Ranked build candidates for a buyer holding `buyer` goods and
    /// `capital` money, using this holding's prices.
    ///
    /// Each plan buys a basket of requirement and per-area input goods in
    /// the facility's ratios, topping up what the buyer already has.
    pub fn build_plans(
        &self,
        catalog: &Catalog,
        buyer: &Stock,
        capital: f64,
        config: &SimConfig,
    ) -> Vec<InvestmentPlan> {
        let mut plans: Vec<_> = catalog
            .facilities()
            .filter_map(|proto| self.plan(proto, buyer, capital.max(0.0), config))
            .collect();
        plans.sort_by(|a, b| b.net().total_cmp(&a.net()));
        plans
    }

    fn plan(
        &self,
        proto: &Facility,
        buyer: &Stock,
        capital: f64,
        config: &SimConfig,
    ) -> Option<InvestmentPlan> {
        let mut ratios: BTreeMap<GoodId, f64> = BTreeMap::new();
        for rate in proto.requirements.iter().chain(&proto.inputs) {
            *ratios.entry(rate.good).or_insert(0.0) += rate.amount;
        }
        ratios.retain(|_, r| *r > 0.0);
        if ratios.is_empty() {
            return None;
        }

        let (area, cost, request) = self.balance(&ratios, buyer, capital)?;
        if !(area.is_finite() && area > 0.0) {
            return None;
        }
        let margin = proto.margin_per_area(|g| self.stock.good_price(g).unwrap_or(0.0));
        Some(InvestmentPlan {
            facility: proto.key,
            area,
            profit: margin * area * config.plan_horizon_days,
            cost,
            request,
        })
    }

    /// Spend up to `capital` topping up the buyer's stock of each good in
    /// proportion to `ratios`. Returns the area the resulting basket supports,
    /// the money spent and the goods bought.
    fn balance(
        &self,
        ratios: &BTreeMap<GoodId, f64>,
        buyer: &Stock,
        capital: f64,
    ) -> Option<(f64, f64, Vec<(CommodityId, Quantity)>)> {
        let owned = |good: GoodId| buyer.good_amount(good);
        if capital <= 0.0 {
            let area = ratios
                .iter()
                .map(|(&good, &ratio)| owned(good) / ratio)
                .fold(f64::MAX, f64::min);
            return Some((area, 0.0, Vec::new()));
        }

        let mut lines = Vec::with_capacity(ratios.len());
        for (&good, &ratio) in ratios {
            let cheapest = self.stock.cheapest(good)?;
            lines.push((cheapest, ratio, owned(good)));
        }
        let owned_value: f64 = lines.iter().map(|(c, _, o)| o * c.price()).sum();
        let ratio_value: f64 = lines.iter().map(|(c, r, _)| r * c.price()).sum();
        if ratio_value <= 0.0 {
            return None;
        }

        // Area the money buys if prices held still; each good is topped up
        // to ratio * area.
        let target = (capital + owned_value) / ratio_value;
        let mut amounts: Vec<Quantity> = lines
            .iter()
            .map(|(c, r, o)| (r * target - o).max(0.0).min(c.amount()))
            .collect();
        let mut cost: f64 = lines.iter().zip(&amounts).map(|((c, _, _), q)| c.cost(*q)).sum();
        if cost > capital && cost > 0.0 {
            let adjustment = capital / cost;
            for q in &mut amounts {
                *q *= adjustment;
            }
            cost = lines.iter().zip(&amounts).map(|((c, _, _), q)| c.cost(*q)).sum();
        }

        let area = lines
            .iter()
            .zip(&amounts)
            .map(|((_, r, o), q)| (q + o) / r)
            .fold(f64::MAX, f64::min);
        let request = lines
            .iter()
            .zip(&amounts)
            .filter(|(_, q)| **q > 0.0)
            .map(|((c, _, _), q)| (c.id, *q))
            .collect();
        Some((area, cost, request))
    }
}
