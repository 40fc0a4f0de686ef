// Commodity ledger: stock, demand curve and perishable aging per commodity

pub mod aging;
pub mod stock;

pub use aging::{AgingQueue, Batch};
pub use stock::Stock;

use serde::{Deserialize, Serialize};

use crate::agent::CombatStat;
use crate::types::{CommodityId, Millis, Price, Quantity, clamp_quantity};

/// Outcome of spending a budget against a commodity's curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Purchase {
    pub quantity: Quantity,
    /// Budget left over when the stock ran out first.
    pub excess: f64,
}

/// Stock moved between holdings, carrying its batch ages along.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub id: CommodityId,
    pub batches: AgingQueue,
}

impl Lot {
    pub fn amount(&self) -> Quantity {
        self.batches.total()
    }

    /// A lot of freshly made stock.
    pub fn fresh(id: CommodityId, amount: Quantity) -> Self {
        let mut batches = AgingQueue::new();
        batches.create(amount);
        Self { id, batches }
    }
}

/// One commodity as tracked by one holding.
///
/// `amount` always equals the sum of the aging batches; every mutation goes
/// through the queue and re-reads the total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commodity {
    pub id: CommodityId,
    pub name: String,
    amount: Quantity,
    /// Yearly consumption; negative values create stock.
    consumption: f64,
    slope: f64,
    intercept: Price,
    floor: Price,
    /// Expiry window in milliseconds, `None` for goods that keep.
    shelf_life: Option<Millis>,
    /// Weight of one unit; negative for pack animals.
    carry: f64,
    maximum: Quantity,
    combat_stats: Vec<CombatStat>,
    batches: AgingQueue,
    last_amount: Quantity,
}

impl Commodity {
    pub fn new(id: CommodityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            amount: 0.0,
            consumption: 0.0,
            slope: 0.0,
            intercept: 0.0,
            floor: 0.0,
            shelf_life: None,
            carry: 0.0,
            maximum: 0.0,
            combat_stats: Vec::new(),
            batches: AgingQueue::new(),
            last_amount: 0.0,
        }
    }

    /// Demand curve with the floor at `intercept / floor_divisor`.
    pub fn with_demand(mut self, slope: f64, intercept: Price, floor_divisor: f64) -> Self {
        self.slope = slope.max(0.0);
        self.intercept = intercept.max(0.0);
        self.floor = if floor_divisor > 0.0 {
            self.intercept / floor_divisor
        } else {
            0.0
        };
        self
    }

    pub fn with_floor(mut self, floor: Price) -> Self {
        self.floor = floor.max(0.0);
        self
    }

    pub fn with_consumption(mut self, per_year: f64) -> Self {
        self.consumption = per_year;
        self
    }

    pub fn with_shelf_life(mut self, window: Option<Millis>) -> Self {
        self.shelf_life = window;
        self
    }

    pub fn with_carry(mut self, carry: f64) -> Self {
        self.carry = carry;
        self
    }

    pub fn with_combat_stats(mut self, stats: Vec<CombatStat>) -> Self {
        self.combat_stats = stats;
        self
    }

    pub fn with_amount(mut self, amount: Quantity) -> Self {
        self.create(amount);
        self
    }

    // === Accessors ===

    pub fn amount(&self) -> Quantity {
        self.amount
    }

    pub fn last_amount(&self) -> Quantity {
        self.last_amount
    }

    pub fn consumption(&self) -> f64 {
        self.consumption
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    pub fn intercept(&self) -> Price {
        self.intercept
    }

    pub fn floor(&self) -> Price {
        self.floor
    }

    pub fn shelf_life(&self) -> Option<Millis> {
        self.shelf_life
    }

    pub fn carry(&self) -> f64 {
        self.carry
    }

    pub fn weight(&self) -> f64 {
        self.amount * self.carry
    }

    pub fn maximum(&self) -> Quantity {
        self.maximum
    }

    pub fn combat_stats(&self) -> &[CombatStat] {
        &self.combat_stats
    }

    pub fn batches(&self) -> &AgingQueue {
        &self.batches
    }

    pub fn has_space(&self) -> bool {
        self.amount < self.maximum
    }

    // === Pricing ===

    /// Spot price at the current stock.
    pub fn price(&self) -> Price {
        self.price_at(self.amount)
    }

    pub fn price_at(&self, stock: Quantity) -> Price {
        (self.intercept - self.slope * stock).max(self.floor)
    }

    /// Market value of the current stock at spot price.
    pub fn value(&self) -> f64 {
        self.price() * self.amount
    }

    /// Revenue from selling `qty` into this market; price is taken at the
    /// mean stock level over the sale.
    pub fn sale_value(&self, qty: Quantity) -> f64 {
        if qty <= 0.0 {
            return 0.0;
        }
        self.price_at(self.amount + qty / 2.0) * qty
    }

    /// Cost of buying `qty` out of this market.
    pub fn cost(&self, qty: Quantity) -> f64 {
        if qty <= 0.0 {
            return 0.0;
        }
        self.price_at(self.amount - qty / 2.0) * qty
    }

    /// Quantity a budget buys, clamped to the stock on hand.
    pub fn quantity(&self, budget: f64) -> Purchase {
        let wanted = self.quantity_unbounded(budget);
        if wanted <= self.amount {
            return Purchase {
                quantity: wanted,
                excess: 0.0,
            };
        }
        Purchase {
            quantity: self.amount,
            excess: (budget - self.cost(self.amount)).max(0.0),
        }
    }

    /// Quantity a budget buys, ignoring how much is actually in stock.
    pub fn quantity_unbounded(&self, budget: f64) -> Quantity {
        if budget <= 0.0 || !budget.is_finite() {
            return 0.0;
        }
        let q = if self.slope > 0.0 {
            // cost(q) = (I - S(s - q/2)) q  =>  S/2 q^2 + (I - S s) q - budget = 0
            let spot = self.intercept - self.slope * self.amount;
            let disc = spot * spot + 2.0 * self.slope * budget;
            let q = (disc.sqrt() - spot) / self.slope;
            if self.floor > 0.0 && self.intercept - self.slope * (self.amount - q / 2.0) < self.floor
            {
                budget / self.floor
            } else {
                q
            }
        } else {
            let unit = self.intercept.max(self.floor);
            if unit > 0.0 { budget / unit } else { 0.0 }
        };
        if q.is_finite() { q.max(0.0) } else { 0.0 }
    }

    /// Quantity that must be sold here to raise `revenue`.
    pub fn sale_quantity(&self, revenue: f64) -> Quantity {
        if revenue <= 0.0 || !revenue.is_finite() {
            return 0.0;
        }
        let on_floor = |floor: Price| if floor > 0.0 { revenue / floor } else { 0.0 };
        let q = if self.slope > 0.0 {
            // sale(q) = (I - S(s + q/2)) q  =>  S/2 q^2 - (I - S s) q + revenue = 0
            let spot = self.intercept - self.slope * self.amount;
            let disc = spot * spot - 2.0 * self.slope * revenue;
            if spot <= 0.0 || disc < 0.0 {
                on_floor(self.floor)
            } else {
                let q = (spot - disc.sqrt()) / self.slope;
                if self.intercept - self.slope * (self.amount + q / 2.0) < self.floor {
                    on_floor(self.floor)
                } else {
                    q
                }
            }
        } else {
            let unit = self.intercept.max(self.floor);
            if unit > 0.0 { revenue / unit } else { 0.0 }
        };
        if q.is_finite() { q.max(0.0) } else { 0.0 }
    }

    /// Stock level at which the spot price equals `price`.
    ///
    /// `None` when no stock level produces it: a flat curve, or a price under
    /// the floor.
    pub fn stock_for_price(&self, price: Price) -> Option<Quantity> {
        if self.slope <= 0.0 || price < self.floor {
            return None;
        }
        Some(((self.intercept - price) / self.slope).max(0.0))
    }

    // === Stock changes ===

    fn sync_amount(&mut self) {
        self.amount = clamp_quantity(self.batches.total());
    }

    /// Newly create stock, trimming anything over the maximum.
    pub fn create(&mut self, amount: Quantity) {
        if amount.is_nan() || amount <= 0.0 {
            return;
        }
        self.batches.create(amount);
        self.sync_amount();
        if self.maximum > 0.0 && self.amount > self.maximum {
            self.batches.drain_oldest(self.amount - self.maximum);
            self.sync_amount();
        }
    }

    /// Use up to `amount`, oldest stock first. Returns what was used.
    pub fn draw(&mut self, amount: Quantity) -> Quantity {
        if amount.is_nan() || amount <= 0.0 {
            return 0.0;
        }
        let used = self.batches.drain_oldest(amount.min(self.amount));
        self.sync_amount();
        used
    }

    /// Use all stock.
    pub fn draw_all(&mut self) -> Quantity {
        self.draw(self.amount)
    }

    /// Detach up to `amount` as a transferable lot.
    pub fn take(&mut self, amount: Quantity) -> Lot {
        let batches = if amount > 0.0 {
            self.batches.split_oldest(amount.min(self.amount))
        } else {
            AgingQueue::new()
        };
        self.sync_amount();
        Lot {
            id: self.id,
            batches,
        }
    }

    /// Receive a lot, merging its batches by age.
    pub fn put(&mut self, lot: Lot) {
        debug_assert_eq!(lot.id, self.id);
        self.batches.merge(lot.batches);
        self.sync_amount();
    }

    /// Apply consumption for `elapsed`. Returns the amount consumed
    /// (negative when stock was created).
    pub fn consume(&mut self, elapsed: Millis, year_length: Millis) -> Quantity {
        self.last_amount = self.amount;
        if year_length <= 0 {
            return 0.0;
        }
        let mut c = self.consumption * elapsed as f64 / year_length as f64;
        if c > self.amount {
            c = self.amount;
        }
        if c > 0.0 {
            self.draw(c);
        } else if c < 0.0 {
            self.create(-c);
        }
        c
    }

    /// Expire batches past the shelf life and age the rest. Returns the
    /// amount that perished.
    pub fn perish(&mut self, elapsed: Millis) -> Quantity {
        let expired = self.batches.expire(elapsed, self.shelf_life);
        self.sync_amount();
        expired
    }

    /// One holding step: consumption, then spoilage.
    pub fn update(&mut self, elapsed: Millis, year_length: Millis) -> Quantity {
        self.consume(elapsed, year_length);
        self.perish(elapsed)
    }

    /// Overwrite stock, keeping the batch age profile.
    pub fn set_amount(&mut self, amount: Quantity) {
        self.batches.rescale(clamp_quantity(amount));
        self.sync_amount();
    }

    // === Sizing ===

    /// Scale per-capita demand to a settlement's population.
    pub fn scale(&mut self, population: u64) {
        if population == 0 {
            return;
        }
        let p = population as f64;
        self.consumption *= p;
        self.slope /= p;
    }

    /// Reset capacity to what consumption alone needs.
    pub fn reset_maximum(&mut self, consumption_space_factor: f64) {
        self.maximum = self.consumption.abs() * consumption_space_factor;
    }

    /// Raise capacity to at least `maximum`.
    pub fn raise_maximum(&mut self, maximum: Quantity) {
        self.maximum = self.maximum.max(maximum);
    }

    /// Add room for a facility that uses this commodity.
    pub fn extend_maximum(&mut self, extra: Quantity) {
        if extra > 0.0 {
            self.maximum += extra;
        }
    }

    /// Flatten the curve so the price at full capacity stays on the floor.
    pub fn fit_slope_to_maximum(&mut self) {
        if self.maximum > 0.0 && self.intercept - self.slope * self.maximum < self.floor {
            self.slope = ((self.intercept - self.floor) / self.maximum).max(0.0);
        }
    }
}
