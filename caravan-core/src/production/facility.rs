// Facility: an area-scaled production process

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{CommodityId, FacilityKey, GoodId, Quantity};

/// Default share of requirement goods banked for reclamation.
pub const DEFAULT_RECLAIM_FRACTION: f64 = 0.7;

/// Amount of a good per unit of area (per day for inputs and outputs).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoodRate {
    pub good: GoodId,
    pub amount: Quantity,
}

impl GoodRate {
    pub const fn new(good: GoodId, amount: Quantity) -> Self {
        Self { good, amount }
    }
}

/// A production facility in a holding.
///
/// Requirement, input and output vectors are stored per unit of area; the
/// effective amounts scale linearly with `area`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facility {
    pub key: FacilityKey,
    pub name: String,
    area: f64,
    /// Outputs take the material of the governing (last) input.
    pub keep_material: bool,
    /// One-time goods consumed when area grows.
    pub requirements: Vec<GoodRate>,
    pub inputs: Vec<GoodRate>,
    pub outputs: Vec<GoodRate>,
    /// Requirement goods that come back on demolition.
    #[serde(with = "crate::types::map_pairs")]
    reclaimables: BTreeMap<CommodityId, Quantity>,
    pub reclaim_fraction: f64,
    factor: f64,
}

impl Facility {
    pub fn new(key: FacilityKey, name: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
            area: 0.0,
            keep_material: false,
            requirements: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            reclaimables: BTreeMap::new(),
            reclaim_fraction: DEFAULT_RECLAIM_FRACTION,
            factor: 0.0,
        }
    }

    pub fn with_requirement(mut self, good: GoodId, per_area: Quantity) -> Self {
        self.requirements.push(GoodRate::new(good, per_area));
        self
    }

    pub fn with_input(mut self, good: GoodId, per_area: Quantity) -> Self {
        self.inputs.push(GoodRate::new(good, per_area));
        self
    }

    pub fn with_output(mut self, good: GoodId, per_area: Quantity) -> Self {
        self.outputs.push(GoodRate::new(good, per_area));
        self
    }

    pub fn with_keep_material(mut self, keep: bool) -> Self {
        self.keep_material = keep;
        self
    }

    pub fn with_reclaim_fraction(mut self, fraction: f64) -> Self {
        self.reclaim_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Copy with no area, run state or reclaim ledger.
    pub fn prototype(&self) -> Self {
        Self {
            area: 0.0,
            reclaimables: BTreeMap::new(),
            factor: 0.0,
            ..self.clone()
        }
    }

    pub fn area(&self) -> f64 {
        self.area
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub(crate) fn set_factor(&mut self, factor: f64) {
        self.factor = factor;
    }

    pub fn reclaimables(&self) -> &BTreeMap<CommodityId, Quantity> {
        &self.reclaimables
    }

    /// Good whose stock doubles as the breeding pool, if any.
    pub fn terminal_output(&self) -> Option<GoodId> {
        self.outputs.last().map(|o| o.good)
    }

    /// Input whose material outputs inherit.
    pub fn governing_input(&self) -> Option<GoodId> {
        self.inputs.last().map(|i| i.good)
    }

    /// True when `good` is both consumed and produced as the terminal output.
    pub fn is_breeding_stock(&self, good: GoodId) -> bool {
        self.terminal_output() == Some(good)
    }

    pub(crate) fn grow(&mut self, area: f64) {
        self.area += area;
    }

    pub(crate) fn bank_reclaimable(&mut self, id: CommodityId, amount: Quantity) {
        let banked = amount * self.reclaim_fraction;
        if banked > 0.0 {
            *self.reclaimables.entry(id).or_insert(0.0) += banked;
        }
    }

    /// Shrink by `area`, releasing the same share of the reclaim ledger.
    ///
    /// Caller checks that `0 < area <= self.area`.
    pub(crate) fn shrink(&mut self, area: f64) -> Vec<(CommodityId, Quantity)> {
        let share = if self.area > 0.0 {
            (area / self.area).min(1.0)
        } else {
            1.0
        };
        self.area = (self.area - area).max(0.0);
        let released: Vec<_> = self
            .reclaimables
            .iter_mut()
            .map(|(id, banked)| {
                let amount = *banked * share;
                *banked -= amount;
                (*id, amount)
            })
            .filter(|(_, amount)| *amount > 0.0)
            .collect();
        self.reclaimables.retain(|_, banked| *banked > 0.0);
        released
    }

    /// Total daily value of outputs less inputs per unit of area at `price`.
    pub fn margin_per_area(&self, price: impl Fn(GoodId) -> f64) -> f64 {
        let revenue: f64 = self.outputs.iter().map(|o| o.amount * price(o.good)).sum();
        let spend: f64 = self.inputs.iter().map(|i| i.amount * price(i.good)).sum();
        revenue - spend
    }
}
