// Two-pass facility scheduler
//
// Pass 1 proposes a run factor for every facility and counts, per input good,
// how many facilities want it and how much they want in total. Pass 2 divides
// each facility's factor by the largest count among its oversubscribed inputs.
// Only then does anything run. The division is an equal share by count, not a
// demand-weighted allocation.

use std::collections::BTreeMap;

use crate::catalog::Catalog;
use crate::ledger::Stock;
use crate::types::{CommodityId, GoodId, Quantity};

use super::facility::Facility;

/// Demand on one input good across all facilities of a holding this tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Conflict {
    /// Facilities drawing on the good.
    pub count: u32,
    /// Total quantity they would draw at their proposed factors.
    pub demand: Quantity,
}

pub type Conflicts = BTreeMap<GoodId, Conflict>;

/// What a facility did in one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub factor: f64,
    pub consumed: Vec<(GoodId, Quantity)>,
    pub produced: Vec<(CommodityId, Quantity)>,
}

// === PASS 1: PROPOSE ===

/// Propose a run factor in `[0, tick_fraction]` and record input demand.
///
/// The factor is zero when no output has room, and is capped so no input is
/// drawn below zero. A shortfall in breeding stock (an input that is also the
/// terminal output) scales the factor instead of capping it.
pub fn propose(
    facility: &mut Facility,
    stock: &Stock,
    tick_fraction: f64,
    conflicts: &mut Conflicts,
) -> f64 {
    let area = facility.area();
    let mut factor = tick_fraction.max(0.0);
    if area <= 0.0 || !facility.outputs.iter().any(|o| stock.good_has_space(o.good)) {
        factor = 0.0;
    }
    for input in &facility.inputs {
        let needed = input.amount * area;
        if needed <= 0.0 {
            continue;
        }
        let max_factor = stock.good_amount(input.good) / needed;
        if facility.is_breeding_stock(input.good) && max_factor < 1.0 {
            factor *= max_factor;
        } else if factor > max_factor {
            factor = max_factor;
        }
    }
    let factor = factor.max(0.0);
    facility.set_factor(factor);

    for input in &facility.inputs {
        let conflict = conflicts.entry(input.good).or_default();
        conflict.count += 1;
        conflict.demand += input.amount * area * factor;
    }
    factor
}

// === PASS 2: RESOLVE ===

/// Largest contention count among inputs whose total demand exceeds stock.
pub fn contention_divisor(facility: &Facility, stock: &Stock, conflicts: &Conflicts) -> u32 {
    facility
        .inputs
        .iter()
        .filter_map(|input| {
            let conflict = conflicts.get(&input.good)?;
            (conflict.demand > stock.good_amount(input.good)).then_some(conflict.count)
        })
        .max()
        .unwrap_or(0)
}

pub fn resolve(facility: &mut Facility, stock: &Stock, conflicts: &Conflicts) -> f64 {
    let divisor = contention_divisor(facility, stock, conflicts);
    if divisor > 1 {
        facility.set_factor(facility.factor() / f64::from(divisor));
    }
    facility.factor()
}

// === EXECUTE ===

/// Run a facility at its resolved factor: create outputs, then use inputs.
pub fn execute(facility: &Facility, stock: &mut Stock, catalog: &Catalog) -> RunReport {
    let factor = facility.factor();
    let mut report = RunReport {
        factor,
        consumed: Vec::new(),
        produced: Vec::new(),
    };
    if factor <= 0.0 {
        return report;
    }
    let scale = factor * facility.area();
    let governing = facility.governing_input();

    for output in &facility.outputs {
        let amount = output.amount * scale;
        let keep = facility.keep_material && governing.is_some_and(|g| g != output.good);
        let split = match governing {
            Some(input) if keep => material_shares(stock, input),
            _ => Vec::new(),
        };
        if split.is_empty() {
            let before = stock.good_amount(output.good);
            stock.create_good(output.good, amount, catalog);
            let id = stock
                .materials(output.good)
                .next()
                .map_or_else(|| catalog.default_material(output.good), |c| c.id);
            report.produced.push((id, stock.good_amount(output.good) - before));
        } else {
            for (material, share) in split {
                let id = CommodityId::new(output.good, material);
                let before = stock.amount(id);
                stock.create(id, amount * share, catalog);
                report.produced.push((id, stock.amount(id) - before));
            }
        }
    }
    for input in &facility.inputs {
        let used = stock.use_good(input.good, input.amount * scale);
        report.consumed.push((input.good, used));
    }
    report
}

/// Share of a good's stock held in each material.
fn material_shares(stock: &Stock, good: GoodId) -> Vec<(u32, f64)> {
    let total = stock.good_amount(good);
    if total <= 0.0 {
        return Vec::new();
    }
    stock
        .materials(good)
        .filter(|c| c.amount() > 0.0)
        .map(|c| (c.id.material, c.amount() / total))
        .collect()
}

/// Run every facility of a holding for one step.
///
/// All facilities propose before any is resolved, and all are resolved before
/// any executes, since each factor depends on the counts over the whole list.
pub fn run_all(
    facilities: &mut [Facility],
    stock: &mut Stock,
    tick_fraction: f64,
    catalog: &Catalog,
) -> Vec<RunReport> {
    let mut conflicts = Conflicts::new();
    for facility in facilities.iter_mut() {
        propose(facility, stock, tick_fraction, &mut conflicts);
    }
    for facility in facilities.iter_mut() {
        resolve(facility, stock, &conflicts);
    }

    #[cfg(feature = "instrument")]
    for (good, conflict) in &conflicts {
        tracing::debug!(
            target: "scheduler",
            good = *good,
            count = conflict.count,
            demand = conflict.demand,
            available = stock.good_amount(*good)
        );
    }

    facilities
        .iter()
        .map(|facility| {
            let report = execute(facility, stock, catalog);
            #[cfg(feature = "instrument")]
            tracing::info!(
                target: "facility_run",
                facility = facility.key.id,
                mode = facility.key.mode,
                area = facility.area(),
                factor = report.factor,
                produced = report.produced.iter().map(|(_, q)| q).sum::<f64>(),
                consumed = report.consumed.iter().map(|(_, q)| q).sum::<f64>()
            );
            report
        })
        .collect()
}
