use polars::prelude::*;

use caravan_core::{
    Catalog, Commodity, CommodityId, GoodId, Holding, NationId, Role, SimConfig, Simulation, World,
};

const EPS: f64 = 1e-9;

fn holdings(world: &World) -> Vec<(String, &Holding)> {
    let mut all: Vec<(String, &Holding)> = world
        .settlements()
        .map(|(_, s)| (s.name.clone(), &s.holding))
        .collect();
    for (_, agent) in world.agents() {
        all.push((format!("{} goods", agent.name), &agent.goods));
        for (_, property) in &agent.properties {
            all.push((format!("{} property", agent.name), property));
        }
    }
    all
}

fn check_stock(world: &World, step: usize) {
    for (owner, holding) in holdings(world) {
        for c in holding.stock().iter() {
            let total = c.batches().total();
            assert!(
                (total - c.amount()).abs() < 1e-6,
                "step {step}, {owner}, {}: batches {total} vs stock {}",
                c.name,
                c.amount()
            );
            assert!(c.amount().is_finite() && c.amount() >= 0.0, "step {step}, {owner}: {}", c.name);
            assert!(c.price() >= c.floor(), "step {step}, {owner}: {} under floor", c.name);
        }
    }
}

fn check_facilities(world: &World, step: usize) {
    let tick_fraction = world.config.tick_fraction(world.config.holding_update_time);
    for (owner, holding) in holdings(world) {
        for f in holding.facilities() {
            let breeding = f.inputs.iter().any(|i| f.is_breeding_stock(i.good));
            assert!(f.factor() >= 0.0);
            if !breeding {
                assert!(
                    f.factor() <= tick_fraction + EPS,
                    "step {step}, {owner}: {} at {}",
                    f.name,
                    f.factor()
                );
            }
        }
    }
}

fn check_agents(world: &World, step: usize) {
    for (_, agent) in world.agents() {
        assert!(agent.mind.beliefs.is_consistent(), "step {step}: {} beliefs", agent.name);
        assert!(agent.purse.is_finite() && agent.purse >= 0.0, "step {step}: {} purse", agent.name);
    }
}

#[test]
fn invariant_demo_world_holds_every_step() {
    let mut sim = Simulation::with_demo_scenario();
    for step in 0..80 {
        sim.advance(250);
        let world = sim.world();
        check_stock(world, step);
        check_facilities(world, step);
        check_agents(world, step);
    }
}

#[test]
fn invariant_seeded_worlds_hold_every_step() {
    for seed in 0..5u64 {
        let mut sim = Simulation::with_demo_scenario();
        {
            let world = sim.world_mut();
            let towns: Vec<_> = world.settlements().map(|(id, _)| id).collect();
            for i in 0..12u64 {
                let home = towns[(i as usize) % towns.len()];
                let id = world.spawn_agent(format!("drifter {i}"), NationId(0), home, seed * 100 + i);
                if let Some(agent) = world.agent_mut(id) {
                    agent.purse = 50.0 * (i + 1) as f64;
                }
            }
        }
        for step in 0..40 {
            sim.advance(400);
            check_stock(sim.world(), step);
            check_facilities(sim.world(), step);
            check_agents(sim.world(), step);
        }
    }
}

// ============================================================================
// Conservation
// ============================================================================

const GRAIN: GoodId = 1;
const SALT: GoodId = 2;

fn goods_total(world: &World, good: GoodId) -> f64 {
    holdings(world)
        .iter()
        .map(|(_, h)| h.stock().good_amount(good))
        .sum()
}

#[test]
fn invariant_trading_conserves_goods() {
    let mut world = World::new(SimConfig::default());
    world.add_catalog(
        NationId(0),
        Catalog::new()
            .with_commodity(
                Commodity::new(CommodityId::generic(GRAIN), "grain")
                    .with_demand(1.0, 100.0, 63.0)
                    .with_carry(1.0),
            )
            .with_commodity(
                Commodity::new(CommodityId::generic(SALT), "salt")
                    .with_demand(0.5, 60.0, 63.0)
                    .with_carry(0.5),
            ),
    );
    let a = world.add_settlement("Saltmarsh", NationId(0), 0);
    let b = world.add_settlement("Wheatley", NationId(0), 0);
    let c = world.add_settlement("Crossing", NationId(0), 0);
    world.connect(a, b);
    world.connect(b, c);
    world.create_goods(a, CommodityId::generic(SALT), 80.0);
    world.create_goods(a, CommodityId::generic(GRAIN), 5.0);
    world.create_goods(b, CommodityId::generic(GRAIN), 85.0);
    world.create_goods(c, CommodityId::generic(SALT), 20.0);
    world.create_goods(c, CommodityId::generic(GRAIN), 30.0);

    let towns = [a, b, c];
    for i in 0..9u64 {
        let id = world.spawn_agent(format!("trader {i}"), NationId(0), towns[i as usize % 3], i + 7);
        if let Some(agent) = world.agent_mut(id) {
            agent.role = Role::Trader;
            agent.purse = 120.0;
        }
    }
    let grain = goods_total(&world, GRAIN);
    let salt = goods_total(&world, SALT);

    for step in 0..60 {
        world.tick(700);
        // Walk every agent with a destination one hop along.
        let moves: Vec<_> = world
            .agents()
            .filter_map(|(id, a)| a.destination.map(|d| (id, d)))
            .collect();
        for (id, to) in moves {
            world.move_agent(id, to);
        }
        assert!((goods_total(&world, GRAIN) - grain).abs() < 1e-6, "step {step}: grain");
        assert!((goods_total(&world, SALT) - salt).abs() < 1e-6, "step {step}: salt");
        check_stock(&world, step);
    }
}

// ============================================================================
// Instrumentation
// ============================================================================

#[test]
fn invariant_production_is_recorded() {
    let mut sim = Simulation::with_demo_scenario();
    let (_, recorder) = instrument::capture(|| sim.advance(1000));

    // Two holding steps over three facilities.
    assert_eq!(recorder.rows("facility_run"), 6);
    // The mill and the smithy each draw on one input per step.
    assert_eq!(recorder.rows("scheduler"), 4);

    let runs = recorder.table("facility_run").expect("facility_run events");
    let tick_fraction = sim.world().config.tick_fraction(sim.world().config.holding_update_time);
    for factor in runs.f64s("factor").expect("factor column") {
        assert!((0.0..=tick_fraction + EPS).contains(factor));
    }
}

#[test]
fn invariant_decisions_are_recorded() {
    let mut sim = Simulation::with_demo_scenario();
    let period = sim.world().config.decision_time as u32;
    let (_, recorder) = instrument::capture(|| sim.advance(period + 1));
    let living = sim.world().agents().filter(|(_, a)| a.alive).count();
    assert!(recorder.rows("decision") >= living);
}

fn col_f64(df: &DataFrame, name: &str) -> Vec<f64> {
    df.column(name)
        .unwrap()
        .f64()
        .unwrap()
        .into_no_null_iter()
        .collect()
}

#[test]
fn invariant_peak_factor_per_facility_within_tick_fraction() {
    let mut sim = Simulation::with_demo_scenario();
    let (_, recorder) = instrument::capture(|| {
        for _ in 0..20 {
            sim.advance(500);
        }
    });
    let tick_fraction = sim.world().config.tick_fraction(sim.world().config.holding_update_time);

    let runs = recorder.to_dataframes().remove("facility_run").expect("facility_run frame");
    let peaks = runs
        .lazy()
        .group_by([col("facility")])
        .agg([
            col("factor").max().alias("peak"),
            col("produced").sum().alias("output"),
        ])
        .collect()
        .unwrap();

    assert!(peaks.height() >= 3);
    for peak in col_f64(&peaks, "peak") {
        assert!((0.0..=tick_fraction + EPS).contains(&peak), "peak factor {peak}");
    }
    for output in col_f64(&peaks, "output") {
        assert!(output.is_finite() && output >= 0.0);
    }
}
