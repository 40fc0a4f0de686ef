use wasm_bindgen::prelude::*;

pub mod agent;
pub mod catalog;
pub mod config;
pub mod holding;
pub mod ledger;
pub mod production;
pub mod snapshot;
pub mod types;
pub mod world;

pub use agent::{Agent, FightChoice, Intent, Role, Traits};
pub use catalog::Catalog;
pub use config::{ConfigError, SimConfig};
pub use holding::{Holding, HoldingError, InvestmentPlan};
pub use ledger::{Commodity, Lot, Stock};
pub use production::{Facility, RunReport};
pub use snapshot::{AgentSnapshot, SettlementSnapshot, WorldSnapshot};
pub use types::*;
pub use world::{Encounter, PersistError, Settlement, World};

// ============================================================================
// WASM API - Simulation
// ============================================================================

#[wasm_bindgen]
pub struct Simulation {
    world: World,
}

#[wasm_bindgen]
impl Simulation {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        // Better panic messages in browser console
        console_error_panic_hook::set_once();

        Self {
            world: World::new(SimConfig::builtin()),
        }
    }

    /// Create a simulation with tunables from JSON; missing fields keep their
    /// defaults.
    #[wasm_bindgen]
    pub fn with_config(config_json: &str) -> Result<Simulation, JsError> {
        let mut sim = Self::new();
        sim.world = World::new(SimConfig::from_json_str(config_json)?);
        Ok(sim)
    }

    /// Create a simulation with a small demo world
    #[wasm_bindgen]
    pub fn with_demo_scenario() -> Self {
        let mut sim = Self::new();
        sim.setup_demo_scenario();
        sim
    }

    /// Register a nation's commodity and facility catalog from JSON.
    #[wasm_bindgen]
    pub fn add_catalog(&mut self, nation: u32, catalog_json: &str) -> Result<(), JsError> {
        let catalog: Catalog = serde_json::from_str(catalog_json)?;
        self.world.add_catalog(NationId(nation), catalog);
        Ok(())
    }

    #[wasm_bindgen]
    pub fn add_settlement(&mut self, name: &str, nation: u32, population: u32) -> u64 {
        self.world
            .add_settlement(name, NationId(nation), u64::from(population))
            .to_u64()
    }

    #[wasm_bindgen]
    pub fn connect(&mut self, a: u64, b: u64) {
        self.world.connect(settlement_key(a), settlement_key(b));
    }

    #[wasm_bindgen]
    pub fn spawn_agent(&mut self, name: &str, nation: u32, location: u64, seed: u64) -> u64 {
        self.world
            .spawn_agent(name, NationId(nation), settlement_key(location), seed)
            .to_u64()
    }

    /// Report that an agent reached a settlement.
    #[wasm_bindgen]
    pub fn arrive(&mut self, agent: u64, settlement: u64) {
        self.world.move_agent(agent_key(agent), settlement_key(settlement));
    }

    /// Report the outcome of a melee started by `attacker`.
    #[wasm_bindgen]
    pub fn resolve_encounter(&mut self, attacker: u64, attacker_won: bool) {
        self.world.resolve_encounter(agent_key(attacker), attacker_won);
    }

    /// Advance the simulation by `elapsed` milliseconds
    #[wasm_bindgen]
    pub fn advance(&mut self, elapsed: u32) {
        self.world.tick(Millis::from(elapsed));
    }

    #[wasm_bindgen]
    pub fn get_time(&self) -> f64 {
        self.world.time() as f64
    }

    /// Get a snapshot of the current state for rendering
    #[wasm_bindgen]
    pub fn get_state_snapshot(&self) -> WorldSnapshot {
        WorldSnapshot::capture(&self.world)
    }

    #[wasm_bindgen]
    pub fn save(&self) -> Result<String, JsError> {
        Ok(self.world.to_json()?)
    }

    #[wasm_bindgen]
    pub fn load(json: &str) -> Result<Simulation, JsError> {
        let mut sim = Self::new();
        sim.world = World::from_json(json)?;
        Ok(sim)
    }
}

impl Simulation {
    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Setup a demo world: three linked towns with a farm, a mill and a
    /// smithy spread between them.
    #[cfg_attr(not(feature = "instrument"), allow(unused_variables))]
    fn setup_demo_scenario(&mut self) {
        const GRAIN: GoodId = 1;
        const FLOUR: GoodId = 2;
        const WOOD: GoodId = 3;
        const IRON: GoodId = 4;
        const SWORD: GoodId = 5;
        let nation = NationId(0);
        let divisor = self.world.config.min_price_divisor;

        let catalog = Catalog::new()
            .with_commodity(
                Commodity::new(CommodityId::generic(GRAIN), "grain")
                    .with_demand(0.5, 40.0, divisor)
                    .with_consumption(0.2)
                    .with_shelf_life(Some(self.world.config.year_length()))
                    .with_carry(1.0),
            )
            .with_commodity(
                Commodity::new(CommodityId::generic(FLOUR), "flour")
                    .with_demand(0.5, 60.0, divisor)
                    .with_consumption(0.1)
                    .with_carry(1.0),
            )
            .with_commodity(
                Commodity::new(CommodityId::generic(WOOD), "wood")
                    .with_demand(0.2, 20.0, divisor)
                    .with_carry(2.0),
            )
            .with_commodity(
                Commodity::new(CommodityId::generic(IRON), "iron")
                    .with_demand(0.2, 80.0, divisor)
                    .with_carry(2.0),
            )
            .with_commodity(
                Commodity::new(CommodityId::generic(SWORD), "sword")
                    .with_demand(1.0, 300.0, divisor)
                    .with_carry(1.0)
                    .with_combat_stats(vec![agent::CombatStat::weapon(0, 0, 4.0, 1.0)]),
            )
            .with_facility(
                Facility::new(FacilityKey::new(1, 0), "farm")
                    .with_requirement(WOOD, 5.0)
                    .with_output(GRAIN, 4.0),
            )
            .with_facility(
                Facility::new(FacilityKey::new(2, 0), "mill")
                    .with_requirement(WOOD, 10.0)
                    .with_input(GRAIN, 4.0)
                    .with_output(FLOUR, 3.0),
            )
            .with_facility(
                Facility::new(FacilityKey::new(3, 0), "smithy")
                    .with_requirement(WOOD, 10.0)
                    .with_input(IRON, 2.0)
                    .with_output(SWORD, 0.5),
            );
        self.world.add_catalog(nation, catalog);

        let hartwen = self.world.add_settlement("Hartwen", nation, 200);
        let osmouth = self.world.add_settlement("Osmouth", nation, 300);
        let millford = self.world.add_settlement("Millford", nation, 150);
        self.world.connect(hartwen, osmouth);
        self.world.connect(hartwen, millford);
        self.world.connect(osmouth, millford);

        let starting = [
            (hartwen, WOOD, 60.0),
            (hartwen, GRAIN, 40.0),
            (osmouth, WOOD, 40.0),
            (osmouth, IRON, 30.0),
            (millford, WOOD, 80.0),
            (millford, GRAIN, 20.0),
        ];
        for (town, good, amount) in starting {
            self.world.create_goods(town, CommodityId::generic(good), amount);
        }
        let facilities = [
            (hartwen, FacilityKey::new(1, 0), 4.0),
            (millford, FacilityKey::new(2, 0), 2.0),
            (osmouth, FacilityKey::new(3, 0), 1.0),
        ];
        for (town, key, area) in facilities {
            if let Err(err) = self.world.build(town, key, area) {
                #[cfg(feature = "instrument")]
                tracing::warn!(target: "build", facility = key.id, error = %err, "demo.build_failed");
            }
        }

        let towns = [hartwen, osmouth, millford];
        for (i, name) in ["Tam", "Wren", "Rook", "Ivo", "Sal", "Bram"].iter().enumerate() {
            let id = self
                .world
                .spawn_agent(*name, nation, towns[i % towns.len()], i as u64 + 1);
            if let Some(agent) = self.world.agent_mut(id) {
                agent.purse = 200.0;
            }
        }
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn settlement_key(id: u64) -> SettlementId {
    SettlementId::from(slotmap::KeyData::from_ffi(id))
}

fn agent_key(id: u64) -> AgentId {
    AgentId::from(slotmap::KeyData::from_ffi(id))
}

// ============================================================================
// Tests
// ============================================================================
