use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::agent::{Intent, Role};
use crate::types::{CommodityId, FacilityKey, KeyToU64, Millis};
use crate::world::World;

// ============================================================================
// Serializable World Snapshot for JS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct WorldSnapshot {
    pub time: Millis,
    pub settlements: Vec<SettlementSnapshot>,
    pub agents: Vec<AgentSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct CommoditySnapshot {
    pub id: CommodityId,
    pub name: String,
    pub amount: f64,
    pub price: f64,
    pub maximum: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct FacilitySnapshot {
    pub key: FacilityKey,
    pub name: String,
    pub area: f64,
    /// Run factor from the last production step.
    pub factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct SettlementSnapshot {
    pub id: u64,
    pub name: String,
    pub nation: u32,
    pub neighbors: Vec<u64>,
    pub commodities: Vec<CommoditySnapshot>,
    pub facilities: Vec<FacilitySnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct AgentSnapshot {
    pub id: u64,
    pub name: String,
    pub role: Role,
    pub alive: bool,
    pub location: u64,
    pub destination: Option<u64>,
    pub purse: f64,
    pub intent: Intent,
    pub target: Option<u64>,
    /// Net carry weight; positive means overloaded.
    pub net_weight: f64,
}

impl WorldSnapshot {
    pub fn capture(world: &World) -> Self {
        let settlements = world
            .settlements()
            .map(|(id, s)| SettlementSnapshot {
                id: id.to_u64(),
                name: s.name.clone(),
                nation: s.nation.0,
                neighbors: s.neighbors.iter().map(|n| n.to_u64()).collect(),
                commodities: s
                    .holding
                    .stock()
                    .iter()
                    .map(|c| CommoditySnapshot {
                        id: c.id,
                        name: c.name.clone(),
                        amount: c.amount(),
                        price: c.price(),
                        maximum: c.maximum(),
                    })
                    .collect(),
                facilities: s
                    .holding
                    .facilities()
                    .iter()
                    .map(|f| FacilitySnapshot {
                        key: f.key,
                        name: f.name.clone(),
                        area: f.area(),
                        factor: f.factor(),
                    })
                    .collect(),
            })
            .collect();

        let agents = world
            .agents()
            .map(|(id, a)| AgentSnapshot {
                id: id.to_u64(),
                name: a.name.clone(),
                role: a.role,
                alive: a.alive,
                location: a.location.to_u64(),
                destination: a.destination.map(|d| d.to_u64()),
                purse: a.purse,
                intent: a.intent.clone(),
                target: a.target.map(|t| t.to_u64()),
                net_weight: a.net_weight(&world.config),
            })
            .collect();

        Self {
            time: world.time(),
            settlements,
            agents,
        }
    }
}
