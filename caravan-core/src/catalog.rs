// Nation-level prototypes: the commodities and facilities a holding can copy from

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ledger::Commodity;
use crate::production::Facility;
use crate::types::{CommodityId, FacilityKey, GoodId};

/// Prototype commodities and buildable facilities for one nation.
///
/// Holdings copy a commodity from here the first time they touch its id, so
/// every settlement starts from the same curve and shelf life.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(with = "crate::types::map_pairs")]
    commodities: BTreeMap<CommodityId, Commodity>,
    #[serde(with = "crate::types::map_pairs")]
    facilities: BTreeMap<FacilityKey, Facility>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog with nothing in it, usable in a `static`.
    pub const fn empty() -> Self {
        Self {
            commodities: BTreeMap::new(),
            facilities: BTreeMap::new(),
        }
    }

    pub fn with_commodity(mut self, commodity: Commodity) -> Self {
        self.add_commodity(commodity);
        self
    }

    pub fn with_facility(mut self, facility: Facility) -> Self {
        self.add_facility(facility);
        self
    }

    pub fn add_commodity(&mut self, commodity: Commodity) {
        self.commodities.insert(commodity.id, commodity);
    }

    /// Register a facility prototype. Its area is ignored; holdings build
    /// their own.
    pub fn add_facility(&mut self, facility: Facility) {
        self.facilities.insert(facility.key, facility.prototype());
    }

    pub fn commodity(&self, id: CommodityId) -> Option<&Commodity> {
        self.commodities.get(&id)
    }

    pub fn commodities(&self) -> impl Iterator<Item = &Commodity> {
        self.commodities.values()
    }

    pub fn facility(&self, key: FacilityKey) -> Option<&Facility> {
        self.facilities.get(&key)
    }

    pub fn facilities(&self) -> impl Iterator<Item = &Facility> {
        self.facilities.values()
    }

    /// Id used when a good is created without a specific material: the
    /// lowest material the catalog knows, or the generic id.
    pub fn default_material(&self, good: GoodId) -> CommodityId {
        let (lo, hi) = CommodityId::good_range(good);
        self.commodities
            .range(lo..=hi)
            .next()
            .map_or(CommodityId::generic(good), |(id, _)| *id)
    }

    /// Name of a good, taken from any of its materials.
    pub fn good_name(&self, good: GoodId) -> Option<&str> {
        let (lo, hi) = CommodityId::good_range(good);
        self.commodities
            .range(lo..=hi)
            .next()
            .map(|(_, c)| c.name.as_str())
    }
}
