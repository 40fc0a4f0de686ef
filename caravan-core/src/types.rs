use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use tsify_next::Tsify;

// ============================================================================
// IDs - Using slotmap for generational indices
// ============================================================================

new_key_type! {
    pub struct SettlementId;
    pub struct AgentId;
}

/// Trait for converting SlotMap keys to u64 for WASM boundary
pub trait KeyToU64 {
    fn to_u64(self) -> u64;
}

impl KeyToU64 for SettlementId {
    fn to_u64(self) -> u64 {
        self.0.as_ffi()
    }
}

impl KeyToU64 for AgentId {
    fn to_u64(self) -> u64 {
        self.0.as_ffi()
    }
}

// ============================================================================
// Type aliases
// ============================================================================

pub type GoodId = u32;
pub type MaterialId = u32;
pub type Price = f64;
pub type Quantity = f64;
/// Elapsed simulation time in milliseconds.
pub type Millis = i64;

// ============================================================================
// Commodity identity
// ============================================================================

/// A tradeable commodity: a good made of a particular material.
///
/// Ordering is by good first, so all materials of one good form a contiguous
/// range in an ordered map.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Tsify,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct CommodityId {
    pub good: GoodId,
    pub material: MaterialId,
}

impl CommodityId {
    pub const fn new(good: GoodId, material: MaterialId) -> Self {
        Self { good, material }
    }

    /// The commodity whose material is the good itself (e.g. plain "grain").
    pub const fn generic(good: GoodId) -> Self {
        Self {
            good,
            material: good,
        }
    }

    /// Smallest and largest ids sharing `good`, for range lookups.
    pub const fn good_range(good: GoodId) -> (Self, Self) {
        (Self::new(good, 0), Self::new(good, MaterialId::MAX))
    }
}

/// A facility kind: one business in one production mode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Tsify,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct FacilityKey {
    pub id: u32,
    pub mode: u32,
}

impl FacilityKey {
    pub const fn new(id: u32, mode: u32) -> Self {
        Self { id, mode }
    }
}

/// Index into the world's nation catalogs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct NationId(pub u32);

// ============================================================================
// Serde helpers
// ============================================================================

/// Encode a map with struct keys as a list of `[key, value]` pairs, since JSON
/// object keys must be strings.
pub(crate) mod map_pairs {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize,
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let pairs = Vec::<(K, V)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

/// Clamp a quantity that should never be negative or NaN.
///
/// Debug builds treat a non-finite value as a fatal invariant violation.
pub(crate) fn clamp_quantity(value: Quantity) -> Quantity {
    debug_assert!(value.is_finite(), "non-finite quantity {value}");
    if value.is_nan() || value < 0.0 { 0.0 } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_good_range_covers_all_materials() {
        let mut map = BTreeMap::new();
        map.insert(CommodityId::new(3, 1), "a");
        map.insert(CommodityId::new(4, 0), "b");
        map.insert(CommodityId::new(4, 9), "c");
        map.insert(CommodityId::new(5, 4), "d");

        let (lo, hi) = CommodityId::good_range(4);
        let found: Vec<_> = map.range(lo..=hi).map(|(_, v)| *v).collect();
        assert_eq!(found, vec!["b", "c"]);
    }

    #[test]
    fn test_struct_keyed_map_round_trips_through_json() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Wrapper {
            #[serde(with = "map_pairs")]
            map: BTreeMap<CommodityId, f64>,
        }
        let mut map = BTreeMap::new();
        map.insert(CommodityId::new(1, 2), 3.5);
        let wrapper = Wrapper { map };
        let json = serde_json::to_string(&wrapper).unwrap();
        assert_eq!(json, r#"{"map":[[{"good":1,"material":2},3.5]]}"#);
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wrapper);
    }

    #[test]
    fn test_clamp_quantity() {
        assert_eq!(clamp_quantity(-1.0), 0.0);
        assert_eq!(clamp_quantity(2.5), 2.5);
    }
}
