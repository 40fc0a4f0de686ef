// Looting: what to take from a beaten or yielding target

use crate::types::{CommodityId, Quantity};

/// One commodity the target carries, valued by the looter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LootItem {
    pub id: CommodityId,
    pub amount: Quantity,
    /// Weight per unit; negative for pack animals.
    pub carry: f64,
    /// Looter's estimate per unit.
    pub value: f64,
}

impl LootItem {
    /// Value per unit of carry weight. Items that lighten the load score
    /// negative and are always preferred; weightless valuables score infinite.
    fn score(&self) -> f64 {
        let worth = self.amount * self.value;
        if self.carry != 0.0 {
            worth / self.carry
        } else if worth > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }
}

/// Total value of everything a target carries.
pub fn loot_value(items: &[LootItem]) -> f64 {
    items.iter().map(|i| i.amount.max(0.0) * i.value).sum()
}

/// Pick items to take until `goal` value is reached or the next pick would
/// push `net_weight` above zero.
///
/// Every round either removes an item from the candidates or stops, so the
/// loop ends after at most `items.len()` rounds.
pub fn plan_loot(items: &[LootItem], mut net_weight: f64, goal: f64) -> Vec<(CommodityId, Quantity)> {
    let mut remaining: Vec<&LootItem> = items.iter().filter(|i| i.amount > 0.0).collect();
    let mut taken = Vec::new();
    let mut looted = 0.0;
    while looted < goal {
        let mut best: Option<usize> = None;
        let mut best_score = 0.0;
        for (index, item) in remaining.iter().enumerate() {
            let score = item.score();
            if (best_score >= 0.0 && score > best_score) || (score < 0.0 && score < best_score) {
                best_score = score;
                best = Some(index);
            }
        }
        let Some(index) = best else {
            break;
        };
        let item = remaining[index];
        let added = item.carry * item.amount;
        if net_weight + added > 0.0 {
            break;
        }
        net_weight += added;
        looted += item.amount * item.value;
        taken.push((item.id, item.amount));
        remaining.swap_remove(index);

        #[cfg(feature = "instrument")]
        tracing::debug!(
            target: "loot",
            good = item.id.good,
            material = item.id.material,
            amount = item.amount,
            looted,
            goal
        );
    }
    taken
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(good: u32, amount: f64, carry: f64, value: f64) -> LootItem {
        LootItem {
            id: CommodityId::generic(good),
            amount,
            carry,
            value,
        }
    }

    #[test]
    fn test_pack_animals_taken_first() {
        let items = [item(1, 2.0, 1.0, 50.0), item(2, 1.0, -10.0, 5.0)];
        let taken = plan_loot(&items, -1.0, f64::MAX);
        assert_eq!(taken[0].0, CommodityId::generic(2));
        assert_eq!(taken.len(), 2);
    }

    #[test]
    fn test_stops_at_capacity() {
        let items = [item(1, 3.0, 2.0, 10.0), item(2, 1.0, 1.0, 1.0)];
        // Room for 5 weight: the first item needs 6.
        let taken = plan_loot(&items, -5.0, f64::MAX);
        assert!(taken.is_empty());
    }

    #[test]
    fn test_stops_at_goal() {
        let items = [item(1, 1.0, 1.0, 100.0), item(2, 1.0, 1.0, 50.0)];
        let taken = plan_loot(&items, -100.0, 80.0);
        assert_eq!(taken, vec![(CommodityId::generic(1), 1.0)]);
    }

    #[test]
    fn test_worthless_items_ignored() {
        let items = [item(1, 5.0, 1.0, 0.0)];
        assert!(plan_loot(&items, -100.0, 1.0).is_empty());
        assert_eq!(loot_value(&items), 0.0);
    }
}
