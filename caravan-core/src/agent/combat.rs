// Equipment scoring and combat choices

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use super::traits::Traits;

/// Number of stat slots a traveler has.
pub const STAT_COUNT: usize = 5;
/// Number of body parts an item can be equipped to.
pub const PART_COUNT: usize = 6;

pub type Stats = [u32; STAT_COUNT];

/// Combat properties of one unit of an equippable commodity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatStat {
    /// Stat that drives this item.
    pub stat_id: usize,
    /// Body part the item occupies.
    pub part_id: usize,
    pub attack: f64,
    pub speed: f64,
    /// Defense against each attack type.
    pub defense: [f64; 3],
}

impl CombatStat {
    pub fn weapon(stat_id: usize, part_id: usize, attack: f64, speed: f64) -> Self {
        Self {
            stat_id,
            part_id,
            attack,
            speed,
            defense: [0.0; 3],
        }
    }

    pub fn armor(stat_id: usize, part_id: usize, defense: [f64; 3]) -> Self {
        Self {
            stat_id,
            part_id,
            attack: 0.0,
            speed: 0.0,
            defense,
        }
    }
}

fn stat(stats: &Stats, id: usize) -> f64 {
    stats.get(id).copied().map_or(0.0, f64::from)
}

/// Attack and defense totals for one item, before personality weighting.
pub fn raw_item_scores(item: &[CombatStat], stats: &Stats) -> (f64, f64) {
    item.iter().fold((0.0, 0.0), |(attack, defense), s| {
        let st = stat(stats, s.stat_id);
        (
            attack + s.attack * s.speed * st,
            defense + s.defense.iter().sum::<f64>() * st,
        )
    })
}

/// Score of a single item for a wielder with `stats`.
pub fn item_score(item: &[CombatStat], stats: &Stats, traits: &Traits) -> f64 {
    let (attack, defense) = raw_item_scores(item, stats);
    attack * traits.attack + defense * traits.defense
}

/// Score of a full equipment set. Always at least 1, so ratios stay finite.
pub fn equipment_score<'a>(
    items: impl IntoIterator<Item = &'a [CombatStat]>,
    stats: &Stats,
    traits: &Traits,
) -> f64 {
    1.0 + items
        .into_iter()
        .map(|item| item_score(item, stats, traits).max(0.0))
        .sum::<f64>()
}

/// How an agent responds when attacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum FightChoice {
    Fight,
    Run,
    Yield,
}

/// Pick fight, run or yield from the ratio of equipment scores.
///
/// When the opponent is better equipped, running is discounted and yielding
/// boosted by how much faster the opponent is.
pub fn choose_fight(
    own_score: f64,
    own_speed: f64,
    their_score: f64,
    their_speed: f64,
    traits: &Traits,
) -> FightChoice {
    let ratio = if own_score > 0.0 {
        their_score / own_score
    } else {
        f64::MAX
    };
    let fight = if ratio > 0.0 { traits.fight / ratio } else { traits.fight };
    let mut run = ratio * traits.run;
    let mut give_up = ratio * traits.yield_;
    if ratio > 1.0 && own_speed > 0.0 {
        let speed_ratio = their_speed / own_speed;
        if speed_ratio > 0.0 {
            run /= speed_ratio;
            give_up *= speed_ratio;
        }
    }
    let scores = [
        (FightChoice::Fight, fight),
        (FightChoice::Run, run),
        (FightChoice::Yield, give_up),
    ];
    scores
        .into_iter()
        .fold((FightChoice::Fight, f64::MIN), |best, (choice, score)| {
            if score > best.1 { (choice, score) } else { best }
        })
        .0
}

/// A potential victim as seen by an aggressive agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetCandidate<K> {
    pub key: K,
    /// Value of the candidate's goods at the attacker's estimates.
    pub loot_value: f64,
    pub equipment_score: f64,
}

/// Choose the weakest candidate worth attacking, if any.
///
/// Timid agents (fight tendency under a third of the criteria range) never
/// attack.
pub fn select_target<K: Copy>(
    candidates: &[TargetCandidate<K>],
    own_score: f64,
    traits: &Traits,
    criteria_max: f64,
    threshold: f64,
) -> Option<K> {
    if traits.fight < criteria_max / 3.0 {
        return None;
    }
    candidates
        .iter()
        .filter(|c| {
            c.equipment_score > 0.0
                && c.loot_value * own_score * traits.fight / c.equipment_score >= threshold
        })
        .min_by(|a, b| a.equipment_score.total_cmp(&b.equipment_score))
        .map(|c| c.key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn even_traits() -> Traits {
        Traits::uniform(5.0)
    }

    #[test]
    fn test_equipment_score_floor() {
        let traits = even_traits();
        let stats = [1; STAT_COUNT];
        assert_eq!(equipment_score(std::iter::empty(), &stats, &traits), 1.0);

        let sword = [CombatStat::weapon(0, 0, 2.0, 1.5)];
        let score = equipment_score([&sword[..]], &[4, 0, 0, 0, 0], &traits);
        // attack 2 * speed 1.5 * stat 4 = 12, weighted by 5.
        assert_eq!(score, 61.0);
    }

    #[test]
    fn test_outmatched_fast_opponent_yields() {
        let mut traits = even_traits();
        traits.fight = 1.0;
        traits.run = 5.0;
        traits.yield_ = 5.0;
        let choice = choose_fight(10.0, 1.0, 40.0, 4.0, &traits);
        assert_eq!(choice, FightChoice::Yield);
    }

    #[test]
    fn test_outmatched_slow_opponent_runs() {
        let mut traits = even_traits();
        traits.fight = 1.0;
        let choice = choose_fight(10.0, 4.0, 20.0, 1.0, &traits);
        assert_eq!(choice, FightChoice::Run);
    }

    #[test]
    fn test_stronger_agent_fights() {
        let traits = even_traits();
        assert_eq!(choose_fight(40.0, 1.0, 10.0, 1.0, &traits), FightChoice::Fight);
    }

    #[test]
    fn test_select_weakest_qualifying_target() {
        let mut traits = even_traits();
        traits.fight = 9.0;
        let candidates = [
            TargetCandidate { key: 1, loot_value: 100.0, equipment_score: 20.0 },
            TargetCandidate { key: 2, loot_value: 100.0, equipment_score: 5.0 },
            // Worth nothing, never qualifies.
            TargetCandidate { key: 3, loot_value: 0.0, equipment_score: 1.0 },
        ];
        assert_eq!(select_target(&candidates, 2.0, &traits, 9.0, 10.0), Some(2));

        traits.fight = 2.0;
        assert_eq!(select_target(&candidates, 2.0, &traits, 9.0, 10.0), None);
    }
}
