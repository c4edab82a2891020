//! Odds calculation from performance state and race conditions.
//!
//! Pure functions only: safe to call concurrently with simulation. The
//! streak/fatigue/confidence modifiers here are shared with the simulator so
//! both see the same signs and magnitudes.

use std::collections::HashMap;

use serde::Serialize;

use crate::conditions::RaceConditions;
use crate::performance::{HorseState, StreakType};
use crate::roster::Horse;

pub const MIN_DECIMAL_ODDS: f64 = 1.1;
pub const MAX_DECIMAL_ODDS: f64 = 50.0;

/// Floor for a horse's probability weight.
const MIN_WEIGHT: f64 = 10.0;

/// Win probability and decimal odds for one horse.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HorseOdds {
    pub win_pct: f64,
    pub decimal_odds: f64,
}

/// Bonus for a winning streak (capped +15) or penalty for a losing one
/// (capped -15).
pub fn streak_modifier(state: &HorseState) -> f64 {
    match state.streak_type {
        StreakType::Winning => (3.0 * state.streak_count as f64).min(15.0),
        StreakType::Losing => -(2.0 * state.streak_count as f64).min(15.0),
        StreakType::None => 0.0,
    }
}

/// Fatigue penalty, always <= 0.
pub fn fatigue_modifier(state: &HorseState) -> f64 {
    -2.0 * state.fatigue_level as f64
}

/// Confidence bonus, in [-8, +8].
pub fn confidence_modifier(state: &HorseState) -> f64 {
    (state.confidence_level as f64 - 50.0) / 5.0
}

/// Probability weight per the odds model. Floored at 10.
pub fn performance_weight(horse: &Horse, state: &HorseState, conditions: &RaceConditions) -> f64 {
    let mut weight = state.current_speed + state.current_stamina + state.current_consistency;
    if conditions.matches_any(horse.preferred_conditions) {
        weight += 10.0;
    }
    weight += streak_modifier(state);
    weight += fatigue_modifier(state);
    weight += confidence_modifier(state);
    weight.max(MIN_WEIGHT)
}

/// Compute win percentage and decimal odds for the whole field.
///
/// # Arguments
/// * `field` - Every horse with its current state
/// * `conditions` - Conditions of the race being priced
pub fn compute_odds(
    field: &[(&Horse, &HorseState)],
    conditions: &RaceConditions,
) -> HashMap<u8, HorseOdds> {
    let weights: Vec<(u8, f64)> = field
        .iter()
        .map(|(horse, state)| (horse.id, performance_weight(horse, state, conditions)))
        .collect();
    let total: f64 = weights.iter().map(|(_, w)| w).sum();

    weights
        .into_iter()
        .map(|(id, weight)| {
            let win_pct = weight / total * 100.0;
            let decimal_odds = (100.0 / win_pct).clamp(MIN_DECIMAL_ODDS, MAX_DECIMAL_ODDS);
            (id, HorseOdds {
                win_pct,
                decimal_odds,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::Condition;
    use crate::performance::StreakType;
    use crate::roster;

    fn conditions() -> RaceConditions {
        RaceConditions {
            tags: vec![Condition::Afternoon, Condition::Dry],
            hour: 14,
        }
    }

    #[test]
    fn test_odds_monotonic_in_weight() {
        // Identical horses except confidence: higher weighted score must
        // give strictly higher win% and strictly lower decimal odds.
        let horse = roster::horse(8).unwrap();
        let mut strong = HorseState::seed_from(horse);
        let mut weak = strong.clone();
        strong.confidence_level = 80;
        weak.confidence_level = 30;
        weak.horse_id = 9;

        let odds = compute_odds(
            &[(horse, &strong), (roster::horse(9).unwrap(), &weak)],
            &conditions(),
        );
        let s = odds[&8];
        let w = odds[&9];
        assert!(s.win_pct > w.win_pct);
        assert!(s.decimal_odds < w.decimal_odds);
    }

    #[test]
    fn test_fatigue_strictly_reduces_weight() {
        let horse = roster::horse(3).unwrap();
        let fresh = HorseState::seed_from(horse);
        let mut tired = fresh.clone();
        tired.fatigue_level = 30;

        let cond = conditions();
        assert!(
            performance_weight(horse, &tired, &cond)
                < performance_weight(horse, &fresh, &cond)
        );
    }

    #[test]
    fn test_streak_bonus_caps() {
        let horse = roster::horse(2).unwrap();
        let mut s = HorseState::seed_from(horse);

        s.streak_type = StreakType::Winning;
        s.streak_count = 2;
        assert_eq!(streak_modifier(&s), 6.0);
        s.streak_count = 10;
        assert_eq!(streak_modifier(&s), 15.0);

        s.streak_type = StreakType::Losing;
        s.streak_count = 3;
        assert_eq!(streak_modifier(&s), -6.0);
        s.streak_count = 20;
        assert_eq!(streak_modifier(&s), -15.0);
    }

    #[test]
    fn test_preferred_conditions_bonus() {
        let cond = conditions();
        // Lucky Charm prefers "any" and always gets the bonus.
        let lucky = roster::horse(10).unwrap();
        let state = HorseState::seed_from(lucky);
        let base = state.current_speed + state.current_stamina + state.current_consistency;
        assert_eq!(performance_weight(lucky, &state, &cond), base + 10.0);
    }

    #[test]
    fn test_win_pcts_sum_to_hundred() {
        let field: Vec<(&Horse, HorseState)> = roster::all_horses()
            .iter()
            .map(|h| (h, HorseState::seed_from(h)))
            .collect();
        let refs: Vec<(&Horse, &HorseState)> = field.iter().map(|(h, s)| (*h, s)).collect();
        let odds = compute_odds(&refs, &conditions());

        let total: f64 = odds.values().map(|o| o.win_pct).sum();
        assert!((total - 100.0).abs() < 1e-9);
        for o in odds.values() {
            assert!(o.decimal_odds >= MIN_DECIMAL_ODDS && o.decimal_odds <= MAX_DECIMAL_ODDS);
        }
    }

    #[test]
    fn test_weight_bounded_below() {
        let horse = roster::horse(5).unwrap();
        let mut s = HorseState::seed_from(horse);
        // Worst case inside the stat bounds: minimum stats, max fatigue,
        // deep losing streak, no preferred-condition match.
        s.current_speed = 40.0;
        s.current_stamina = 40.0;
        s.current_consistency = 60.0;
        s.fatigue_level = 50;
        s.confidence_level = 10;
        s.streak_type = StreakType::Losing;
        s.streak_count = 10;

        let cond = RaceConditions {
            tags: vec![Condition::Night, Condition::Stormy],
            hour: 22,
        };
        // 140 - 15 - 100 - 8, still above the hard floor.
        assert_eq!(performance_weight(horse, &s, &cond), 17.0);

        // The floor itself only engages for out-of-band states.
        s.current_speed = 0.0;
        s.current_stamina = 0.0;
        s.current_consistency = 0.0;
        assert_eq!(performance_weight(horse, &s, &cond), MIN_WEIGHT);
    }
}
