//! Race simulation: personality modifiers, performance scores, finish times.
//!
//! Pure over its inputs plus an injected randomness source, so tests can
//! seed a `ChaCha8Rng` and assert exact finish orders.

use rand::Rng;
use serde::Serialize;

use crate::conditions::RaceConditions;
use crate::odds::{confidence_modifier, fatigue_modifier, streak_modifier};
use crate::performance::{HorseState, StreakType};
use crate::roster::{Horse, Personality};

/// Finish-time mapping: time = TIME_BASE - score * TIME_FACTOR + jitter.
/// Higher score, lower time; jitter breaks ties without reordering by much.
const TIME_BASE: f64 = 90.0;
const TIME_FACTOR: f64 = 0.2;
const TIME_JITTER: f64 = 0.05;

/// One horse's line in a finish order.
#[derive(Debug, Clone, Serialize)]
pub struct RaceEntry {
    pub horse_id: u8,
    /// 1-based finish position.
    pub position: u32,
    pub finish_time: f64,
    pub performance_score: f64,
}

/// An unsettled, in-memory race outcome: entries ordered by position.
#[derive(Debug, Clone)]
pub struct RaceOutcome {
    pub entries: Vec<RaceEntry>,
}

impl RaceOutcome {
    /// Horse ids from 1st to last place.
    pub fn finish_order(&self) -> Vec<u8> {
        self.entries.iter().map(|e| e.horse_id).collect()
    }
}

/// Simulate a race over the given field and conditions.
pub fn simulate<R: Rng>(
    field: &[(&Horse, &HorseState)],
    conditions: &RaceConditions,
    rng: &mut R,
) -> RaceOutcome {
    let mut entries: Vec<RaceEntry> = field
        .iter()
        .map(|(horse, state)| {
            let score = performance_score(horse, state, conditions, rng);
            let finish_time =
                TIME_BASE - score * TIME_FACTOR + rng.gen_range(0.0..TIME_JITTER);
            RaceEntry {
                horse_id: horse.id,
                position: 0,
                finish_time,
                performance_score: score,
            }
        })
        .collect();

    entries.sort_by(|a, b| a.finish_time.partial_cmp(&b.finish_time).unwrap());
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.position = i as u32 + 1;
    }

    RaceOutcome { entries }
}

/// Raw performance score: current speed, plus the personality modifier, plus
/// the same streak/fatigue/confidence modifiers the odds model uses.
fn performance_score<R: Rng>(
    horse: &Horse,
    state: &HorseState,
    conditions: &RaceConditions,
    rng: &mut R,
) -> f64 {
    state.current_speed
        + personality_modifier(horse, state, conditions, rng)
        + streak_modifier(state)
        + fatigue_modifier(state)
        + confidence_modifier(state)
}

/// Per-personality modifier: a deterministic rule plus bounded randomness.
fn personality_modifier<R: Rng>(
    horse: &Horse,
    state: &HorseState,
    conditions: &RaceConditions,
    rng: &mut R,
) -> f64 {
    match horse.personality {
        // High-variance noise, skewed positive.
        Personality::SpeedDemon => rng.gen_range(-10.0..=25.0),
        // Low-variance noise.
        Personality::Consistent => rng.gen_range(-3.0..=3.0),
        // Big upside when coming off a losing run, swingy otherwise.
        Personality::ComebackQueen => {
            if state.streak_type == StreakType::Losing && state.streak_count >= 2 {
                rng.gen_range(5.0..=20.0)
            } else {
                rng.gen_range(-15.0..=5.0)
            }
        }
        Personality::NightOwl => {
            let bonus = if conditions.hour >= 18 || conditions.hour < 4 {
                15.0
            } else {
                -8.0
            };
            bonus + rng.gen_range(-5.0..=5.0)
        }
        Personality::MorningGlory => {
            let bonus = if conditions.hour < 12 { 15.0 } else { -8.0 };
            bonus + rng.gen_range(-5.0..=5.0)
        }
        // Only shines when the going is perfect.
        Personality::Diva => {
            let bonus = if conditions.is_adverse() { -10.0 } else { 12.0 };
            bonus + rng.gen_range(-3.0..=3.0)
        }
        Personality::WeatherWarrior => {
            let bonus = if conditions.is_adverse() { 18.0 } else { -3.0 };
            bonus + rng.gen_range(-4.0..=4.0)
        }
        // Very high-variance, symmetric.
        Personality::Explosive => rng.gen_range(-20.0..=20.0),
        Personality::Balanced => rng.gen_range(-5.0..=5.0),
        // Flat 30% chance of a moderate bonus.
        Personality::Lucky => {
            let bonus = if rng.gen_bool(0.3) { 12.0 } else { 0.0 };
            bonus + rng.gen_range(-4.0..=4.0)
        }
    }
}
