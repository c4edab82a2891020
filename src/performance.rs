//! Mutable per-horse performance state and the race-outcome update rules.
//!
//! `apply_race_outcome` is the only mutator on the race path; `recover_daily`
//! runs on its own daily trigger, independent of settlement.

use chrono::NaiveDate;
use rand::Rng;
use serde::Serialize;

use crate::roster::Horse;

pub const SPEED_MIN: f64 = 40.0;
pub const SPEED_MAX: f64 = 100.0;
pub const STAMINA_MIN: f64 = 40.0;
pub const STAMINA_MAX: f64 = 100.0;
pub const CONSISTENCY_MIN: f64 = 60.0;
pub const CONSISTENCY_MAX: f64 = 100.0;
pub const FATIGUE_MAX: i32 = 50;
pub const CONFIDENCE_MIN: i32 = 10;
pub const CONFIDENCE_MAX: i32 = 90;

/// Daily fatigue recovery for a rested horse.
const FATIGUE_RECOVERY: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakType {
    Winning,
    Losing,
    None,
}

impl StreakType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreakType::Winning => "winning",
            StreakType::Losing => "losing",
            StreakType::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<StreakType> {
        match s {
            "winning" => Some(StreakType::Winning),
            "losing" => Some(StreakType::Losing),
            "none" => Some(StreakType::None),
            _ => None,
        }
    }
}

/// Mutable performance state, one row per horse.
#[derive(Debug, Clone, Serialize)]
pub struct HorseState {
    pub horse_id: u8,
    pub current_speed: f64,
    pub current_stamina: f64,
    pub current_consistency: f64,
    pub total_races: u32,
    pub total_wins: u32,
    pub total_places: u32,
    pub total_shows: u32,
    pub streak_type: StreakType,
    pub streak_count: u32,
    pub fatigue_level: i32,
    pub confidence_level: i32,
    pub last_race_date: Option<NaiveDate>,
}

impl HorseState {
    /// Initial state from a horse's immutable base attributes.
    pub fn seed_from(horse: &Horse) -> Self {
        Self {
            horse_id: horse.id,
            current_speed: horse.base_speed.clamp(SPEED_MIN, SPEED_MAX),
            current_stamina: horse.base_stamina.clamp(STAMINA_MIN, STAMINA_MAX),
            current_consistency: horse
                .base_consistency
                .clamp(CONSISTENCY_MIN, CONSISTENCY_MAX),
            total_races: 0,
            total_wins: 0,
            total_places: 0,
            total_shows: 0,
            streak_type: StreakType::None,
            streak_count: 0,
            fatigue_level: 0,
            confidence_level: 50,
            last_race_date: None,
        }
    }

    /// Apply a settled race outcome. `position` is 1-based.
    ///
    /// Must be called exactly once per horse per settled race; the caller
    /// persists the whole field's updates in one unit of work.
    pub fn apply_race_outcome<R: Rng>(
        &mut self,
        position: usize,
        race_date: NaiveDate,
        rng: &mut R,
    ) {
        self.total_races += 1;
        match position {
            1 => self.total_wins += 1,
            2 => self.total_places += 1,
            3 => self.total_shows += 1,
            _ => {}
        }

        // Streak: top-3 extends/starts winning, otherwise losing. Count
        // resets to 1 whenever the type flips.
        let kind = if position <= 3 {
            StreakType::Winning
        } else {
            StreakType::Losing
        };
        if self.streak_type == kind {
            self.streak_count += 1;
        } else {
            self.streak_type = kind;
            self.streak_count = 1;
        }

        let confidence_delta = match position {
            1 => 8,
            2 | 3 => 3,
            4..=6 => -1,
            _ => -5,
        };
        self.confidence_level =
            (self.confidence_level + confidence_delta).clamp(CONFIDENCE_MIN, CONFIDENCE_MAX);

        self.fatigue_level = (self.fatigue_level + rng.gen_range(3..=8)).min(FATIGUE_MAX);

        // Slow long-run specialization: each stat drifts toward what the
        // horse actually delivers.
        self.current_speed =
            (self.current_speed + drift(position <= 3)).clamp(SPEED_MIN, SPEED_MAX);
        self.current_stamina =
            (self.current_stamina + drift(position <= 5)).clamp(STAMINA_MIN, STAMINA_MAX);
        self.current_consistency = (self.current_consistency + drift(position <= 4))
            .clamp(CONSISTENCY_MIN, CONSISTENCY_MAX);

        self.last_race_date = Some(race_date);
    }

    /// Daily fatigue recovery: -5 (floored at 0) for a horse that has not
    /// raced since the prior day. Returns whether anything changed.
    pub fn recover_daily(&mut self, today: NaiveDate) -> bool {
        let rested = self.last_race_date.map_or(true, |d| d < today);
        if rested && self.fatigue_level > 0 {
            self.fatigue_level = (self.fatigue_level - FATIGUE_RECOVERY).max(0);
            true
        } else {
            false
        }
    }
}

fn drift(within_threshold: bool) -> f64 {
    if within_threshold {
        1.0
    } else {
        -1.0
    }
}
