//! Static horse registry: ten named entities with immutable base attributes
//! and a personality each.

use serde::Serialize;

use crate::conditions::Condition;
use crate::error::EngineError;

/// Closed set of behavioral profiles. Each personality has one modifier
/// strategy in the simulator, so adding one is a compile-time-checked change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Personality {
    SpeedDemon,
    Consistent,
    ComebackQueen,
    NightOwl,
    Diva,
    WeatherWarrior,
    Explosive,
    Balanced,
    MorningGlory,
    Lucky,
}

/// Immutable horse record, seeded once.
#[derive(Debug, Clone, Serialize)]
pub struct Horse {
    pub id: u8,
    pub name: &'static str,
    pub personality: Personality,
    pub base_speed: f64,
    pub base_stamina: f64,
    pub base_consistency: f64,
    pub preferred_conditions: &'static [Condition],
}

/// The fixed roster. Horse ids are 1..=10.
pub const ROSTER: [Horse; 10] = [
    Horse {
        id: 1,
        name: "Thunderbolt",
        personality: Personality::SpeedDemon,
        base_speed: 88.0,
        base_stamina: 62.0,
        base_consistency: 68.0,
        preferred_conditions: &[Condition::Dry, Condition::Afternoon],
    },
    Horse {
        id: 2,
        name: "Steady Eddie",
        personality: Personality::Consistent,
        base_speed: 72.0,
        base_stamina: 78.0,
        base_consistency: 92.0,
        preferred_conditions: &[Condition::Dry],
    },
    Horse {
        id: 3,
        name: "Phoenix Rising",
        personality: Personality::ComebackQueen,
        base_speed: 75.0,
        base_stamina: 74.0,
        base_consistency: 70.0,
        preferred_conditions: &[Condition::Evening],
    },
    Horse {
        id: 4,
        name: "Midnight Star",
        personality: Personality::NightOwl,
        base_speed: 80.0,
        base_stamina: 70.0,
        base_consistency: 72.0,
        preferred_conditions: &[Condition::Night, Condition::Evening],
    },
    Horse {
        id: 5,
        name: "Prima Donna",
        personality: Personality::Diva,
        base_speed: 86.0,
        base_stamina: 66.0,
        base_consistency: 64.0,
        preferred_conditions: &[Condition::Dry, Condition::Morning],
    },
    Horse {
        id: 6,
        name: "Storm Chaser",
        personality: Personality::WeatherWarrior,
        base_speed: 74.0,
        base_stamina: 82.0,
        base_consistency: 74.0,
        preferred_conditions: &[Condition::Wet, Condition::Stormy],
    },
    Horse {
        id: 7,
        name: "Wildfire",
        personality: Personality::Explosive,
        base_speed: 82.0,
        base_stamina: 68.0,
        base_consistency: 62.0,
        preferred_conditions: &[Condition::Afternoon],
    },
    Horse {
        id: 8,
        name: "Even Keel",
        personality: Personality::Balanced,
        base_speed: 76.0,
        base_stamina: 76.0,
        base_consistency: 80.0,
        preferred_conditions: &[Condition::Morning, Condition::Afternoon],
    },
    Horse {
        id: 9,
        name: "Dawn Runner",
        personality: Personality::MorningGlory,
        base_speed: 78.0,
        base_stamina: 72.0,
        base_consistency: 76.0,
        preferred_conditions: &[Condition::Morning],
    },
    Horse {
        id: 10,
        name: "Lucky Charm",
        personality: Personality::Lucky,
        base_speed: 74.0,
        base_stamina: 74.0,
        base_consistency: 72.0,
        preferred_conditions: &[Condition::Any],
    },
];

/// Look up a horse by id.
pub fn horse(id: u8) -> Result<&'static Horse, EngineError> {
    ROSTER
        .iter()
        .find(|h| h.id == id)
        .ok_or_else(|| EngineError::not_found(format!("horse {}", id)))
}

/// The full roster in id order.
pub fn all_horses() -> &'static [Horse] {
    &ROSTER
}
