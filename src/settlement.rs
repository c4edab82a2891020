//! Wager resolution rules: the seven bet structures, their selection
//! cardinality and order semantics, and the placement-time payout
//! multiplier.
//!
//! All functions here are pure; the engine drives them from the settlement
//! transaction.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::{BettingConfig, PayoutBand};
use crate::error::EngineError;
use crate::odds::HorseOdds;

/// The seven wager structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetType {
    Win,
    Place,
    Show,
    Exacta,
    Quinella,
    Trifecta,
    Superfecta,
}

impl BetType {
    /// Required number of selected horses.
    pub fn cardinality(&self) -> usize {
        match self {
            BetType::Win | BetType::Place | BetType::Show => 1,
            BetType::Exacta | BetType::Quinella => 2,
            BetType::Trifecta => 3,
            BetType::Superfecta => 4,
        }
    }

    /// Whether selection order is significant.
    pub fn ordered(&self) -> bool {
        !matches!(self, BetType::Quinella)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BetType::Win => "win",
            BetType::Place => "place",
            BetType::Show => "show",
            BetType::Exacta => "exacta",
            BetType::Quinella => "quinella",
            BetType::Trifecta => "trifecta",
            BetType::Superfecta => "superfecta",
        }
    }

    pub fn parse(s: &str) -> Option<BetType> {
        match s {
            "win" => Some(BetType::Win),
            "place" => Some(BetType::Place),
            "show" => Some(BetType::Show),
            "exacta" => Some(BetType::Exacta),
            "quinella" => Some(BetType::Quinella),
            "trifecta" => Some(BetType::Trifecta),
            "superfecta" => Some(BetType::Superfecta),
            _ => None,
        }
    }
}

/// Wager lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WagerStatus {
    Pending,
    Won,
    Lost,
}

impl WagerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WagerStatus::Pending => "pending",
            WagerStatus::Won => "won",
            WagerStatus::Lost => "lost",
        }
    }

    pub fn parse(s: &str) -> Option<WagerStatus> {
        match s {
            "pending" => Some(WagerStatus::Pending),
            "won" => Some(WagerStatus::Won),
            "lost" => Some(WagerStatus::Lost),
            _ => None,
        }
    }
}

/// Validate a selection against a bet type: cardinality, distinctness, and
/// roster membership.
pub fn validate_selection(bet_type: BetType, selection: &[u8]) -> Result<(), EngineError> {
    if selection.len() != bet_type.cardinality() {
        return Err(EngineError::validation(format!(
            "{} requires {} horses, got {}",
            bet_type.as_str(),
            bet_type.cardinality(),
            selection.len()
        )));
    }
    let distinct: BTreeSet<u8> = selection.iter().copied().collect();
    if distinct.len() != selection.len() {
        return Err(EngineError::validation("selection repeats a horse"));
    }
    for &id in selection {
        crate::roster::horse(id)?;
    }
    Ok(())
}

/// Decide a wager against a finish order (horse ids from 1st to last).
pub fn selection_wins(bet_type: BetType, selection: &[u8], finish_order: &[u8]) -> bool {
    match bet_type {
        BetType::Win => finish_order.first() == selection.first(),
        BetType::Place => finish_order[..2.min(finish_order.len())].contains(&selection[0]),
        BetType::Show => finish_order[..3.min(finish_order.len())].contains(&selection[0]),
        BetType::Exacta => finish_order.len() >= 2 && selection == &finish_order[..2],
        BetType::Quinella => {
            finish_order.len() >= 2 && {
                let picked: BTreeSet<u8> = selection.iter().copied().collect();
                let top: BTreeSet<u8> = finish_order[..2].iter().copied().collect();
                picked == top
            }
        }
        BetType::Trifecta => finish_order.len() >= 3 && selection == &finish_order[..3],
        BetType::Superfecta => finish_order.len() >= 4 && selection == &finish_order[..4],
    }
}

/// Payout multiplier sampled at placement time from the live odds book.
///
/// Single-horse bets scale the horse's decimal odds; exotic bets multiply
/// the selected horses' odds. Each result is clamped to the configured band
/// for its bet type, so a recorded payout never leaves the promised range.
pub fn payout_multiplier(
    bet_type: BetType,
    selection: &[u8],
    book: &HashMap<u8, HorseOdds>,
    betting: &BettingConfig,
) -> Result<f64, EngineError> {
    let mut odds = Vec::with_capacity(selection.len());
    for id in selection {
        let o = book
            .get(id)
            .ok_or_else(|| EngineError::not_found(format!("odds for horse {}", id)))?;
        odds.push(o.decimal_odds);
    }

    let (raw, band) = match bet_type {
        BetType::Win => (odds[0], betting.win),
        BetType::Place => (odds[0] * 0.45, betting.place),
        BetType::Show => (odds[0] * 0.30, betting.show),
        BetType::Exacta => (odds[0] * odds[1] * 0.6, betting.exacta),
        BetType::Quinella => (odds[0] * odds[1] * 0.35, betting.quinella),
        BetType::Trifecta => (odds[0] * odds[1] * odds[2] * 0.5, betting.trifecta),
        BetType::Superfecta => (odds[0] * odds[1] * odds[2] * odds[3] * 0.4, betting.superfecta),
    };

    Ok(clamp_to_band(raw, band))
}

fn clamp_to_band(raw: f64, band: PayoutBand) -> f64 {
    raw.clamp(band.min, band.max)
}

/// Potential payout in coins, rounded down.
pub fn potential_payout(stake: i64, multiplier: f64) -> i64 {
    (stake as f64 * multiplier).floor() as i64
}

/// Dash-joined selection string for persistence, e.g. "2-5-9".
pub fn encode_selection(selection: &[u8]) -> String {
    selection
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join("-")
}

/// Parse a persisted selection string.
pub fn decode_selection(s: &str) -> Result<Vec<u8>, EngineError> {
    s.split('-')
        .map(|part| {
            part.parse::<u8>()
                .map_err(|_| EngineError::validation(format!("bad selection: {}", s)))
        })
        .collect()
}
