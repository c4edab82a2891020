//! Request and response types for the derby API.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::engine::SettledSlot;
use crate::odds::HorseOdds;
use crate::roster;
use crate::simulate::RaceEntry;
use crate::storage::{StoredResult, StoredWager};

/// Bet placement request.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceBetRequest {
    pub user_id: String,
    pub race_date: NaiveDate,
    pub slot_index: u8,
    /// win, place, show, exacta, quinella, trifecta or superfecta.
    pub bet_type: String,
    /// Horse ids, in predicted order for the ordered bet types.
    pub selection: Vec<u8>,
    pub stake: i64,
}

/// One wager, as stored.
#[derive(Debug, Clone, Serialize)]
pub struct WagerView {
    pub id: i64,
    pub race_date: NaiveDate,
    pub slot_index: u8,
    pub bet_type: String,
    pub selection: Vec<u8>,
    pub stake: i64,
    pub potential_payout: i64,
    pub status: String,
    pub paid_out: Option<i64>,
    pub created_at: String,
}

impl From<StoredWager> for WagerView {
    fn from(w: StoredWager) -> Self {
        Self {
            id: w.id,
            race_date: w.race_date,
            slot_index: w.slot_index,
            bet_type: w.bet_type.as_str().to_string(),
            selection: w.selection,
            stake: w.stake,
            potential_payout: w.potential_payout,
            status: w.status.as_str().to_string(),
            paid_out: w.paid_out,
            created_at: w.created_at,
        }
    }
}

/// One horse's line in the odds board.
#[derive(Debug, Clone, Serialize)]
pub struct HorseOddsView {
    pub horse_id: u8,
    pub name: String,
    pub win_probability: f64,
    pub decimal_odds: f64,
}

/// Board for a full field, in horse-id order.
pub fn odds_board(odds: &HashMap<u8, HorseOdds>) -> Vec<HorseOddsView> {
    let mut board: Vec<HorseOddsView> = odds
        .iter()
        .map(|(&horse_id, o)| HorseOddsView {
            horse_id,
            name: roster::horse(horse_id)
                .map(|h| h.name.to_string())
                .unwrap_or_default(),
            win_probability: o.win_pct,
            decimal_odds: o.decimal_odds,
        })
        .collect();
    board.sort_by_key(|v| v.horse_id);
    board
}

/// The live or next race with its current odds.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentRaceResponse {
    /// "live" or "upcoming".
    pub phase: String,
    pub race_date: NaiveDate,
    pub slot_index: u8,
    pub slot_name: String,
    pub starts_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_until_start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_remaining: Option<i64>,
    pub conditions: Vec<String>,
    pub odds: Vec<HorseOddsView>,
}

/// One finish line in a settled result.
#[derive(Debug, Clone, Serialize)]
pub struct RaceEntryView {
    pub horse_id: u8,
    pub name: String,
    pub position: u32,
    pub finish_time: f64,
    pub performance_score: f64,
}

impl From<&RaceEntry> for RaceEntryView {
    fn from(e: &RaceEntry) -> Self {
        Self {
            horse_id: e.horse_id,
            name: roster::horse(e.horse_id)
                .map(|h| h.name.to_string())
                .unwrap_or_default(),
            position: e.position,
            finish_time: e.finish_time,
            performance_score: e.performance_score,
        }
    }
}

/// A settled race result.
#[derive(Debug, Clone, Serialize)]
pub struct RaceResultResponse {
    pub race_date: NaiveDate,
    pub slot_index: u8,
    pub slot_name: String,
    pub conditions: Vec<String>,
    pub settled_at: String,
    pub entries: Vec<RaceEntryView>,
}

impl From<StoredResult> for RaceResultResponse {
    fn from(r: StoredResult) -> Self {
        let conditions = crate::conditions::RaceConditions::decode(&r.conditions)
            .tags
            .iter()
            .map(|c| c.as_str().to_string())
            .collect();
        Self {
            race_date: r.race_date,
            slot_index: r.slot_index,
            slot_name: r.slot_name,
            conditions,
            settled_at: r.settled_at,
            entries: r.entries.iter().map(RaceEntryView::from).collect(),
        }
    }
}

/// Summary of one slot settled by a tick.
#[derive(Debug, Clone, Serialize)]
pub struct SettledSlotView {
    pub race_date: NaiveDate,
    pub slot_index: u8,
    pub slot_name: String,
    pub finish_order: Vec<u8>,
    pub wagers_settled: usize,
    pub wagers_won: usize,
    pub coins_paid: i64,
}

impl From<SettledSlot> for SettledSlotView {
    fn from(s: SettledSlot) -> Self {
        Self {
            race_date: s.date,
            slot_index: s.slot_index,
            slot_name: s.slot_name,
            finish_order: s.finish_order,
            wagers_settled: s.wagers_settled,
            wagers_won: s.wagers_won,
            coins_paid: s.coins_paid,
        }
    }
}

/// Settlement tick response.
#[derive(Debug, Clone, Serialize)]
pub struct TickResponse {
    pub settled: Vec<SettledSlotView>,
}

/// Daily recovery response.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryResponse {
    pub horses_recovered: u32,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
