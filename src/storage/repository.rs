//! SQLite repository for horse state, race results and wagers.
//!
//! Settlement goes through `commit_settlement`, a single transaction whose
//! first statement claims the slot by inserting the result row. Everything
//! else in the slot (entries, state updates, wager outcomes) commits with
//! that claim or not at all.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use std::path::Path;

use super::schema::create_tables;
use crate::performance::{HorseState, StreakType};
use crate::settlement::{BetType, WagerStatus};
use crate::simulate::RaceEntry;

/// A stored wager row.
#[derive(Debug, Clone)]
pub struct StoredWager {
    pub id: i64,
    pub user_id: String,
    pub race_date: NaiveDate,
    pub slot_index: u8,
    pub bet_type: BetType,
    pub selection: Vec<u8>,
    pub stake: i64,
    pub potential_payout: i64,
    pub status: WagerStatus,
    pub paid_out: Option<i64>,
    pub created_at: String,
}

/// A stored race result with its finish lines.
#[derive(Debug, Clone)]
pub struct StoredResult {
    pub race_date: NaiveDate,
    pub slot_index: u8,
    pub slot_name: String,
    pub conditions: String,
    pub settled_at: String,
    pub entries: Vec<RaceEntry>,
}

/// Outcome to durably apply to one wager during settlement.
#[derive(Debug, Clone)]
pub struct WagerResolution {
    pub wager_id: i64,
    pub user_id: String,
    pub status: WagerStatus,
    /// Coins owed; equals the recorded potential payout for won wagers.
    pub payout: i64,
}

/// Repository over a single SQLite connection.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    /// Open (and initialize if needed) the database at `db_path`.
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(db_path).context("Failed to open database")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        create_tables(&conn)?;

        Ok(Self { conn })
    }

    /// Create an in-memory repository (for testing)
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        create_tables(&conn)?;
        Ok(Self { conn })
    }

    // ==================== Horse State ====================

    /// Seed one state row per horse. Existing rows are left untouched.
    pub fn seed_roster(&self, states: &[HorseState]) -> Result<()> {
        for state in states {
            self.conn.execute(
                r#"
                INSERT OR IGNORE INTO horse_states
                (horse_id, current_speed, current_stamina, current_consistency,
                 total_races, total_wins, total_places, total_shows,
                 streak_type, streak_count, fatigue_level, confidence_level,
                 last_race_date)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
                params![
                    state.horse_id,
                    state.current_speed,
                    state.current_stamina,
                    state.current_consistency,
                    state.total_races,
                    state.total_wins,
                    state.total_places,
                    state.total_shows,
                    state.streak_type.as_str(),
                    state.streak_count,
                    state.fatigue_level,
                    state.confidence_level,
                    state.last_race_date.map(|d| d.to_string()),
                ],
            )?;
        }
        Ok(())
    }

    /// Get one horse's state.
    pub fn get_state(&self, horse_id: u8) -> Result<Option<HorseState>> {
        let mut stmt = self.conn.prepare(
            "SELECT horse_id, current_speed, current_stamina, current_consistency,
                    total_races, total_wins, total_places, total_shows,
                    streak_type, streak_count, fatigue_level, confidence_level,
                    last_race_date
             FROM horse_states WHERE horse_id = ?1",
        )?;
        let mut rows = stmt.query_map([horse_id], map_state)?;
        rows.next().transpose().map_err(Into::into)
    }

    /// All horse states in id order.
    pub fn all_states(&self) -> Result<Vec<HorseState>> {
        let mut stmt = self.conn.prepare(
            "SELECT horse_id, current_speed, current_stamina, current_consistency,
                    total_races, total_wins, total_places, total_shows,
                    streak_type, streak_count, fatigue_level, confidence_level,
                    last_race_date
             FROM horse_states ORDER BY horse_id",
        )?;
        let states = stmt
            .query_map([], map_state)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(states)
    }

    /// Persist a batch of states in one transaction (daily recovery path).
    pub fn save_states(&mut self, states: &[HorseState]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for state in states {
            update_state(&tx, state)?;
        }
        tx.commit()?;
        Ok(())
    }

    // ==================== Race Results ====================

    /// Whether a slot has been settled.
    pub fn result_exists(&self, date: NaiveDate, slot_index: u8) -> Result<bool> {
        let count: i32 = self.conn.query_row(
            "SELECT COUNT(*) FROM race_results WHERE race_date = ?1 AND slot_index = ?2",
            params![date.to_string(), slot_index],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Get a settled result with its finish lines.
    pub fn get_result(&self, date: NaiveDate, slot_index: u8) -> Result<Option<StoredResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT race_date, slot_index, slot_name, conditions, settled_at
             FROM race_results WHERE race_date = ?1 AND slot_index = ?2",
        )?;
        let mut rows = stmt.query_map(params![date.to_string(), slot_index], map_result_row)?;
        let Some(mut result) = rows.next().transpose()? else {
            return Ok(None);
        };
        result.entries = self.result_entries(date, slot_index)?;
        Ok(Some(result))
    }

    /// All settled results on a date, by slot index.
    pub fn results_on(&self, date: NaiveDate) -> Result<Vec<StoredResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT race_date, slot_index, slot_name, conditions, settled_at
             FROM race_results WHERE race_date = ?1 ORDER BY slot_index",
        )?;
        let mut results = stmt
            .query_map([date.to_string()], map_result_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for result in &mut results {
            result.entries = self.result_entries(date, result.slot_index)?;
        }
        Ok(results)
    }

    fn result_entries(&self, date: NaiveDate, slot_index: u8) -> Result<Vec<RaceEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT horse_id, position, finish_time, performance_score
             FROM race_entries WHERE race_date = ?1 AND slot_index = ?2
             ORDER BY position",
        )?;
        let entries = stmt
            .query_map(params![date.to_string(), slot_index], |row| {
                Ok(RaceEntry {
                    horse_id: row.get(0)?,
                    position: row.get(1)?,
                    finish_time: row.get(2)?,
                    performance_score: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // ==================== Wagers ====================

    /// Insert a wager. Returns `None` when the user already has a wager for
    /// this slot (unique constraint).
    pub fn insert_wager(
        &self,
        user_id: &str,
        date: NaiveDate,
        slot_index: u8,
        bet_type: BetType,
        selection: &str,
        stake: i64,
        potential_payout: i64,
    ) -> Result<Option<i64>> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO wagers
            (user_id, race_date, slot_index, bet_type, selection, stake,
             potential_payout, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending')
            "#,
            params![
                user_id,
                date.to_string(),
                slot_index,
                bet_type.as_str(),
                selection,
                stake,
                potential_payout,
            ],
        )?;
        if inserted == 0 {
            return Ok(None);
        }
        Ok(Some(self.conn.last_insert_rowid()))
    }

    /// Whether a user already has a wager on a slot.
    pub fn has_wager(&self, user_id: &str, date: NaiveDate, slot_index: u8) -> Result<bool> {
        let count: i32 = self.conn.query_row(
            "SELECT COUNT(*) FROM wagers
             WHERE user_id = ?1 AND race_date = ?2 AND slot_index = ?3",
            params![user_id, date.to_string(), slot_index],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// All pending wagers for a slot.
    pub fn pending_wagers(&self, date: NaiveDate, slot_index: u8) -> Result<Vec<StoredWager>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, race_date, slot_index, bet_type, selection,
                    stake, potential_payout, status, paid_out, created_at
             FROM wagers
             WHERE race_date = ?1 AND slot_index = ?2 AND status = 'pending'
             ORDER BY id",
        )?;
        let wagers = stmt
            .query_map(params![date.to_string(), slot_index], map_wager)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(wagers)
    }

    /// A user's wagers, most recent first.
    pub fn wagers_for_user(&self, user_id: &str) -> Result<Vec<StoredWager>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, race_date, slot_index, bet_type, selection,
                    stake, potential_payout, status, paid_out, created_at
             FROM wagers WHERE user_id = ?1
             ORDER BY race_date DESC, slot_index DESC, id DESC",
        )?;
        let wagers = stmt
            .query_map([user_id], map_wager)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(wagers)
    }

    /// Won wagers whose payout credit has not been confirmed yet
    /// (reconciliation view).
    pub fn unpaid_won_wagers(&self) -> Result<Vec<StoredWager>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, race_date, slot_index, bet_type, selection,
                    stake, potential_payout, status, paid_out, created_at
             FROM wagers WHERE status = 'won' AND paid_out IS NULL
             ORDER BY id",
        )?;
        let wagers = stmt
            .query_map([], map_wager)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(wagers)
    }

    /// Record a confirmed ledger credit for a won wager.
    pub fn mark_paid(&self, wager_id: i64, amount: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE wagers SET paid_out = ?2 WHERE id = ?1 AND status = 'won'",
            params![wager_id, amount],
        )?;
        Ok(())
    }

    /// Earliest race date that still has a pending wager, if any.
    pub fn oldest_pending_wager_date(&self) -> Result<Option<NaiveDate>> {
        let min: Option<String> = self.conn.query_row(
            "SELECT MIN(race_date) FROM wagers WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(min.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()))
    }

    // ==================== Run bookkeeping ====================

    /// The date the daily recovery pass last ran, if ever.
    pub fn last_recovery_date(&self) -> Result<Option<NaiveDate>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM engine_meta WHERE key = 'last_recovery_date'")?;
        let mut rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        match rows.next().transpose()? {
            Some(s) => Ok(NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
            None => Ok(None),
        }
    }

    /// Record the date the daily recovery pass ran.
    pub fn set_last_recovery_date(&self, date: NaiveDate) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO engine_meta (key, value) VALUES ('last_recovery_date', ?1)",
            params![date.to_string()],
        )?;
        Ok(())
    }

    // ==================== Settlement ====================

    /// Atomically settle a slot: claim it by inserting the result row, then
    /// persist finish lines, updated horse states and wager outcomes.
    ///
    /// Returns `false` without any mutation when the slot was already
    /// claimed by another invocation.
    pub fn commit_settlement(
        &mut self,
        date: NaiveDate,
        slot_index: u8,
        slot_name: &str,
        conditions: &str,
        entries: &[RaceEntry],
        states: &[HorseState],
        resolutions: &[WagerResolution],
    ) -> Result<bool> {
        let tx = self.conn.transaction()?;

        // The claim: primary key on (race_date, slot_index).
        let claimed = tx.execute(
            "INSERT OR IGNORE INTO race_results (race_date, slot_index, slot_name, conditions)
             VALUES (?1, ?2, ?3, ?4)",
            params![date.to_string(), slot_index, slot_name, conditions],
        )?;
        if claimed == 0 {
            // Already settled elsewhere; roll back and report the no-op.
            return Ok(false);
        }

        for entry in entries {
            tx.execute(
                "INSERT INTO race_entries
                 (race_date, slot_index, horse_id, position, finish_time, performance_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    date.to_string(),
                    slot_index,
                    entry.horse_id,
                    entry.position,
                    entry.finish_time,
                    entry.performance_score,
                ],
            )?;
        }

        for state in states {
            update_state(&tx, state)?;
        }

        for resolution in resolutions {
            // The status guard keeps re-settlement from flipping outcomes.
            tx.execute(
                "UPDATE wagers SET status = ?2, paid_out = ?3
                 WHERE id = ?1 AND status = 'pending'",
                params![
                    resolution.wager_id,
                    resolution.status.as_str(),
                    // Lost wagers settle at zero immediately; won wagers get
                    // paid_out once the ledger credit is confirmed.
                    if resolution.status == WagerStatus::Lost {
                        Some(0i64)
                    } else {
                        None
                    },
                ],
            )?;
        }

        tx.commit()?;
        Ok(true)
    }
}

fn update_state(conn: &Connection, state: &HorseState) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        UPDATE horse_states SET
            current_speed = ?2, current_stamina = ?3, current_consistency = ?4,
            total_races = ?5, total_wins = ?6, total_places = ?7, total_shows = ?8,
            streak_type = ?9, streak_count = ?10, fatigue_level = ?11,
            confidence_level = ?12, last_race_date = ?13
        WHERE horse_id = ?1
        "#,
        params![
            state.horse_id,
            state.current_speed,
            state.current_stamina,
            state.current_consistency,
            state.total_races,
            state.total_wins,
            state.total_places,
            state.total_shows,
            state.streak_type.as_str(),
            state.streak_count,
            state.fatigue_level,
            state.confidence_level,
            state.last_race_date.map(|d| d.to_string()),
        ],
    )?;
    Ok(())
}

fn map_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<HorseState> {
    let streak: String = row.get(8)?;
    let last_race: Option<String> = row.get(12)?;
    Ok(HorseState {
        horse_id: row.get(0)?,
        current_speed: row.get(1)?,
        current_stamina: row.get(2)?,
        current_consistency: row.get(3)?,
        total_races: row.get(4)?,
        total_wins: row.get(5)?,
        total_places: row.get(6)?,
        total_shows: row.get(7)?,
        streak_type: StreakType::parse(&streak).unwrap_or(StreakType::None),
        streak_count: row.get(9)?,
        fatigue_level: row.get(10)?,
        confidence_level: row.get(11)?,
        last_race_date: last_race.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
    })
}

fn map_result_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredResult> {
    let date_str: String = row.get(0)?;
    Ok(StoredResult {
        race_date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
            .unwrap_or_else(|_| NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()),
        slot_index: row.get(1)?,
        slot_name: row.get(2)?,
        conditions: row.get(3)?,
        settled_at: row.get(4)?,
        entries: Vec::new(),
    })
}

fn map_wager(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredWager> {
    let date_str: String = row.get(2)?;
    let bet_type: String = row.get(4)?;
    let selection: String = row.get(5)?;
    let status: String = row.get(8)?;
    Ok(StoredWager {
        id: row.get(0)?,
        user_id: row.get(1)?,
        race_date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
            .unwrap_or_else(|_| NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()),
        slot_index: row.get(3)?,
        bet_type: BetType::parse(&bet_type).unwrap_or(BetType::Win),
        selection: crate::settlement::decode_selection(&selection).unwrap_or_default(),
        stake: row.get(6)?,
        potential_payout: row.get(7)?,
        status: WagerStatus::parse(&status).unwrap_or(WagerStatus::Pending),
        paid_out: row.get(9)?,
        created_at: row.get(10)?,
    })
}
