//! SQLite schema for the racing engine
//!
//! Tables:
//! - horse_states: Mutable performance state, one row per horse
//! - race_results: One row per settled slot; the primary key on
//!   (race_date, slot_index) is the atomic settlement claim
//! - race_entries: Per-horse finish lines for a settled slot
//! - wagers: Stored bets; unique per (user_id, race_date, slot_index)
//! - engine_meta: Key/value row store for run bookkeeping (last recovery
//!   date), so the once-per-day invariants survive restarts

use rusqlite::{Connection, Result};

/// Create all tables in the database
pub fn create_tables(conn: &Connection) -> Result<()> {
    // Mutable per-horse performance state
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS horse_states (
            horse_id INTEGER PRIMARY KEY,
            current_speed REAL NOT NULL,
            current_stamina REAL NOT NULL,
            current_consistency REAL NOT NULL,
            total_races INTEGER NOT NULL DEFAULT 0,
            total_wins INTEGER NOT NULL DEFAULT 0,
            total_places INTEGER NOT NULL DEFAULT 0,
            total_shows INTEGER NOT NULL DEFAULT 0,
            streak_type TEXT NOT NULL DEFAULT 'none',
            streak_count INTEGER NOT NULL DEFAULT 0,
            fatigue_level INTEGER NOT NULL DEFAULT 0,
            confidence_level INTEGER NOT NULL DEFAULT 50,
            last_race_date TEXT
        )
        "#,
        [],
    )?;

    // Settled races. Inserting this row claims the slot: the composite
    // primary key makes a second concurrent settlement a constraint no-op.
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS race_results (
            race_date TEXT NOT NULL,
            slot_index INTEGER NOT NULL,
            slot_name TEXT NOT NULL,
            conditions TEXT NOT NULL,
            settled_at TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (race_date, slot_index)
        )
        "#,
        [],
    )?;

    // Per-horse finish lines
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS race_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            race_date TEXT NOT NULL,
            slot_index INTEGER NOT NULL,
            horse_id INTEGER NOT NULL REFERENCES horse_states(horse_id),
            position INTEGER NOT NULL,
            finish_time REAL NOT NULL,
            performance_score REAL NOT NULL,
            UNIQUE(race_date, slot_index, horse_id)
        )
        "#,
        [],
    )?;

    // Stored bets
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS wagers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            race_date TEXT NOT NULL,
            slot_index INTEGER NOT NULL,
            bet_type TEXT NOT NULL,
            selection TEXT NOT NULL,
            stake INTEGER NOT NULL,
            potential_payout INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            paid_out INTEGER,
            created_at TEXT DEFAULT (datetime('now')),
            UNIQUE(user_id, race_date, slot_index)
        )
        "#,
        [],
    )?;

    // Run bookkeeping
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS engine_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
        [],
    )?;

    // Create indexes for common queries
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entries_slot ON race_entries(race_date, slot_index)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_wagers_user ON wagers(user_id, race_date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_wagers_slot ON wagers(race_date, slot_index)",
        [],
    )?;

    Ok(())
}
