//! CLI commands for the derby engine.
//!
//! Supports API server mode plus one-shot settlement, recovery and
//! inspection commands against the same database.

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::conditions::RaceConditions;
use crate::config::AppConfig;
use crate::engine::{RaceEngine, RacePhase};
use crate::ledger::{CoinLedger, HttpLedger, InMemoryLedger};
use crate::roster;
use crate::schedule::Schedule;
use crate::storage::Repository;
use crate::types::{odds_board, SettledSlotView};

#[derive(Parser)]
#[command(name = "derby")]
#[command(version, about = "Derby engine: race simulation and betting settlement", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },

    /// Settle every elapsed, unsettled race slot
    Tick,

    /// Apply daily fatigue recovery to rested horses
    Recover,

    /// Print the odds board for the current or next race
    Odds,

    /// Dry-run race trials for a slot without touching stored state
    Simulate {
        /// Race date (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Slot index
        #[arg(long, default_value_t = 0)]
        slot: u8,

        /// Number of trials
        #[arg(long, default_value_t = 1000)]
        trials: u32,

        /// Seed for reproducible trials
        #[arg(long)]
        seed: Option<u64>,
    },
}

/// Build the engine from configuration: SQLite store, schedule, and either
/// the HTTP coin ledger or the in-memory development one.
pub fn build_engine(config: &AppConfig) -> anyhow::Result<RaceEngine> {
    let repo = Repository::new(Path::new(&config.storage.db_path))?;
    let schedule = Schedule::from_config(&config.schedule)?;
    let ledger: Arc<dyn CoinLedger> = match &config.ledger.base_url {
        Some(url) => Arc::new(HttpLedger::new(url.clone())),
        None => Arc::new(InMemoryLedger::new(config.ledger.dev_balance)),
    };
    RaceEngine::new(
        repo,
        schedule,
        ledger,
        config.betting.clone(),
        config.ledger.credit_retries,
        config.schedule.lookback_days,
    )
}

/// Run one settlement pass.
pub async fn run_tick() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let engine = build_engine(&config)?;

    let settled = engine.tick().await?;
    if settled.is_empty() {
        eprintln!("No unsettled slots");
        return Ok(());
    }
    let views: Vec<SettledSlotView> = settled.into_iter().map(Into::into).collect();
    println!("{}", serde_json::to_string_pretty(&views)?);
    Ok(())
}

/// Run one daily recovery pass.
pub async fn run_recover() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let engine = build_engine(&config)?;

    let recovered = engine.daily_recovery().await?;
    eprintln!("{} horses recovered", recovered);
    Ok(())
}

/// Print the odds board for the live or next race.
pub async fn run_odds() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let engine = build_engine(&config)?;

    let (slot, odds) = match engine.current_race(Local::now().naive_local()).await? {
        RacePhase::Live { slot, odds, .. } => {
            eprintln!("Live: {} ({} slot {})", slot.name, slot.date, slot.index);
            (slot, odds)
        }
        RacePhase::Upcoming { slot, odds, .. } => {
            eprintln!("Next: {} ({} slot {})", slot.name, slot.date, slot.index);
            (slot, odds)
        }
    };

    let conditions = RaceConditions::for_slot(slot.date, slot.index, slot.start.time());
    eprintln!("Conditions: {}", conditions.encode());

    println!("{:<4} {:<16} {:>7} {:>7}", "id", "horse", "win%", "odds");
    for view in odds_board(&odds) {
        println!(
            "{:<4} {:<16} {:>6.1}% {:>6.1}",
            view.horse_id, view.name, view.win_probability, view.decimal_odds
        );
    }
    Ok(())
}

/// Run repeated dry simulations of a slot and print per-horse win and
/// podium frequencies. Nothing is persisted.
pub async fn run_simulate(
    date: Option<NaiveDate>,
    slot_index: u8,
    trials: u32,
    seed: Option<u64>,
) -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let engine = build_engine(&config)?;

    let date = date.unwrap_or_else(|| Local::now().date_naive());
    let slot = engine
        .schedule()
        .slot(date, slot_index)
        .ok_or_else(|| anyhow::anyhow!("no slot {} on the schedule", slot_index))?;
    let conditions = RaceConditions::for_slot(slot.date, slot.index, slot.start.time());

    let states = engine.horse_states().await?;
    let mut field = Vec::with_capacity(states.len());
    for state in &states {
        field.push((roster::horse(state.horse_id)?, state));
    }

    let mut rng = match seed {
        Some(s) => ChaCha8Rng::seed_from_u64(s),
        None => ChaCha8Rng::from_entropy(),
    };

    let mut wins: HashMap<u8, u32> = HashMap::new();
    let mut podiums: HashMap<u8, u32> = HashMap::new();
    for _ in 0..trials {
        let outcome = crate::simulate::simulate(&field, &conditions, &mut rng);
        for entry in &outcome.entries {
            if entry.position == 1 {
                *wins.entry(entry.horse_id).or_default() += 1;
            }
            if entry.position <= 3 {
                *podiums.entry(entry.horse_id).or_default() += 1;
            }
        }
    }

    eprintln!(
        "{} trials of {} ({} slot {}), conditions {}",
        trials,
        slot.name,
        slot.date,
        slot.index,
        conditions.encode()
    );
    println!("{:<4} {:<16} {:>7} {:>7}", "id", "horse", "win%", "top3%");
    for horse in roster::all_horses() {
        let w = wins.get(&horse.id).copied().unwrap_or(0);
        let p = podiums.get(&horse.id).copied().unwrap_or(0);
        println!(
            "{:<4} {:<16} {:>6.1}% {:>6.1}%",
            horse.id,
            horse.name,
            w as f64 * 100.0 / trials as f64,
            p as f64 * 100.0 / trials as f64,
        );
    }
    Ok(())
}
