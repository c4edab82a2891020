//! Configuration for the derby engine.

use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "data/derby.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Race schedule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Fixed daily slot start times, "HH:MM", ascending.
    #[serde(default = "default_start_times")]
    pub start_times: Vec<String>,
    /// Nominal slot names, one per start time.
    #[serde(default = "default_slot_names")]
    pub slot_names: Vec<String>,
    /// Race duration in seconds.
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u32,
    /// How many past days the settlement tick scans for unsettled slots.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// Interval of the background settlement tick in serve mode.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

fn default_start_times() -> Vec<String> {
    ["10:00", "12:00", "14:00", "16:00", "18:00", "20:00"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_slot_names() -> Vec<String> {
    [
        "Morning Sprint",
        "Noon Classic",
        "Afternoon Dash",
        "Twilight Stakes",
        "Evening Derby",
        "Night Gallop",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_duration_secs() -> u32 {
    60
}

fn default_lookback_days() -> u32 {
    2
}

fn default_tick_interval_secs() -> u64 {
    30
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            start_times: default_start_times(),
            slot_names: default_slot_names(),
            duration_secs: default_duration_secs(),
            lookback_days: default_lookback_days(),
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

/// Payout multiplier band for one bet type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PayoutBand {
    pub min: f64,
    pub max: f64,
}

/// Betting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BettingConfig {
    /// Per-bet stake cap in coins.
    #[serde(default = "default_max_stake")]
    pub max_stake: i64,
    #[serde(default = "default_win_band")]
    pub win: PayoutBand,
    #[serde(default = "default_place_band")]
    pub place: PayoutBand,
    #[serde(default = "default_show_band")]
    pub show: PayoutBand,
    #[serde(default = "default_exacta_band")]
    pub exacta: PayoutBand,
    #[serde(default = "default_quinella_band")]
    pub quinella: PayoutBand,
    #[serde(default = "default_trifecta_band")]
    pub trifecta: PayoutBand,
    #[serde(default = "default_superfecta_band")]
    pub superfecta: PayoutBand,
}

fn default_max_stake() -> i64 {
    500
}

fn default_win_band() -> PayoutBand {
    PayoutBand { min: 1.1, max: 50.0 }
}

fn default_place_band() -> PayoutBand {
    PayoutBand { min: 1.1, max: 20.0 }
}

fn default_show_band() -> PayoutBand {
    PayoutBand { min: 1.1, max: 10.0 }
}

fn default_exacta_band() -> PayoutBand {
    PayoutBand { min: 5.0, max: 150.0 }
}

fn default_quinella_band() -> PayoutBand {
    PayoutBand { min: 3.0, max: 80.0 }
}

fn default_trifecta_band() -> PayoutBand {
    PayoutBand {
        min: 10.0,
        max: 800.0,
    }
}

fn default_superfecta_band() -> PayoutBand {
    PayoutBand {
        min: 20.0,
        max: 5000.0,
    }
}

impl Default for BettingConfig {
    fn default() -> Self {
        Self {
            max_stake: default_max_stake(),
            win: default_win_band(),
            place: default_place_band(),
            show: default_show_band(),
            exacta: default_exacta_band(),
            quinella: default_quinella_band(),
            trifecta: default_trifecta_band(),
            superfecta: default_superfecta_band(),
        }
    }
}

/// Coin ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Base URL of the external coin ledger. When unset, an in-memory
    /// ledger is used (development only).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Starting balance handed to unknown users by the in-memory ledger.
    #[serde(default = "default_dev_balance")]
    pub dev_balance: i64,
    /// Retry attempts for payout credits.
    #[serde(default = "default_credit_retries")]
    pub credit_retries: u32,
}

fn default_dev_balance() -> i64 {
    1000
}

fn default_credit_retries() -> u32 {
    3
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            dev_balance: default_dev_balance(),
            credit_retries: default_credit_retries(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub betting: BettingConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

impl AppConfig {
    /// Load configuration from environment and config file
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // Add config file if exists
            .add_source(config::File::with_name("config").required(false))
            // Override with environment variables (DERBY_SERVER_PORT, etc.)
            .add_source(
                config::Environment::with_prefix("DERBY")
                    .separator("_")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
