//! Derby Engine
//!
//! Persistent-roster horse racing simulation with scheduled races, live
//! odds, and at-most-once betting settlement against an external coin
//! ledger. REST API plus one-shot CLI commands.

mod cli;
mod conditions;
mod config;
mod engine;
mod error;
mod ledger;
mod odds;
mod performance;
mod retry;
mod roster;
mod routes;
mod schedule;
mod settlement;
mod simulate;
mod storage;
mod types;

use axum::{routing::get, routing::post, Router};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::engine::RaceEngine;
use crate::routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port } => run_server(Some(host), Some(port)).await,
        Commands::Tick => cli::run_tick().await,
        Commands::Recover => cli::run_recover().await,
        Commands::Odds => cli::run_odds().await,
        Commands::Simulate {
            date,
            slot,
            trials,
            seed,
        } => cli::run_simulate(date, slot, trials, seed).await,
    }
}

/// Run the API server.
async fn run_server(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "derby=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config = AppConfig::load()?;

    // Override with CLI args
    if let Some(h) = host {
        config.server.host = h;
    }
    if let Some(p) = port {
        config.server.port = p;
    }

    tracing::info!("Configuration loaded");
    tracing::info!("Database: {}", config.storage.db_path);
    match &config.ledger.base_url {
        Some(url) => tracing::info!("Coin ledger: {}", url),
        None => tracing::warn!("No coin ledger configured, using in-memory balances"),
    }

    let engine = Arc::new(cli::build_engine(&config)?);

    // Background settlement tick
    spawn_settlement_loop(engine.clone(), config.schedule.tick_interval_secs);

    // Background daily recovery
    spawn_recovery_loop(engine.clone());

    // Create application state
    let state = Arc::new(AppState {
        engine: engine.clone(),
    });

    // Build router
    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/races/current", get(routes::current_race))
        .route("/races/results", get(routes::race_results))
        .route("/users/:user_id/wagers", get(routes::user_wagers))
        .route("/bets", post(routes::place_bet))
        .route("/admin/tick", post(routes::run_tick))
        .route("/admin/recovery", post(routes::run_recovery))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Start server
    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Settle elapsed slots on a fixed interval. Settlement is claim-guarded,
/// so an overlapping manual tick is harmless.
fn spawn_settlement_loop(engine: Arc<RaceEngine>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;
            match engine.tick().await {
                Ok(settled) if !settled.is_empty() => {
                    tracing::info!("settlement tick: {} slots settled", settled.len());
                }
                Ok(_) => {}
                Err(e) => tracing::error!("settlement tick failed: {:#}", e),
            }
        }
    });
}

/// Poll fatigue recovery. The engine persists the date of its last run, so
/// both this loop and the admin endpoint apply at most one pass per day,
/// across restarts.
fn spawn_recovery_loop(engine: Arc<RaceEngine>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(15 * 60));
        loop {
            interval.tick().await;
            if let Err(e) = engine.daily_recovery().await {
                tracing::error!("daily recovery failed: {:#}", e);
            }
        }
    });
}
