//! API route handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use std::sync::Arc;

use crate::conditions::RaceConditions;
use crate::engine::{RaceEngine, RacePhase};
use crate::error::EngineError;
use crate::schedule::RaceSlot;
use crate::settlement::BetType;
use crate::types::{
    odds_board, CurrentRaceResponse, ErrorResponse, HealthResponse, PlaceBetRequest,
    RaceResultResponse, RecoveryResponse, TickResponse, WagerView,
};

/// Application state shared across handlers.
pub struct AppState {
    pub engine: Arc<RaceEngine>,
}

/// Error type for API handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            EngineError::Ledger(_) => StatusCode::BAD_GATEWAY,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::internal(format!("{:#}", e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.status.to_string(),
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Current race endpoint: the live race or the next scheduled one, with
/// the odds board.
pub async fn current_race(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CurrentRaceResponse>, ApiError> {
    let now = Local::now().naive_local();
    let phase = state.engine.current_race(now).await?;

    let response = match phase {
        RacePhase::Live {
            slot,
            remaining_secs,
            odds,
        } => CurrentRaceResponse {
            phase: "live".to_string(),
            conditions: slot_conditions(&slot),
            race_date: slot.date,
            slot_index: slot.index,
            slot_name: slot.name,
            starts_at: slot.start.to_string(),
            seconds_until_start: None,
            seconds_remaining: Some(remaining_secs),
            odds: odds_board(&odds),
        },
        RacePhase::Upcoming {
            slot,
            starts_in_secs,
            odds,
        } => CurrentRaceResponse {
            phase: "upcoming".to_string(),
            conditions: slot_conditions(&slot),
            race_date: slot.date,
            slot_index: slot.index,
            slot_name: slot.name,
            starts_at: slot.start.to_string(),
            seconds_until_start: Some(starts_in_secs),
            seconds_remaining: None,
            odds: odds_board(&odds),
        },
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    pub date: NaiveDate,
    pub slot: Option<u8>,
}

/// Settled results endpoint.
pub async fn race_results(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<Vec<RaceResultResponse>>, ApiError> {
    let results = state.engine.results(query.date, query.slot).await?;
    Ok(Json(results.into_iter().map(Into::into).collect()))
}

/// Wager history endpoint.
pub async fn user_wagers(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<WagerView>>, ApiError> {
    let wagers = state.engine.wager_history(&user_id).await?;
    Ok(Json(wagers.into_iter().map(Into::into).collect()))
}

/// Bet placement endpoint.
pub async fn place_bet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlaceBetRequest>,
) -> Result<(StatusCode, Json<WagerView>), ApiError> {
    let bet_type = BetType::parse(&req.bet_type)
        .ok_or_else(|| ApiError::from(EngineError::validation(format!(
            "unknown bet type: {}",
            req.bet_type
        ))))?;

    let wager = state
        .engine
        .place_bet(
            &req.user_id,
            req.race_date,
            req.slot_index,
            bet_type,
            &req.selection,
            req.stake,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(wager.into())))
}

/// Manual settlement tick endpoint.
pub async fn run_tick(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TickResponse>, ApiError> {
    let settled = state.engine.tick().await?;
    Ok(Json(TickResponse {
        settled: settled.into_iter().map(Into::into).collect(),
    }))
}

/// Manual daily recovery endpoint.
pub async fn run_recovery(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RecoveryResponse>, ApiError> {
    let horses_recovered = state.engine.daily_recovery().await?;
    Ok(Json(RecoveryResponse { horses_recovered }))
}

fn slot_conditions(slot: &RaceSlot) -> Vec<String> {
    RaceConditions::for_slot(slot.date, slot.index, slot.start.time())
        .tags
        .iter()
        .map(|c| c.as_str().to_string())
        .collect()
}
