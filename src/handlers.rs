use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::ThrottleError;
use crate::metrics::ThrottleMetrics;
use crate::response::{ApiResponse, ClearQueueResponse};
use crate::throttle_config::ConfigUpdate;
use crate::throttler::{ThrottleStatus, Throttler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub throttler: Throttler,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(throttler: Throttler) -> Self {
        Self {
            throttler,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub throttling: ThrottleStatus,
}

/// Current throttler status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::data(state.throttler.status()))
}

pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::data(state.throttler.config()))
}

/// Partially update the throttling configuration
pub async fn update_config(
    State(state): State<AppState>,
    Json(update): Json<ConfigUpdate>,
) -> Result<impl IntoResponse, ThrottleError> {
    update.check()?;

    let config = state.throttler.update_config(update)?;

    Ok(Json(ApiResponse::with_message(
        "Throttling configuration updated",
        config,
    )))
}

/// Reject every queued transaction
pub async fn clear_queue(State(state): State<AppState>) -> impl IntoResponse {
    let cleared_count = state.throttler.clear_queue();

    Json(ApiResponse::with_message(
        format!("Cleared {} transactions from queue", cleared_count),
        ClearQueueResponse { cleared_count },
    ))
}

pub async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::data(ThrottleMetrics::from_status(
        state.throttler.status(),
    )))
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let status = if state.throttler.is_stopped() {
        "stopped"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        throttling: state.throttler.status(),
    })
}
