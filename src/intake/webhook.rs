//! Webhook HTTP API
//!
//! `POST /webhook` accepts entry/exit signals; `GET /positions` and
//! `GET /status` are read-only views of the tracker.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use super::{dispatch, SignalCommand, SignalOutcome};
use crate::error::TrackerError;
use crate::paper_trading::{PaperTracker, TrackerStats};
use crate::types::Position;

/// Create the router with all endpoints
pub fn create_router(tracker: Arc<PaperTracker>) -> Router {
    Router::new()
        .route("/webhook", post(post_webhook))
        .route("/positions", get(get_positions))
        .route("/status", get(get_status))
        .with_state(tracker)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

// ─────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────

/// POST /webhook - body is parsed as JSON whatever the Content-Type says
async fn post_webhook(
    State(tracker): State<Arc<PaperTracker>>,
    body: Bytes,
) -> impl IntoResponse {
    let command = match SignalCommand::from_body(&body) {
        Ok(command) => command,
        Err(e) => return error_response(e),
    };

    // Ledger writes happen under the tracker lock; keep them off the async workers.
    let outcome = tokio::task::spawn_blocking(move || dispatch(&tracker, command))
        .await
        .unwrap_or_else(|e| Err(TrackerError::TaskFailed(e.to_string())));

    match outcome {
        Ok(SignalOutcome::Opened(outcome)) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "position_id": outcome.id,
                "size": outcome.size,
                "flipped": outcome.flipped.len(),
            })),
        ),
        Ok(SignalOutcome::Closed(trades)) if trades.is_empty() => (
            StatusCode::OK,
            Json(json!({ "status": "no open position" })),
        ),
        Ok(SignalOutcome::Closed(trades)) => {
            let net_pnl: f64 = trades.iter().map(|t| t.net_pnl).sum();
            let ids: Vec<_> = trades.iter().map(|t| t.position_id).collect();
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "closed": ids,
                    "net_pnl": net_pnl,
                })),
            )
        }
        Err(e) => error_response(e),
    }
}

fn error_response(e: TrackerError) -> (StatusCode, Json<serde_json::Value>) {
    match e {
        TrackerError::InvalidSignal(message) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "invalid signal", "message": message })),
        ),
        TrackerError::CapacityExceeded { .. } => (
            StatusCode::OK,
            Json(json!({ "status": "max positions reached" })),
        ),
        other => {
            error!(error = %other, "Webhook request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": other.to_string() })),
            )
        }
    }
}

/// GET /positions - all positions, open and closed
async fn get_positions(State(tracker): State<Arc<PaperTracker>>) -> Json<Vec<Position>> {
    Json(tracker.positions())
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    balance: f64,
    open_positions: usize,
    max_open_positions: usize,
    stats: TrackerStats,
    win_rate: f64,
}

/// GET /status - balance and running stats
async fn get_status(State(tracker): State<Arc<PaperTracker>>) -> Json<StatusResponse> {
    let stats = tracker.get_stats();
    Json(StatusResponse {
        balance: tracker.balance(),
        open_positions: tracker.open_position_count(),
        max_open_positions: tracker.config().effective_max_open(),
        win_rate: stats.win_rate(),
        stats,
    })
}
