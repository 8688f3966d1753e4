//! Market and window endpoints.

use axum::extract::{Path, State};
use chrono::Utc;

use super::{error, parse_market, revision, success, ApiResult};
use crate::errors::AppError;
use crate::models::{Market, Slot, SlotView, ThreeWindow};
use crate::AppState;

/// GET /api/markets - Supported markets.
pub async fn list_markets(State(state): State<AppState>) -> ApiResult<Vec<Market>> {
    let revision_id = revision(&state).await;
    success(Market::ALL.to_vec(), revision_id)
}

/// GET /api/markets/{market}/window - Stored last/current/next weeks.
pub async fn get_window(
    State(state): State<AppState>,
    Path(market): Path<String>,
) -> ApiResult<ThreeWindow> {
    let revision_id = revision(&state).await;

    let market = match parse_market(&market) {
        Ok(m) => m,
        Err(e) => return error(e, revision_id),
    };

    match state.orchestrator.window(market).await {
        Ok(window) => success(window, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/markets/{market}/window/{slot} - One slot with its freshness.
pub async fn get_slot(
    State(state): State<AppState>,
    Path((market, slot)): Path<(String, String)>,
) -> ApiResult<SlotView> {
    let revision_id = revision(&state).await;

    let market = match parse_market(&market) {
        Ok(m) => m,
        Err(e) => return error(e, revision_id),
    };
    let slot: Slot = match slot.parse() {
        Ok(s) => s,
        Err(msg) => return error(AppError::NotFound(msg), revision_id),
    };

    match state.orchestrator.view(market, slot, Utc::now()).await {
        Ok(view) => success(view, revision_id),
        Err(e) => error(e, revision_id),
    }
}
