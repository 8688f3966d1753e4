//! Maintenance endpoints, guarded by the PSK layer.

use axum::extract::{Path, State};
use chrono::Utc;
use serde::Serialize;

use super::{error, parse_market, parse_week, revision, success, ApiResult};
use crate::db::CacheKey;
use crate::pipeline::RefreshReport;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheCleared {
    pub removed: u64,
}

/// POST /api/markets/{market}/refresh - Rotate and refill one market now.
pub async fn refresh_market(
    State(state): State<AppState>,
    Path(market): Path<String>,
) -> ApiResult<RefreshReport> {
    let revision_id = revision(&state).await;

    let market = match parse_market(&market) {
        Ok(m) => m,
        Err(e) => return error(e, revision_id),
    };

    match state.orchestrator.refresh(market, Utc::now()).await {
        Ok(report) => {
            let new_revision = revision(&state).await;
            success(report, new_revision)
        }
        Err(e) => {
            tracing::error!(market = %market, "Refresh failed: {}", e);
            let new_revision = revision(&state).await;
            error(e, new_revision)
        }
    }
}

/// DELETE /api/cache - Drop every cached provider response.
pub async fn clear_cache(State(state): State<AppState>) -> ApiResult<CacheCleared> {
    let revision_id = revision(&state).await;

    match state.orchestrator.cache().clear_all().await {
        Ok(removed) => success(CacheCleared { removed }, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/markets/{market}/cache/{weekId} - Drop one cached response.
pub async fn clear_cache_entry(
    State(state): State<AppState>,
    Path((market, week_id)): Path<(String, String)>,
) -> ApiResult<CacheCleared> {
    let revision_id = revision(&state).await;

    let key = match (parse_market(&market), parse_week(&week_id)) {
        (Ok(m), Ok(w)) => CacheKey::new(m, w),
        (Err(e), _) | (_, Err(e)) => return error(e, revision_id),
    };

    match state.orchestrator.cache().clear(key).await {
        Ok(existed) => {
            tracing::info!(key = %key, existed, "Cleared cache entry");
            success(
                CacheCleared {
                    removed: u64::from(existed),
                },
                revision_id,
            )
        }
        Err(e) => error(e, revision_id),
    }
}
