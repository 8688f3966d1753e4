//! Archive endpoints.

use axum::extract::{Path, State};

use super::{error, parse_market, parse_week, revision, success, ApiResult};
use crate::models::{ArchiveEntry, WeekDataset};
use crate::AppState;

/// GET /api/markets/{market}/archive - Archived weeks, newest first.
pub async fn list_archive(
    State(state): State<AppState>,
    Path(market): Path<String>,
) -> ApiResult<Vec<ArchiveEntry>> {
    let revision_id = revision(&state).await;

    let market = match parse_market(&market) {
        Ok(m) => m,
        Err(e) => return error(e, revision_id),
    };

    match state.orchestrator.archive(market).await {
        Ok(entries) => success(entries, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/markets/{market}/archive/{weekId} - One archived week.
pub async fn get_archived_week(
    State(state): State<AppState>,
    Path((market, week_id)): Path<(String, String)>,
) -> ApiResult<WeekDataset> {
    let revision_id = revision(&state).await;

    let (market, week) = match (parse_market(&market), parse_week(&week_id)) {
        (Ok(m), Ok(w)) => (m, w),
        (Err(e), _) | (_, Err(e)) => return error(e, revision_id),
    };

    match state.orchestrator.archived_week(market, week).await {
        Ok(dataset) => success(dataset, revision_id),
        Err(e) => error(e, revision_id),
    }
}
