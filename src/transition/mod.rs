//! Forward rotation of the last/current/next window.
//!
//! A rotation archives the outgoing `last` week, shifts `current` into `last`
//! and `next` into `current`, and opens a placeholder `next`. The new window is
//! computed in full before anything is written, and the write is a single
//! transaction, so a failure leaves the stored window as it was.
//!
//! Callers serialize rotations per market (see `pipeline::MarketLocks`).

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::calendar;
use crate::db::WindowStore;
use crate::errors::AppError;
use crate::models::{Market, ThreeWindow, WeekDataset, WeekIdentifier};

/// What a completed rotation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationResult {
    /// Outgoing `last` week, when it held data.
    pub archived_id: Option<WeekIdentifier>,
    /// False when that week was already archived by an earlier run.
    pub archive_written: bool,
    pub new_current_id: WeekIdentifier,
    pub new_next_id: WeekIdentifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// Stored `current` already is the target week (or later).
    AlreadyCurrent,
    /// Some slot is missing; the window must be initialized first.
    NotInitialized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum RotationOutcome {
    Rotated(RotationResult),
    Skipped { reason: SkipReason },
}

/// Window contents after one rotation step.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationPlan {
    pub outgoing: Option<WeekDataset>,
    pub window: ThreeWindow,
}

/// Compute one rotation step towards `target` without touching storage.
pub fn plan_rotation(
    window: &ThreeWindow,
    target: WeekIdentifier,
) -> Result<RotationPlan, SkipReason> {
    let (Some(last), Some(current), Some(next)) = (&window.last, &window.current, &window.next)
    else {
        return Err(SkipReason::NotInitialized);
    };
    if current.id >= target {
        return Err(SkipReason::AlreadyCurrent);
    }

    let new_next = WeekDataset::placeholder(next.market, next.id.succ());
    Ok(RotationPlan {
        outgoing: last.is_populated().then(|| last.clone()),
        window: ThreeWindow {
            last: Some(current.clone()),
            current: Some(next.clone()),
            next: Some(new_next),
        },
    })
}

/// True on a boundary day when `current` is not this week.
pub fn needs_rotation(window: &ThreeWindow, now: DateTime<Utc>) -> bool {
    calendar::is_window_boundary(now)
        && window
            .current
            .as_ref()
            .is_some_and(|current| current.id != calendar::week_identifier(now))
}

/// True when `current` is older than the week of `now`, on any day.
pub fn is_behind(window: &ThreeWindow, now: DateTime<Utc>) -> bool {
    window
        .current
        .as_ref()
        .is_some_and(|current| current.id < calendar::week_identifier(now))
}

#[derive(Clone)]
pub struct TransitionEngine {
    store: WindowStore,
}

impl TransitionEngine {
    pub fn new(store: WindowStore) -> Self {
        Self { store }
    }

    /// Perform one rotation step, or report why none was needed.
    pub async fn rotate(
        &self,
        market: Market,
        now: DateTime<Utc>,
    ) -> Result<RotationOutcome, AppError> {
        let target = calendar::week_identifier(now);
        let window = self.store.load(market).await?;

        let plan = match plan_rotation(&window, target) {
            Ok(plan) => plan,
            Err(reason) => {
                tracing::debug!(market = %market, target = %target, ?reason, "Rotation skipped");
                return Ok(RotationOutcome::Skipped { reason });
            }
        };

        let archive_written = self
            .store
            .commit_rotation(market, plan.outgoing.as_ref(), &plan.window)
            .await?;

        let result = RotationResult {
            archived_id: plan.outgoing.as_ref().map(|d| d.id),
            archive_written,
            new_current_id: plan.window.current.as_ref().map(|d| d.id).unwrap_or(target),
            new_next_id: plan.window.next.as_ref().map(|d| d.id).unwrap_or(target.succ()),
        };

        tracing::info!(
            market = %market,
            archived = ?result.archived_id.map(|id| id.to_string()),
            archive_written,
            current = %result.new_current_id,
            next = %result.new_next_id,
            "Rotated release window"
        );
        Ok(RotationOutcome::Rotated(result))
    }
}
