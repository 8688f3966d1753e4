//! Orchestrator keeping each market's window up to date.
//!
//! One call holds the market's lock for its whole duration: initialize if
//! needed, rotate forward, then fill empty or stale slots from the cache or the
//! provider (through the retry policy), degrading to stale data on failure.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::calendar;
use crate::db::{CacheKey, CacheLookup, CacheStore, WindowStore};
use crate::errors::AppError;
use crate::models::{
    ArchiveEntry, CacheEntry, Freshness, Market, Slot, SlotView, ThreeWindow, WeekDataset,
    WeekIdentifier,
};
use crate::provider::{ProviderError, ReleaseProvider};
use crate::retry::{LogObserver, RetryPolicy};
use crate::transition::{self, RotationOutcome, RotationResult, TransitionEngine};

/// One mutex per market; markets proceed independently.
pub struct MarketLocks {
    locks: HashMap<Market, Arc<Mutex<()>>>,
}

impl MarketLocks {
    pub fn new() -> Self {
        Self {
            locks: Market::ALL
                .iter()
                .map(|m| (*m, Arc::new(Mutex::new(()))))
                .collect(),
        }
    }

    pub async fn acquire(&self, market: Market) -> OwnedMutexGuard<()> {
        // Every market is inserted in `new`.
        let lock = self.locks[&market].clone();
        lock.lock_owned().await
    }
}

impl Default for MarketLocks {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-slot result of a refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotStatus {
    pub slot: Slot,
    pub id: WeekIdentifier,
    pub freshness: Freshness,
    pub entries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything one `refresh` call did for a market.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub market: Market,
    pub rotations: Vec<RotationResult>,
    pub slots: Vec<SlotStatus>,
    pub current: SlotView,
}

#[derive(Clone)]
pub struct Orchestrator {
    store: WindowStore,
    cache: CacheStore,
    engine: TransitionEngine,
    provider: Arc<dyn ReleaseProvider>,
    retry: RetryPolicy,
    locks: Arc<MarketLocks>,
}

impl Orchestrator {
    pub fn new(
        store: WindowStore,
        cache: CacheStore,
        provider: Arc<dyn ReleaseProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            engine: TransitionEngine::new(store.clone()),
            store,
            cache,
            provider,
            retry,
            locks: Arc::new(MarketLocks::new()),
        }
    }

    pub fn store(&self) -> &WindowStore {
        &self.store
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Bring `market` up to date as of `now` and return its current week.
    pub async fn ensure_up_to_date(
        &self,
        market: Market,
        now: DateTime<Utc>,
    ) -> Result<SlotView, AppError> {
        self.refresh(market, now).await.map(|report| report.current)
    }

    /// Like [`ensure_up_to_date`](Self::ensure_up_to_date), reporting every step.
    pub async fn refresh(
        &self,
        market: Market,
        now: DateTime<Utc>,
    ) -> Result<RefreshReport, AppError> {
        let _guard = self.locks.acquire(market).await;

        let mut window = self.store.load(market).await?;
        if !window.is_adjacent() {
            window = self.store.initialize(market, now).await?;
        }

        // Checked under the lock: a task that lost the race sees the rotated window.
        let mut rotations = Vec::new();
        if transition::is_behind(&window, now) {
            if let Some(current) = &window.current {
                tracing::info!(
                    market = %market,
                    from = %current.id,
                    weeks = current.id.weeks_until(&calendar::week_identifier(now)),
                    boundary = transition::needs_rotation(&window, now),
                    "Rotating window"
                );
            }
            while let RotationOutcome::Rotated(result) = self.engine.rotate(market, now).await? {
                rotations.push(result);
            }
            window = self.store.load(market).await?;
        }

        let mut slots = Vec::with_capacity(Slot::ALL.len());
        let mut current_view = None;
        for slot in [Slot::Current, Slot::Last, Slot::Next] {
            let Some(dataset) = window.get(slot).cloned() else {
                return Err(AppError::Internal(format!(
                    "Window for {} is missing its {} slot",
                    market, slot
                )));
            };

            let (view, error) = if is_stale(slot, &dataset, now) {
                match self.populate(market, slot, dataset, now).await {
                    Ok(view) => (view, None),
                    Err(failure) if slot == Slot::Current => {
                        return Err(failure.into_app_error(market))
                    }
                    Err(failure) => {
                        tracing::warn!(
                            market = %market,
                            slot = %slot,
                            "Could not refresh slot: {}",
                            failure.error
                        );
                        let freshness = if failure.dataset.is_populated() {
                            Freshness::Stale
                        } else {
                            Freshness::Unavailable
                        };
                        let error = failure.error.to_string();
                        (
                            SlotView {
                                dataset: failure.dataset,
                                freshness,
                            },
                            Some(error),
                        )
                    }
                }
            } else {
                (
                    SlotView {
                        dataset,
                        freshness: Freshness::Fresh,
                    },
                    None,
                )
            };

            slots.push(SlotStatus {
                slot,
                id: view.dataset.id,
                freshness: view.freshness,
                entries: view.dataset.entry_count(),
                error,
            });
            if slot == Slot::Current {
                current_view = Some(view);
            }
        }

        let current = current_view
            .ok_or_else(|| AppError::Internal("Current slot was not evaluated".to_string()))?;
        tracing::info!(
            market = %market,
            week = %current.dataset.id,
            freshness = ?current.freshness,
            entries = current.dataset.entry_count(),
            rotations = rotations.len(),
            "Release window up to date"
        );

        Ok(RefreshReport {
            market,
            rotations,
            slots,
            current,
        })
    }

    /// Stored dataset of one slot.
    pub async fn get(&self, market: Market, slot: Slot) -> Result<WeekDataset, AppError> {
        self.store
            .load(market)
            .await?
            .get(slot)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("No {} week stored for {}", slot, market)))
    }

    /// Stored dataset of one slot with its freshness as of `now`.
    pub async fn view(
        &self,
        market: Market,
        slot: Slot,
        now: DateTime<Utc>,
    ) -> Result<SlotView, AppError> {
        let dataset = self.get(market, slot).await?;
        Ok(SlotView {
            freshness: freshness_of(slot, &dataset, now),
            dataset,
        })
    }

    pub async fn window(&self, market: Market) -> Result<ThreeWindow, AppError> {
        self.store.load(market).await
    }

    pub async fn archive(&self, market: Market) -> Result<Vec<ArchiveEntry>, AppError> {
        self.store.list_archive(market).await
    }

    pub async fn archived_week(
        &self,
        market: Market,
        id: WeekIdentifier,
    ) -> Result<WeekDataset, AppError> {
        self.store
            .read_archive_entry(market, id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Week {} is not archived for {}", id, market))
            })
    }

    /// Fill one slot from the cache or the provider, falling back to stale data.
    async fn populate(
        &self,
        market: Market,
        slot: Slot,
        dataset: WeekDataset,
        now: DateTime<Utc>,
    ) -> Result<SlotView, PopulateFailure> {
        let key = CacheKey::new(market, dataset.id);

        let expired = match self.cache.lookup(key, now).await {
            Ok(CacheLookup::Hit(entry)) => {
                tracing::debug!(
                    key = %key,
                    slot = %slot,
                    stored_at = %entry.stored_at,
                    "Serving slot from cache"
                );
                // The slot carries the fill time; the cache row keeps `stored_at`.
                let refreshed = WeekDataset::populated(market, dataset.id, entry.payload, now);
                self.store_slot(market, slot, &refreshed).await;
                return Ok(SlotView {
                    dataset: refreshed,
                    freshness: Freshness::Fresh,
                });
            }
            Ok(CacheLookup::Expired(entry)) => {
                tracing::debug!(key = %key, expired_at = %entry.expires_at, "Cache entry expired");
                Some(entry)
            }
            Ok(CacheLookup::Miss) => {
                tracing::debug!(key = %key, "Cache miss");
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, "Cache unavailable, fetching directly: {}", e);
                None
            }
        };

        let operation = format!("fetch {}", key);
        let observer = LogObserver {
            operation: &operation,
        };
        let provider = &self.provider;
        let range = &dataset.range;
        let fetched = self
            .retry
            .run(move || provider.fetch_releases(market, range), &observer)
            .await;

        match fetched {
            Ok(payload) => {
                tracing::info!(
                    key = %key,
                    slot = %slot,
                    entries = payload.entry_count(),
                    "Fetched releases"
                );
                if let Err(e) = self.cache.write(key, &payload, now).await {
                    tracing::warn!(key = %key, "Failed to cache provider response: {}", e);
                }
                let refreshed = WeekDataset::populated(market, dataset.id, payload, now);
                self.store_slot(market, slot, &refreshed).await;
                Ok(SlotView {
                    dataset: refreshed,
                    freshness: Freshness::Fresh,
                })
            }
            Err(error) if !error.classify().retryable => Err(PopulateFailure { dataset, error }),
            Err(error) => self.degrade(market, slot, dataset, expired, error).await,
        }
    }

    /// Best available data after retries ran out: what the slot already holds,
    /// else an expired cache entry.
    async fn degrade(
        &self,
        market: Market,
        slot: Slot,
        dataset: WeekDataset,
        expired: Option<CacheEntry>,
        error: ProviderError,
    ) -> Result<SlotView, PopulateFailure> {
        if dataset.is_populated() {
            tracing::warn!(
                market = %market,
                slot = %slot,
                week = %dataset.id,
                "Keeping stale slot after provider failure: {}",
                error
            );
            return Ok(SlotView {
                dataset,
                freshness: Freshness::Stale,
            });
        }

        if let Some(entry) = expired {
            tracing::warn!(
                market = %market,
                slot = %slot,
                week = %dataset.id,
                stored_at = %entry.stored_at,
                "Using expired cache entry after provider failure: {}",
                error
            );
            let stale = WeekDataset::populated(market, dataset.id, entry.payload, entry.stored_at);
            self.store_slot(market, slot, &stale).await;
            return Ok(SlotView {
                dataset: stale,
                freshness: Freshness::Stale,
            });
        }

        Err(PopulateFailure { dataset, error })
    }

    async fn store_slot(&self, market: Market, slot: Slot, dataset: &WeekDataset) {
        if let Err(e) = self.store.save_slot(market, slot, dataset).await {
            tracing::error!(market = %market, slot = %slot, "Failed to persist slot: {}", e);
        }
    }
}

/// A slot that could not be filled, with what it held before.
struct PopulateFailure {
    dataset: WeekDataset,
    error: ProviderError,
}

impl PopulateFailure {
    fn into_app_error(self, market: Market) -> AppError {
        if self.error.classify().retryable {
            AppError::NoData {
                message: format!(
                    "No release data available for {} week {}",
                    market, self.dataset.id
                ),
                cause: Some(self.error),
            }
        } else {
            AppError::Upstream(self.error)
        }
    }
}

/// Whether a slot should be (re)fetched as of `now`.
///
/// Data is fresh for the rest of the week it was fetched in; `last` is only
/// fetched when empty.
pub fn is_stale(slot: Slot, dataset: &WeekDataset, now: DateTime<Utc>) -> bool {
    if !dataset.is_populated() {
        return true;
    }
    match (slot, dataset.generated_at) {
        (_, None) => true,
        (Slot::Last, Some(_)) => false,
        (_, Some(generated_at)) => {
            calendar::week_identifier(generated_at) < calendar::week_identifier(now)
        }
    }
}

pub fn freshness_of(slot: Slot, dataset: &WeekDataset, now: DateTime<Utc>) -> Freshness {
    if !dataset.is_populated() {
        Freshness::Unavailable
    } else if is_stale(slot, dataset, now) {
        Freshness::Stale
    } else {
        Freshness::Fresh
    }
}
