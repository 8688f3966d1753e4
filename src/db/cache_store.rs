//! TTL-bound cache of provider responses keyed by market and week.
//!
//! Caching only saves provider calls: unreadable entries behave as missing.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};

use super::parse_timestamp;
use crate::errors::AppError;
use crate::models::{CacheEntry, Market, ReleaseDataset, WeekIdentifier};

/// Default lifetime of a cache entry.
pub const DEFAULT_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub market: Market,
    pub week: WeekIdentifier,
}

impl CacheKey {
    pub fn new(market: Market, week: WeekIdentifier) -> Self {
        Self { market, week }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.market, self.week)
    }
}

/// Result of a cache lookup, keeping "expired" apart from "not found".
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(CacheEntry),
    Expired(CacheEntry),
    Miss,
}

#[derive(Clone)]
pub struct CacheStore {
    pool: SqlitePool,
    ttl: Duration,
}

impl CacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_ttl(pool, Duration::hours(DEFAULT_TTL_HOURS))
    }

    pub fn with_ttl(pool: SqlitePool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    /// Stored entry regardless of validity.
    pub async fn read(&self, key: CacheKey) -> Result<Option<CacheEntry>, AppError> {
        let row = sqlx::query(
            "SELECT payload, stored_at, expires_at FROM cache_entries WHERE market = ? AND week_id = ?",
        )
        .bind(key.market.as_str())
        .bind(key.week.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let entry = (|| {
            Some(CacheEntry {
                market: key.market,
                id: key.week,
                payload: serde_json::from_str(row.try_get("payload").ok()?).ok()?,
                stored_at: parse_timestamp(row.try_get("stored_at").ok()?)?,
                expires_at: parse_timestamp(row.try_get("expires_at").ok()?)?,
            })
        })();

        if entry.is_none() {
            tracing::warn!(key = %key, "Ignoring corrupted cache entry");
        }
        Ok(entry)
    }

    /// Create or replace the entry, valid for the configured TTL from `now`.
    pub async fn write(
        &self,
        key: CacheKey,
        payload: &ReleaseDataset,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry, AppError> {
        let entry = CacheEntry {
            market: key.market,
            id: key.week,
            payload: payload.clone(),
            stored_at: now,
            expires_at: now + self.ttl,
        };

        sqlx::query(
            "INSERT OR REPLACE INTO cache_entries (market, week_id, payload, stored_at, expires_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(key.market.as_str())
        .bind(key.week.to_string())
        .bind(serde_json::to_string(payload)?)
        .bind(entry.stored_at.to_rfc3339())
        .bind(entry.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::debug!(key = %key, expires_at = %entry.expires_at, "Cached provider response");
        Ok(entry)
    }

    pub async fn lookup(&self, key: CacheKey, now: DateTime<Utc>) -> Result<CacheLookup, AppError> {
        Ok(match self.read(key).await? {
            Some(entry) if entry.is_valid(now) => CacheLookup::Hit(entry),
            Some(entry) => CacheLookup::Expired(entry),
            None => CacheLookup::Miss,
        })
    }

    /// Payload of a valid entry; `None` when missing or expired.
    pub async fn read_valid(
        &self,
        key: CacheKey,
        now: DateTime<Utc>,
    ) -> Result<Option<ReleaseDataset>, AppError> {
        match self.lookup(key, now).await? {
            CacheLookup::Hit(entry) => {
                tracing::debug!(key = %key, "Cache hit");
                Ok(Some(entry.payload))
            }
            CacheLookup::Expired(entry) => {
                tracing::debug!(key = %key, expired_at = %entry.expires_at, "Cache entry expired");
                Ok(None)
            }
            CacheLookup::Miss => {
                tracing::debug!(key = %key, "Cache miss");
                Ok(None)
            }
        }
    }

    /// Remove one entry. Returns whether it existed.
    pub async fn clear(&self, key: CacheKey) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE market = ? AND week_id = ?")
            .bind(key.market.as_str())
            .bind(key.week.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove every entry, expired or not. Returns how many were removed.
    pub async fn clear_all(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await?;
        tracing::info!(removed = result.rows_affected(), "Cleared provider cache");
        Ok(result.rows_affected())
    }
}
