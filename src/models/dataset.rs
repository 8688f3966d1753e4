//! Week datasets, archive entries and cache entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Market, WeekIdentifier, WeekRange};
use crate::calendar;

/// Release data as returned by the provider. The pipeline only moves it around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseDataset(pub serde_json::Value);

impl ReleaseDataset {
    /// Number of release entries, for logging only.
    pub fn entry_count(&self) -> usize {
        match &self.0 {
            serde_json::Value::Array(items) => items.len(),
            serde_json::Value::Object(fields) => fields
                .values()
                .filter_map(|v| v.as_array())
                .map(|a| a.len())
                .sum(),
            _ => 0,
        }
    }
}

/// One week of release data for one market.
///
/// A dataset without payload is a dated placeholder waiting to be fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekDataset {
    pub id: WeekIdentifier,
    pub range: WeekRange,
    pub market: Market,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<ReleaseDataset>,
}

impl WeekDataset {
    pub fn placeholder(market: Market, id: WeekIdentifier) -> Self {
        Self {
            id,
            range: calendar::week_range_of_id(&id),
            market,
            generated_at: None,
            payload: None,
        }
    }

    pub fn populated(
        market: Market,
        id: WeekIdentifier,
        payload: ReleaseDataset,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            range: calendar::week_range_of_id(&id),
            market,
            generated_at: Some(generated_at),
            payload: Some(payload),
        }
    }

    pub fn is_populated(&self) -> bool {
        self.payload.is_some()
    }

    pub fn entry_count(&self) -> usize {
        self.payload.as_ref().map(|p| p.entry_count()).unwrap_or(0)
    }

    /// Summary row for the archive index.
    pub fn archive_entry(&self) -> ArchiveEntry {
        ArchiveEntry {
            id: self.id,
            title: format!(
                "{} releases, {}",
                self.market.display_name(),
                calendar::format_range(&self.range)
            ),
            range: self.range,
            generated_at: self.generated_at.unwrap_or(self.range.start),
        }
    }
}

/// Archive index row. The full dataset is stored alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    pub id: WeekIdentifier,
    pub title: String,
    pub range: WeekRange,
    pub generated_at: DateTime<Utc>,
}

/// Cached provider response for one `(market, week)` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub market: Market,
    pub id: WeekIdentifier,
    pub payload: ReleaseDataset,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}
