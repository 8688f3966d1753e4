//! Scripted provider for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{ProviderError, ReleaseProvider};
use crate::calendar;
use crate::models::{Market, ReleaseDataset, WeekRange};

/// Returns queued results in order, then a generated dataset naming the market and week.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ReleaseDataset, ProviderError>>>,
    calls: AtomicUsize,
    requested: Mutex<Vec<(Market, String)>>,
    latency: Duration,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn push(&self, result: Result<ReleaseDataset, ProviderError>) -> &Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    pub fn push_errors(&self, error: ProviderError, times: usize) -> &Self {
        for _ in 0..times {
            self.push(Err(error.clone()));
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(market, week id)` of every call, in order.
    pub fn requested(&self) -> Vec<(Market, String)> {
        self.requested.lock().unwrap().clone()
    }

    pub fn generated(market: Market, range: &WeekRange) -> ReleaseDataset {
        let week = calendar::week_identifier(range.start).to_string();
        ReleaseDataset(json!({
            "market": market.as_str(),
            "week": week,
            "ott": [{ "title": format!("Series {}", week) }],
            "theatrical": [{ "title": format!("Film {}", week) }]
        }))
    }
}

#[async_trait]
impl ReleaseProvider for ScriptedProvider {
    async fn fetch_releases(
        &self,
        market: Market,
        range: &WeekRange,
    ) -> Result<ReleaseDataset, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested
            .lock()
            .unwrap()
            .push((market, calendar::week_identifier(range.start).to_string()));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(Self::generated(market, range)))
    }
}
