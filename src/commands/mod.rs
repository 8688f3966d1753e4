//! Command-line entry points: one function per subcommand.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use crate::calendar;
use crate::config::Config;
use crate::db::{self, CacheKey, CacheStore, WindowStore};
use crate::errors::AppError;
use crate::export;
use crate::models::{Market, MarketSelector, SlotView, WeekIdentifier};
use crate::pipeline::Orchestrator;
use crate::provider::{HttpProvider, ReleaseProvider};
use crate::retry::RetryPolicy;
use crate::AppState;

/// Exit status when configuration is missing or invalid.
pub const EXIT_CONFIG: u8 = 2;

/// Open the database and wire the orchestrator with the HTTP provider.
pub async fn open(config: &Config) -> Result<Orchestrator, AppError> {
    let provider: Arc<dyn ReleaseProvider> = Arc::new(HttpProvider::from_config(config)?);
    open_with(config, provider).await
}

pub async fn open_with(
    config: &Config,
    provider: Arc<dyn ReleaseProvider>,
) -> Result<Orchestrator, AppError> {
    let pool = db::init_database(&config.db_path).await?;
    Ok(Orchestrator::new(
        WindowStore::new(pool.clone()),
        CacheStore::with_ttl(pool, config.cache_ttl),
        provider,
        RetryPolicy::new(config.max_retries),
    ))
}

/// `--date` as midnight UTC, else the wall clock.
pub fn reference_time(date: Option<NaiveDate>) -> DateTime<Utc> {
    date.map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc())
        .unwrap_or_else(Utc::now)
}

/// `run`: bring the selected markets up to date, one task per market.
pub async fn run(config: &Config, selector: MarketSelector, date: Option<NaiveDate>) -> ExitCode {
    if config.provider_api_key.is_none() {
        eprintln!("error: RELEASES_PROVIDER_API_KEY is not set");
        return ExitCode::from(EXIT_CONFIG);
    }

    let orchestrator = match open(config).await {
        Ok(o) => o,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let now = reference_time(date);
    tracing::info!(
        now = %now,
        week = %calendar::format_range(&calendar::week_range(now)),
        markets = ?selector.markets(),
        "Running release pipeline"
    );

    let results = run_markets(&orchestrator, &selector.markets(), now).await;
    for (market, result) in &results {
        println!("{}", summary_line(*market, result));
    }
    exit_code(&results)
}

/// Run every market concurrently and collect the outcomes in input order.
pub async fn run_markets(
    orchestrator: &Orchestrator,
    markets: &[Market],
    now: DateTime<Utc>,
) -> Vec<(Market, Result<SlotView, AppError>)> {
    let handles: Vec<_> = markets
        .iter()
        .map(|&market| {
            let orchestrator = orchestrator.clone();
            (
                market,
                tokio::spawn(async move { orchestrator.ensure_up_to_date(market, now).await }),
            )
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (market, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(AppError::Internal(format!("Task for {} failed: {}", market, e))),
        };
        if let Err(e) = &result {
            tracing::error!(market = %market, "Market failed: {}", e);
        }
        results.push((market, result));
    }
    results
}

pub fn summary_line(market: Market, result: &Result<SlotView, AppError>) -> String {
    match result {
        Ok(view) => format!(
            "{}: {} {:?} ({} entries)",
            market,
            view.dataset.id,
            view.freshness,
            view.dataset.entry_count()
        ),
        Err(e) => format!("{}: failed: {}", market, e),
    }
}

/// Success when at least one market produced a current week.
pub fn exit_code(results: &[(Market, Result<SlotView, AppError>)]) -> ExitCode {
    if results.iter().any(|(_, r)| r.is_ok()) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// `serve`: HTTP surface over the persisted state.
pub async fn serve(config: Config) -> Result<(), AppError> {
    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (RELEASES_API_PSK). Maintenance routes are open!");
    }
    if config.provider_api_key.is_none() {
        tracing::warn!("No provider API key configured; refresh requests will fail");
    }

    let orchestrator = open(&config).await?;
    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        config: Arc::new(config.clone()),
    };
    let app = crate::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// `export`: static JSON for the front-end.
pub async fn export(config: &Config, out: &Path) -> Result<(), AppError> {
    let pool = db::init_database(&config.db_path).await?;
    let store = WindowStore::new(pool);
    for (market, summary) in export::export_all(&store, out).await? {
        println!(
            "{}: {} slots, {} archived weeks -> {}",
            market,
            summary.slots,
            summary.archived,
            out.join(market.as_str()).display()
        );
    }
    Ok(())
}

/// `clear-cache`: one entry when both market and week are given, else all.
pub async fn clear_cache(
    config: &Config,
    market: Option<Market>,
    week: Option<WeekIdentifier>,
) -> Result<(), AppError> {
    let pool = db::init_database(&config.db_path).await?;
    let cache = CacheStore::with_ttl(pool, config.cache_ttl);
    match (market, week) {
        (Some(market), Some(week)) => {
            let key = CacheKey::new(market, week);
            if cache.clear(key).await? {
                println!("Removed cache entry {}", key);
            } else {
                println!("No cache entry for {}", key);
            }
        }
        (None, None) => {
            let removed = cache.clear_all().await?;
            println!("Removed {} cache entries", removed);
        }
        _ => {
            return Err(AppError::Validation(
                "--market and --week must be given together".to_string(),
            ))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Freshness;
    use crate::provider::{ProviderError, ScriptedProvider};
    use chrono::TimeZone;

    fn test_config(dir: &Path) -> Config {
        Config {
            api_psk: None,
            db_path: dir.join("test.sqlite"),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "info".to_string(),
            log_format: crate::config::LogFormat::Text,
            provider_url: "http://127.0.0.1:9/unused".to_string(),
            provider_api_key: Some("test-key".to_string()),
            provider_model: "test".to_string(),
            provider_timeout: std::time::Duration::from_secs(1),
            max_retries: 0,
            cache_ttl: chrono::Duration::hours(24),
            export_dir: dir.join("export"),
        }
    }

    #[test]
    fn test_reference_time_is_midnight_utc() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 16).unwrap();
        assert_eq!(
            reference_time(Some(date)),
            Utc.with_ymd_and_hms(2024, 12, 16, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_one_market_failing_still_succeeds() {
        let dir = tempfile::TempDir::new().unwrap();
        let provider = Arc::new(ScriptedProvider::new());
        // The first current-week fetch is a permanent failure.
        provider.push(Err(ProviderError::Status {
            code: 401,
            message: "unauthorized".to_string(),
        }));
        let orchestrator = open_with(&test_config(dir.path()), provider.clone())
            .await
            .unwrap();
        let now = Utc.with_ymd_and_hms(2024, 12, 16, 0, 0, 0).unwrap();

        // Run sequentially so the scripted failure lands on a known market.
        let first = run_markets(&orchestrator, &[Market::Us], now).await;
        let second = run_markets(&orchestrator, &[Market::India], now).await;
        assert!(first[0].1.is_err());
        let india = second[0].1.as_ref().unwrap();
        assert_eq!(india.freshness, Freshness::Fresh);
        assert_eq!(india.dataset.id.to_string(), "2024-51");

        let all: Vec<_> = first.into_iter().chain(second).collect();
        assert_eq!(exit_code(&all), ExitCode::SUCCESS);
        assert!(summary_line(Market::Us, &all[0].1).starts_with("us: failed:"));
        assert_eq!(
            summary_line(Market::India, &all[1].1),
            "india: 2024-51 Fresh (2 entries)"
        );
    }

    #[test]
    fn test_all_markets_failing_is_failure() {
        let results = vec![
            (Market::Us, Err(AppError::Internal("boom".to_string()))),
            (Market::India, Err(AppError::Internal("boom".to_string()))),
        ];
        assert_eq!(exit_code(&results), ExitCode::FAILURE);
    }

    #[tokio::test]
    async fn test_run_without_provider_key_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        config.provider_api_key = None;
        let code = run(&config, MarketSelector::All, None).await;
        assert_eq!(code, ExitCode::from(EXIT_CONFIG));
    }

    #[tokio::test]
    async fn test_clear_cache_requires_both_market_and_week() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = test_config(dir.path());
        let err = clear_cache(&config, Some(Market::Us), None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        clear_cache(&config, None, None).await.unwrap();
    }
}
