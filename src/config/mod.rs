//! Configuration module for the release pipeline.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::AppError;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key guarding the mutating API routes
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,
    /// Chat-completions endpoint of the release-data provider
    pub provider_url: String,
    pub provider_api_key: Option<String>,
    pub provider_model: String,
    /// Per-request timeout; exceeding it counts as a retryable timeout
    pub provider_timeout: Duration,
    /// Additional attempts after the first provider call
    pub max_retries: u32,
    pub cache_ttl: chrono::Duration,
    /// Output directory of the static JSON export
    pub export_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let api_psk = env::var("RELEASES_API_PSK").ok().filter(|s| !s.is_empty());

        let db_path = env::var("RELEASES_DB_PATH")
            .unwrap_or_else(|_| "./data/releases.sqlite".to_string())
            .into();

        let bind_addr = parse_var("RELEASES_BIND_ADDR", "127.0.0.1:8080")?;

        let log_level = env::var("RELEASES_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let log_format = match env::var("RELEASES_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let provider_url = env::var("RELEASES_PROVIDER_URL")
            .unwrap_or_else(|_| "https://api.perplexity.ai/chat/completions".to_string());

        let provider_api_key = env::var("RELEASES_PROVIDER_API_KEY")
            .ok()
            .filter(|s| !s.is_empty());

        let provider_model =
            env::var("RELEASES_PROVIDER_MODEL").unwrap_or_else(|_| "sonar".to_string());

        let timeout_secs: u64 = parse_var("RELEASES_PROVIDER_TIMEOUT_SECS", "90")?;
        let max_retries = parse_var("RELEASES_MAX_RETRIES", "2")?;
        let ttl_hours: i64 = parse_var("RELEASES_CACHE_TTL_HOURS", "24")?;

        let export_dir = env::var("RELEASES_EXPORT_DIR")
            .unwrap_or_else(|_| "./public/data".to_string())
            .into();

        Ok(Self {
            api_psk,
            db_path,
            bind_addr,
            log_level,
            log_format,
            provider_url,
            provider_api_key,
            provider_model,
            provider_timeout: Duration::from_secs(timeout_secs),
            max_retries,
            cache_ttl: chrono::Duration::hours(ttl_hours),
            export_dir,
        })
    }
}

fn parse_var<T: FromStr>(name: &str, default: &str) -> Result<T, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map_err(|_| AppError::Validation(format!("Invalid {} value '{}'", name, raw)))
}
