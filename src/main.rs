//! Release Radar
//!
//! Keeps a rolling last/current/next window of weekly OTT and theatrical
//! releases per market, archives past weeks and serves them to a static front-end.

mod api;
mod auth;
mod calendar;
mod commands;
mod config;
mod db;
mod errors;
mod export;
mod models;
mod pipeline;
mod provider;
mod retry;
mod transition;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{Config, LogFormat};
use models::{Market, MarketSelector, WeekIdentifier};
use pipeline::Orchestrator;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<Config>,
}

#[derive(Parser)]
#[command(name = "release-radar")]
#[command(version)]
#[command(about = "Weekly OTT and theatrical release windows", long_about = None)]
#[command(
    after_help = "Environment:\n  RELEASES_PROVIDER_API_KEY   Provider credentials (required by run)\n  RELEASES_DB_PATH            SQLite database path\n  RELEASES_LOG_LEVEL          Log verbosity"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rotate and refill the release windows
    Run {
        /// us, india or all
        #[arg(short, long, default_value = "all")]
        market: MarketSelector,

        /// Treat this day (00:00 UTC) as now
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Serve the windows and archives over HTTP
    Serve,
    /// Write static JSON for the front-end
    Export {
        /// Output directory, defaults to RELEASES_EXPORT_DIR
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Drop cached provider responses
    ClearCache {
        #[arg(long, requires = "week")]
        market: Option<Market>,

        /// Week id, YYYY-WW
        #[arg(long, requires = "market")]
        week: Option<WeekIdentifier>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(commands::EXIT_CONFIG);
        }
    };
    init_logging(&config);

    tracing::debug!("Database path: {:?}", config.db_path);

    let result = match cli.command {
        Commands::Run { market, date } => return commands::run(&config, market, date).await,
        Commands::Serve => {
            tracing::info!("Starting Release Radar server");
            commands::serve(config).await
        }
        Commands::Export { out } => {
            let out = out.unwrap_or_else(|| config.export_dir.clone());
            commands::export(&config, &out).await
        }
        Commands::ClearCache { market, week } => commands::clear_cache(&config, market, week).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // Logs go to stderr; stdout carries command output.
    let (text, json) = match config.log_format {
        LogFormat::Text => (
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(text)
        .with(json)
        .init();
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone PSK for the auth layer
    let psk = state.config.api_psk.clone();

    // Mutating routes
    let admin_routes = Router::new()
        .route("/markets/{market}/refresh", post(api::refresh_market))
        .route("/cache", delete(api::clear_cache))
        .route("/markets/{market}/cache/{week_id}", delete(api::clear_cache_entry))
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Read routes for the front-end (no auth required)
    let read_routes = Router::new()
        .route("/markets", get(api::list_markets))
        .route("/markets/{market}/window", get(api::get_window))
        .route("/markets/{market}/window/{slot}", get(api::get_slot))
        .route("/markets/{market}/archive", get(api::list_archive))
        .route("/markets/{market}/archive/{week_id}", get(api::get_archived_week));

    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", read_routes.merge(admin_routes))
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
