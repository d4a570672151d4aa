//! guildkeeper - community bot engines
//!
//! Paid review sessions, leveling, a shared ledger and bump tracking for a
//! Discord community. Gateway events arrive from a bridge over HTTP; actions
//! go out through the platform REST API.

mod bump;
mod config;
mod db;
mod effect;
mod error;
mod handlers;
mod http;
mod ids;
mod leveling;
mod metrics;
mod platform;
mod review;
mod scheduler;
mod telemetry;

use crate::config::{Config, LogFormat};
use crate::db::Database;
use crate::effect::EffectApplier;
use crate::handlers::Bot;
use crate::leveling::LevelingEngine;
use crate::leveling::resets::spawn_reset_task;
use crate::platform::RestPlatform;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "guildkeeper.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("Failed to load config {}: {}", config_path, e);
        e
    })?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    match config.log.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }

    if let Err(problems) = config::validation::validate(&config) {
        for problem in &problems {
            error!(path = %config_path, error = %problem, "Invalid configuration");
        }
        return Err(anyhow::anyhow!(
            "Refusing to start with {} configuration error(s)",
            problems.len()
        ));
    }

    info!(name = %config.bot.name, path = %config_path, "Starting guildkeeper");

    // Initialize database
    let db = Database::new(config.database_path()).await?;
    info!(path = %config.database_path(), "Database initialized");

    metrics::init();
    info!("Metrics initialized");

    let platform = Arc::new(RestPlatform::new(&config.discord)?);
    let applier = Arc::new(EffectApplier::new(platform));

    let leveling = Arc::new(LevelingEngine::new(db.clone(), config.leveling.clone()));
    let _resets = spawn_reset_task(Arc::clone(&leveling), db.clone(), config.leveling.clone());
    info!(
        every_secs = config.leveling.reset_check_secs,
        "Counter reset task started"
    );

    let bot = Arc::new(Bot::new(db.clone(), &config, leveling, applier));

    let server = tokio::spawn(http::run_http_server(Arc::clone(&bot), config.http.clone()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        result = server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server task failed");
            }
            return Err(anyhow::anyhow!("HTTP server stopped"));
        }
    }

    db.pool().close().await;
    info!("Shutdown complete");
    Ok(())
}
