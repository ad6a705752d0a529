//! Stockledger maintenance worker
//!
//! Periodically refreshes lot quality statuses, reconciles variant
//! aggregates and reports lots nearing expiry for the configured
//! workspaces.

use std::{sync::Arc, time::Duration};

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stockledger_backend::{store::PgInventoryStore, Config, Engine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "stockledger_worker=debug,stockledger_backend=debug,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    tracing::info!("Starting Stockledger maintenance worker");
    tracing::info!("Environment: {}", config.environment);

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_secs))
        .connect(&config.database.url)
        .await?;

    tracing::info!("Database connection established");

    // Run migrations in development
    if config.environment == "development" {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&db_pool).await?;
        tracing::info!("Migrations completed");
    }

    let store = PgInventoryStore::new(db_pool).with_lock_timeout(config.database.lock_timeout_ms);
    let engine = Engine::new(Arc::new(store), config.inventory.clone());

    if config.worker.workspaces.is_empty() {
        tracing::warn!("No workspaces configured, the worker has nothing to sweep");
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(config.worker.interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for workspace_id in &config.worker.workspaces {
                    match engine.maintenance.run_sweep(*workspace_id).await {
                        Ok(report) => tracing::info!(
                            %workspace_id,
                            quality_changes = report.quality_changes,
                            variants_drifted = report.variants_drifted,
                            unbalanced_lots = report.unbalanced_lots,
                            expiring_lots = report.expiring_lots,
                            "Sweep completed"
                        ),
                        Err(err) => tracing::error!(
                            %workspace_id,
                            error_code = err.code(),
                            "Sweep failed: {}",
                            err
                        ),
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}
