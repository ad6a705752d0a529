//! Configuration management for the Stockledger inventory engine
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with STOCKLEDGER_ prefix

use std::time::Duration;

use config::{ConfigError, Environment, File};
use serde::Deserialize;
use uuid::Uuid;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Inventory engine tuning
    pub inventory: InventoryConfig,

    /// Maintenance worker configuration
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection
    pub acquire_timeout_secs: u64,

    /// Row lock wait inside a mutating transaction, in milliseconds
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InventoryConfig {
    /// Extra attempts after a lock or serialization conflict
    pub max_conflict_retries: u32,

    /// Base backoff between conflict retries, in milliseconds
    pub retry_backoff_ms: u64,

    /// Days before expiry at which a lot is flagged as a warning
    pub near_expiry_days: i64,

    /// Whether reservations earmark lots unless the workspace opts out
    pub lot_tracking_default: bool,

    /// Workspaces that only use the coarse stock ledger
    #[serde(default)]
    pub lot_tracking_disabled_workspaces: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Seconds between maintenance sweeps
    pub interval_secs: u64,

    /// Workspaces swept by the maintenance jobs
    #[serde(default)]
    pub workspaces: Vec<Uuid>,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("STOCKLEDGER_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.lock_timeout_ms", 2000)?
            .set_default("inventory.max_conflict_retries", 3)?
            .set_default("inventory.retry_backoff_ms", 25)?
            .set_default("inventory.near_expiry_days", shared::NEAR_EXPIRY_DAYS)?
            .set_default("inventory.lot_tracking_default", true)?
            .set_default("worker.interval_secs", 3600)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (STOCKLEDGER_ prefix)
            .add_source(
                Environment::with_prefix("STOCKLEDGER")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("inventory.lot_tracking_disabled_workspaces")
                    .with_list_parse_key("worker.workspaces"),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl InventoryConfig {
    /// Whether reservations in this workspace earmark lots
    pub fn lot_tracking_enabled(&self, workspace_id: Uuid) -> bool {
        self.lot_tracking_default && !self.lot_tracking_disabled_workspaces.contains(&workspace_id)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            retry_backoff_ms: 25,
            near_expiry_days: shared::NEAR_EXPIRY_DAYS,
            lot_tracking_default: true,
            lot_tracking_disabled_workspaces: Vec::new(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            workspaces: Vec::new(),
        }
    }
}
