//! Stockledger - multi-tenant inventory engine
//!
//! Per-warehouse stock levels with reservations, a lot ledger with expiry
//! and quality tracking, and an append-only movement log, kept consistent
//! under concurrent writers.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod store;

pub use config::Config;
pub use error::{AppError, AppResult};

use config::InventoryConfig;
use services::{
    Clock, InventoryService, LotService, MaintenanceService, MovementService, SystemClock,
};
use store::InventoryStore;

/// Engine services sharing one store
#[derive(Clone)]
pub struct Engine {
    pub inventory: InventoryService,
    pub lots: LotService,
    pub movements: MovementService,
    pub maintenance: MaintenanceService,
}

impl Engine {
    pub fn new(store: Arc<dyn InventoryStore>, settings: InventoryConfig) -> Self {
        Self::with_clock(store, settings, Arc::new(SystemClock))
    }

    /// Build the engine with a fixed notion of "today"
    pub fn with_clock(
        store: Arc<dyn InventoryStore>,
        settings: InventoryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let inventory = InventoryService::new(store.clone(), settings.clone())
            .with_clock(clock.clone());
        let lots = LotService::new(store.clone(), settings.clone()).with_clock(clock);
        let movements = MovementService::new(store.clone(), settings.clone());
        let maintenance = MaintenanceService::new(
            store,
            lots.clone(),
            movements.clone(),
            settings.near_expiry_days,
        );
        Self {
            inventory,
            lots,
            movements,
            maintenance,
        }
    }
}
