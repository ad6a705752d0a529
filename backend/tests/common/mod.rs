//! Shared fixtures for the engine tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use stockledger_backend::config::InventoryConfig;
use stockledger_backend::models::{Lot, StockKey};
use stockledger_backend::services::lot::ReceiveLotInput;
use stockledger_backend::services::FixedClock;
use stockledger_backend::store::{InventoryStore, MemoryInventoryStore};
use stockledger_backend::Engine;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// "Today" for every fixture unless a test says otherwise
pub fn today() -> NaiveDate {
    date(2023, 12, 1)
}

pub fn actor() -> Uuid {
    Uuid::from_u128(0xA11CE)
}

/// One workspace with a single variant stocked across `warehouses`
pub struct Fixture {
    pub store: MemoryInventoryStore,
    pub engine: Engine,
    pub workspace_id: Uuid,
    pub variant_id: Uuid,
    pub warehouses: Vec<Uuid>,
    pub settings: InventoryConfig,
}

impl Fixture {
    pub async fn new(warehouse_count: usize) -> Self {
        Self::with_settings(warehouse_count, InventoryConfig::default()).await
    }

    /// Fixture whose workspace only uses the coarse stock ledger
    pub async fn untracked(warehouse_count: usize) -> Self {
        let workspace_id = Uuid::new_v4();
        let settings = InventoryConfig {
            lot_tracking_disabled_workspaces: vec![workspace_id],
            ..InventoryConfig::default()
        };
        Self::build(workspace_id, warehouse_count, settings).await
    }

    pub async fn with_settings(warehouse_count: usize, settings: InventoryConfig) -> Self {
        Self::build(Uuid::new_v4(), warehouse_count, settings).await
    }

    async fn build(workspace_id: Uuid, warehouse_count: usize, settings: InventoryConfig) -> Self {
        let store = MemoryInventoryStore::new();
        let variant_id = Uuid::new_v4();
        store.register_variant(workspace_id, variant_id).await;

        let mut warehouses: Vec<Uuid> = (0..warehouse_count).map(|_| Uuid::new_v4()).collect();
        warehouses.sort();
        for warehouse_id in &warehouses {
            store.register_warehouse(workspace_id, *warehouse_id, true).await;
        }

        let engine = engine_at(&store, settings.clone(), today());
        Self {
            store,
            engine,
            workspace_id,
            variant_id,
            warehouses,
            settings,
        }
    }

    /// Same store seen from another day
    pub fn engine_on(&self, day: NaiveDate) -> Engine {
        engine_at(&self.store, self.settings.clone(), day)
    }

    pub fn key(&self, warehouse_index: usize) -> StockKey {
        StockKey::new(
            self.workspace_id,
            self.variant_id,
            self.warehouses[warehouse_index],
        )
    }

    /// Put plain stock on the coarse ledger
    pub async fn stock(&self, warehouse_index: usize, quantity: i64) {
        self.engine
            .inventory
            .adjust(self.key(warehouse_index), quantity, "opening balance", actor())
            .await
            .unwrap();
    }

    pub fn receipt(
        &self,
        warehouse_index: usize,
        batch_id: &str,
        expires_on: Option<NaiveDate>,
        quantity: i64,
    ) -> ReceiveLotInput {
        ReceiveLotInput {
            workspace_id: self.workspace_id,
            variant_id: self.variant_id,
            warehouse_id: self.warehouses[warehouse_index],
            batch_id: batch_id.to_string(),
            manufactured_on: date(2023, 6, 1),
            expires_on,
            quantity,
            purchase_cost: None,
            sync_stock: true,
        }
    }

    /// Receive a batch and return the created lot
    pub async fn receive(
        &self,
        warehouse_index: usize,
        batch_id: &str,
        expires_on: Option<NaiveDate>,
        quantity: i64,
    ) -> Lot {
        self.engine
            .lots
            .receive(
                self.receipt(warehouse_index, batch_id, expires_on, quantity),
                actor(),
            )
            .await
            .unwrap()
            .lot
    }

    pub async fn lot(&self, lot_id: Uuid) -> Lot {
        self.engine.lots.get_lot(self.workspace_id, lot_id).await.unwrap()
    }
}

fn engine_at(store: &MemoryInventoryStore, settings: InventoryConfig, day: NaiveDate) -> Engine {
    let shared: Arc<dyn InventoryStore> = Arc::new(store.clone());
    Engine::with_clock(shared, settings, Arc::new(FixedClock(day)))
}
