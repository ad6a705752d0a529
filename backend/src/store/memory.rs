//! In-memory store (for tests and embedded tooling).
//!
//! A single mutex guards the whole state, so units of work are fully
//! serialized. Each unit stages its writes on a private copy that replaces
//! the shared state only on commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{InventoryStore, InventoryTx};
use crate::error::{AppError, AppResult};
use crate::models::{
    Lot, MovementCursor, MovementRecord, NewMovement, Reservation, StockKey, StockRecord,
};
use shared::DateRange;

#[derive(Debug, Clone, Copy)]
struct WarehouseEntry {
    workspace_id: Uuid,
    is_active: bool,
}

#[derive(Debug, Clone, Copy)]
struct VariantEntry {
    workspace_id: Uuid,
    stock_on_hand: i64,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    warehouses: HashMap<Uuid, WarehouseEntry>,
    variants: HashMap<Uuid, VariantEntry>,
    stock: BTreeMap<StockKey, StockRecord>,
    lots: HashMap<Uuid, Lot>,
    movements: Vec<MovementRecord>,
    last_movement_id: i64,
    reservations: HashMap<Uuid, Reservation>,
}

impl MemoryState {
    fn warehouse_active(&self, warehouse_id: Uuid) -> bool {
        self.warehouses
            .get(&warehouse_id)
            .map_or(false, |w| w.is_active)
    }

    fn variant_stock(&self, workspace_id: Uuid, variant_id: Uuid) -> impl Iterator<Item = &StockRecord> {
        self.stock
            .values()
            .filter(move |r| r.workspace_id == workspace_id && r.variant_id == variant_id)
    }

    fn ensure_known(&self, key: StockKey) -> AppResult<()> {
        match self.warehouses.get(&key.warehouse_id) {
            Some(w) if w.workspace_id == key.workspace_id => {}
            _ => return Err(AppError::NotFound("Warehouse".to_string())),
        }
        match self.variants.get(&key.variant_id) {
            Some(v) if v.workspace_id == key.workspace_id => Ok(()),
            _ => Err(AppError::NotFound("Variant".to_string())),
        }
    }

    fn newest_first<'a>(
        &'a self,
        cursor: MovementCursor,
        limit: usize,
        filter: impl Fn(&MovementRecord) -> bool,
    ) -> Vec<MovementRecord> {
        let mut rows: Vec<MovementRecord> = self
            .movements
            .iter()
            .filter(|m| cursor.admits(m.id) && filter(m))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        rows.truncate(limit + 1);
        rows
    }
}

/// Inventory store held entirely in process memory
#[derive(Clone, Default)]
pub struct MemoryInventoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryInventoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a warehouse known to the store
    pub async fn register_warehouse(&self, workspace_id: Uuid, warehouse_id: Uuid, is_active: bool) {
        let mut state = self.state.lock().await;
        state.warehouses.insert(
            warehouse_id,
            WarehouseEntry {
                workspace_id,
                is_active,
            },
        );
    }

    pub async fn set_warehouse_active(&self, warehouse_id: Uuid, is_active: bool) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let warehouse = state
            .warehouses
            .get_mut(&warehouse_id)
            .ok_or_else(|| AppError::NotFound("Warehouse".to_string()))?;
        warehouse.is_active = is_active;
        Ok(())
    }

    /// Make a variant known to the store with a zero aggregate
    pub async fn register_variant(&self, workspace_id: Uuid, variant_id: Uuid) {
        let mut state = self.state.lock().await;
        state.variants.insert(
            variant_id,
            VariantEntry {
                workspace_id,
                stock_on_hand: 0,
            },
        );
    }

    /// Overwrite the cached aggregate as a catalog bug would
    pub async fn corrupt_variant_on_hand(&self, variant_id: Uuid, stock_on_hand: i64) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let variant = state
            .variants
            .get_mut(&variant_id)
            .ok_or_else(|| AppError::NotFound("Variant".to_string()))?;
        variant.stock_on_hand = stock_on_hand;
        Ok(())
    }

    /// All stock and lot rows, for invariant sweeps
    pub async fn snapshot(&self) -> (Vec<StockRecord>, Vec<Lot>) {
        let state = self.state.lock().await;
        (
            state.stock.values().cloned().collect(),
            state.lots.values().cloned().collect(),
        )
    }
}

#[async_trait]
impl InventoryStore for MemoryInventoryStore {
    async fn begin(&self) -> AppResult<Box<dyn InventoryTx>> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }

    async fn find_stock(&self, key: StockKey) -> AppResult<Option<StockRecord>> {
        let state = self.state.lock().await;
        Ok(state.stock.get(&key).cloned())
    }

    async fn stock_for_variant(
        &self,
        workspace_id: Uuid,
        variant_id: Uuid,
    ) -> AppResult<Vec<StockRecord>> {
        let state = self.state.lock().await;
        Ok(state.variant_stock(workspace_id, variant_id).cloned().collect())
    }

    async fn eligible_stock(
        &self,
        workspace_id: Uuid,
        variant_id: Uuid,
    ) -> AppResult<Vec<StockRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .variant_stock(workspace_id, variant_id)
            .filter(|r| state.warehouse_active(r.warehouse_id))
            .cloned()
            .collect())
    }

    async fn workspace_variants(&self, workspace_id: Uuid) -> AppResult<Vec<Uuid>> {
        let state = self.state.lock().await;
        let mut variants: Vec<Uuid> = state
            .stock
            .keys()
            .filter(|k| k.workspace_id == workspace_id)
            .map(|k| k.variant_id)
            .collect();
        variants.dedup();
        Ok(variants)
    }

    async fn variant_on_hand(&self, workspace_id: Uuid, variant_id: Uuid) -> AppResult<i64> {
        let state = self.state.lock().await;
        match state.variants.get(&variant_id) {
            Some(v) if v.workspace_id == workspace_id => Ok(v.stock_on_hand),
            _ => Err(AppError::NotFound("Variant".to_string())),
        }
    }

    async fn find_lot(&self, workspace_id: Uuid, lot_id: Uuid) -> AppResult<Option<Lot>> {
        let state = self.state.lock().await;
        Ok(state
            .lots
            .get(&lot_id)
            .filter(|l| l.workspace_id == workspace_id)
            .cloned())
    }

    async fn lots_at(
        &self,
        workspace_id: Uuid,
        variant_id: Uuid,
        warehouse_id: Uuid,
    ) -> AppResult<Vec<Lot>> {
        let state = self.state.lock().await;
        Ok(lots_matching(&state, workspace_id, variant_id, warehouse_id))
    }

    async fn workspace_lots(&self, workspace_id: Uuid) -> AppResult<Vec<Lot>> {
        let state = self.state.lock().await;
        let mut lots: Vec<Lot> = state
            .lots
            .values()
            .filter(|l| l.workspace_id == workspace_id)
            .cloned()
            .collect();
        lots.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(lots)
    }

    async fn lot_movements(
        &self,
        workspace_id: Uuid,
        lot_id: Uuid,
        cursor: MovementCursor,
        limit: usize,
    ) -> AppResult<Vec<MovementRecord>> {
        let state = self.state.lock().await;
        Ok(state.newest_first(cursor, limit, |m| {
            m.workspace_id == workspace_id && m.lot_id == lot_id
        }))
    }

    async fn movements_between(
        &self,
        workspace_id: Uuid,
        range: DateRange,
        cursor: MovementCursor,
        limit: usize,
    ) -> AppResult<Vec<MovementRecord>> {
        let state = self.state.lock().await;
        Ok(state.newest_first(cursor, limit, |m| {
            m.workspace_id == workspace_id && range.contains(m.created_at)
        }))
    }

    async fn lot_movement_total(&self, workspace_id: Uuid, lot_id: Uuid) -> AppResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .movements
            .iter()
            .filter(|m| m.workspace_id == workspace_id && m.lot_id == lot_id)
            .map(|m| m.delta)
            .sum())
    }

    async fn find_reservation(
        &self,
        workspace_id: Uuid,
        reservation_id: Uuid,
    ) -> AppResult<Option<Reservation>> {
        let state = self.state.lock().await;
        Ok(state
            .reservations
            .get(&reservation_id)
            .filter(|r| r.workspace_id == workspace_id)
            .cloned())
    }
}

fn lots_matching(state: &MemoryState, workspace_id: Uuid, variant_id: Uuid, warehouse_id: Uuid) -> Vec<Lot> {
    let mut lots: Vec<Lot> = state
        .lots
        .values()
        .filter(|l| {
            l.workspace_id == workspace_id
                && l.variant_id == variant_id
                && l.warehouse_id == warehouse_id
        })
        .cloned()
        .collect();
    lots.sort_by(|a, b| a.id.cmp(&b.id));
    lots
}

/// Unit of work holding the store mutex until commit or drop
struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
}

#[async_trait]
impl InventoryTx for MemoryTx {
    async fn lock_stock(&mut self, key: StockKey) -> AppResult<StockRecord> {
        self.work.ensure_known(key)?;
        Ok(self
            .work
            .stock
            .entry(key)
            .or_insert_with(|| StockRecord::empty(key))
            .clone())
    }

    async fn lock_variant_stock(
        &mut self,
        workspace_id: Uuid,
        variant_id: Uuid,
    ) -> AppResult<Vec<StockRecord>> {
        Ok(self
            .work
            .variant_stock(workspace_id, variant_id)
            .filter(|r| self.work.warehouse_active(r.warehouse_id))
            .cloned()
            .collect())
    }

    async fn save_stock(&mut self, record: &StockRecord) -> AppResult<()> {
        self.work.stock.insert(record.key(), record.clone());
        Ok(())
    }

    async fn refresh_variant_total(
        &mut self,
        workspace_id: Uuid,
        variant_id: Uuid,
    ) -> AppResult<(i64, i64)> {
        let current = shared::total_on_hand(self.work.variant_stock(workspace_id, variant_id));
        let variant = self
            .work
            .variants
            .get_mut(&variant_id)
            .filter(|v| v.workspace_id == workspace_id)
            .ok_or_else(|| AppError::NotFound("Variant".to_string()))?;
        let previous = variant.stock_on_hand;
        variant.stock_on_hand = current;
        Ok((previous, current))
    }

    async fn lock_lot(&mut self, workspace_id: Uuid, lot_id: Uuid) -> AppResult<Lot> {
        self.work
            .lots
            .get(&lot_id)
            .filter(|l| l.workspace_id == workspace_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("Lot".to_string()))
    }

    async fn lock_lots(
        &mut self,
        workspace_id: Uuid,
        variant_id: Uuid,
        warehouse_id: Uuid,
    ) -> AppResult<Vec<Lot>> {
        Ok(lots_matching(&self.work, workspace_id, variant_id, warehouse_id))
    }

    async fn lock_lot_by_batch(
        &mut self,
        workspace_id: Uuid,
        warehouse_id: Uuid,
        batch_id: &str,
    ) -> AppResult<Option<Lot>> {
        Ok(self
            .work
            .lots
            .values()
            .find(|l| {
                l.workspace_id == workspace_id
                    && l.warehouse_id == warehouse_id
                    && l.batch_id == batch_id
            })
            .cloned())
    }

    async fn insert_lot(&mut self, lot: &Lot) -> AppResult<()> {
        self.work
            .ensure_known(StockKey::new(lot.workspace_id, lot.variant_id, lot.warehouse_id))?;
        let taken = self.work.lots.values().any(|l| {
            l.workspace_id == lot.workspace_id
                && l.warehouse_id == lot.warehouse_id
                && l.batch_id == lot.batch_id
        });
        if taken {
            return Err(AppError::DuplicateEntry("lots_batch_key".to_string()));
        }
        self.work.lots.insert(lot.id, lot.clone());
        Ok(())
    }

    async fn save_lot(&mut self, lot: &Lot) -> AppResult<()> {
        self.work.lots.insert(lot.id, lot.clone());
        Ok(())
    }

    async fn append_movement(&mut self, movement: NewMovement) -> AppResult<MovementRecord> {
        if !self.work.lots.contains_key(&movement.lot_id) {
            return Err(AppError::NotFound("Lot".to_string()));
        }
        self.work.last_movement_id += 1;
        let record = MovementRecord::from_new(self.work.last_movement_id, movement, Utc::now());
        self.work.movements.push(record.clone());
        Ok(record)
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> AppResult<()> {
        self.work
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn lock_reservation(
        &mut self,
        workspace_id: Uuid,
        reservation_id: Uuid,
    ) -> AppResult<Reservation> {
        self.work
            .reservations
            .get(&reservation_id)
            .filter(|r| r.workspace_id == workspace_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("Reservation".to_string()))
    }

    async fn save_reservation(&mut self, reservation: &Reservation) -> AppResult<()> {
        self.work
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}
