//! Storage seam for the inventory ledgers
//!
//! An [`InventoryStore`] hands out [`InventoryTx`] units of work. Every
//! `lock_*` call takes an exclusive hold on the rows it returns until the
//! transaction commits or is dropped; dropping without `commit` rolls back
//! everything staged in it. Ledger rules are applied by the engine between
//! the lock and the save, never by the store.
//!
//! Lock order inside a unit of work: reservation, stock records (by
//! warehouse id), lots (by id), variant aggregate.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    Lot, MovementCursor, MovementRecord, NewMovement, Reservation, StockKey, StockRecord,
};
use shared::DateRange;

mod memory;
mod postgres;

pub use memory::MemoryInventoryStore;
pub use postgres::PgInventoryStore;

/// Backing store for stock records, lots, movements and reservations
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Open a unit of work
    async fn begin(&self) -> AppResult<Box<dyn InventoryTx>>;

    // ---- reads (no locks) ----

    async fn find_stock(&self, key: StockKey) -> AppResult<Option<StockRecord>>;

    /// Every stock record of the variant, whatever the warehouse state
    async fn stock_for_variant(&self, workspace_id: Uuid, variant_id: Uuid)
        -> AppResult<Vec<StockRecord>>;

    /// Stock records of the variant at active warehouses only
    async fn eligible_stock(&self, workspace_id: Uuid, variant_id: Uuid)
        -> AppResult<Vec<StockRecord>>;

    /// Distinct variants holding a stock record in the workspace
    async fn workspace_variants(&self, workspace_id: Uuid) -> AppResult<Vec<Uuid>>;

    /// The cached aggregate counter on the variant
    async fn variant_on_hand(&self, workspace_id: Uuid, variant_id: Uuid) -> AppResult<i64>;

    async fn find_lot(&self, workspace_id: Uuid, lot_id: Uuid) -> AppResult<Option<Lot>>;

    async fn lots_at(
        &self,
        workspace_id: Uuid,
        variant_id: Uuid,
        warehouse_id: Uuid,
    ) -> AppResult<Vec<Lot>>;

    async fn workspace_lots(&self, workspace_id: Uuid) -> AppResult<Vec<Lot>>;

    /// Up to `limit + 1` movements of a lot, newest first
    async fn lot_movements(
        &self,
        workspace_id: Uuid,
        lot_id: Uuid,
        cursor: MovementCursor,
        limit: usize,
    ) -> AppResult<Vec<MovementRecord>>;

    /// Up to `limit + 1` movements recorded inside `range`, newest first
    async fn movements_between(
        &self,
        workspace_id: Uuid,
        range: DateRange,
        cursor: MovementCursor,
        limit: usize,
    ) -> AppResult<Vec<MovementRecord>>;

    /// Sum of every movement delta booked against a lot
    async fn lot_movement_total(&self, workspace_id: Uuid, lot_id: Uuid) -> AppResult<i64>;

    async fn find_reservation(
        &self,
        workspace_id: Uuid,
        reservation_id: Uuid,
    ) -> AppResult<Option<Reservation>>;
}

/// One atomic unit of work against the store
#[async_trait]
pub trait InventoryTx: Send {
    /// Lock the record, creating it at zero on first reference
    async fn lock_stock(&mut self, key: StockKey) -> AppResult<StockRecord>;

    /// Lock every record of the variant held at an active warehouse, in
    /// warehouse id order
    async fn lock_variant_stock(
        &mut self,
        workspace_id: Uuid,
        variant_id: Uuid,
    ) -> AppResult<Vec<StockRecord>>;

    async fn save_stock(&mut self, record: &StockRecord) -> AppResult<()>;

    /// Recompute the variant aggregate from its stock records and persist
    /// it. Returns `(previous, current)`.
    async fn refresh_variant_total(
        &mut self,
        workspace_id: Uuid,
        variant_id: Uuid,
    ) -> AppResult<(i64, i64)>;

    /// Fails with `NotFound` when the lot is absent from the workspace
    async fn lock_lot(&mut self, workspace_id: Uuid, lot_id: Uuid) -> AppResult<Lot>;

    /// Lock all lots of a variant at a warehouse, in id order
    async fn lock_lots(
        &mut self,
        workspace_id: Uuid,
        variant_id: Uuid,
        warehouse_id: Uuid,
    ) -> AppResult<Vec<Lot>>;

    async fn lock_lot_by_batch(
        &mut self,
        workspace_id: Uuid,
        warehouse_id: Uuid,
        batch_id: &str,
    ) -> AppResult<Option<Lot>>;

    /// Fails with `DuplicateEntry` when the batch id is taken at the warehouse
    async fn insert_lot(&mut self, lot: &Lot) -> AppResult<()>;

    async fn save_lot(&mut self, lot: &Lot) -> AppResult<()>;

    async fn append_movement(&mut self, movement: NewMovement) -> AppResult<MovementRecord>;

    async fn insert_reservation(&mut self, reservation: &Reservation) -> AppResult<()>;

    async fn lock_reservation(
        &mut self,
        workspace_id: Uuid,
        reservation_id: Uuid,
    ) -> AppResult<Reservation>;

    async fn save_reservation(&mut self, reservation: &Reservation) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}
