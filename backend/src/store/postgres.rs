//! PostgreSQL store
//!
//! Mutations run inside one transaction per unit of work. Rows are locked
//! with `SELECT ... FOR UPDATE` before the engine reads them, so concurrent
//! check-and-update sequences on the same row are serialized by the
//! database. Multi-row locks are always taken in id order.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{types::Json, FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{InventoryStore, InventoryTx};
use crate::error::{AppError, AppResult};
use crate::models::{
    Lot, MovementCursor, MovementKind, MovementRecord, NewMovement, QualityStatus, Reservation,
    ReservationLine, ReservationStatus, StockKey, StockRecord,
};
use shared::DateRange;

const STOCK_COLUMNS: &str =
    "s.workspace_id, s.variant_id, s.warehouse_id, s.quantity, s.reserved, s.updated_at";

const LOT_COLUMNS: &str = "l.id, l.workspace_id, l.variant_id, l.warehouse_id, l.batch_id, \
     l.manufactured_on, l.expires_on, l.quantity, l.reserved, l.purchase_cost, \
     l.quality_status, l.created_at, l.updated_at";

const MOVEMENT_COLUMNS: &str = "id, workspace_id, lot_id, kind, delta, order_ref, shipment_ref, \
     reason, performed_by, created_at";

const RESERVATION_COLUMNS: &str =
    "id, workspace_id, order_ref, variant_id, quantity, status, lines, created_at, updated_at";

/// Row for stock record queries
#[derive(Debug, FromRow)]
struct StockRow {
    workspace_id: Uuid,
    variant_id: Uuid,
    warehouse_id: Uuid,
    quantity: i64,
    reserved: i64,
    updated_at: DateTime<Utc>,
}

impl From<StockRow> for StockRecord {
    fn from(row: StockRow) -> Self {
        Self {
            workspace_id: row.workspace_id,
            variant_id: row.variant_id,
            warehouse_id: row.warehouse_id,
            quantity: row.quantity,
            reserved: row.reserved,
            updated_at: row.updated_at,
        }
    }
}

/// Row for lot queries
#[derive(Debug, FromRow)]
struct LotRow {
    id: Uuid,
    workspace_id: Uuid,
    variant_id: Uuid,
    warehouse_id: Uuid,
    batch_id: String,
    manufactured_on: NaiveDate,
    expires_on: Option<NaiveDate>,
    quantity: i64,
    reserved: i64,
    purchase_cost: Option<Decimal>,
    quality_status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LotRow> for Lot {
    type Error = AppError;

    fn try_from(row: LotRow) -> Result<Self, Self::Error> {
        let quality_status = QualityStatus::from_str(&row.quality_status).ok_or_else(|| {
            AppError::Internal(format!("Unknown quality status '{}'", row.quality_status))
        })?;
        Ok(Self {
            id: row.id,
            workspace_id: row.workspace_id,
            variant_id: row.variant_id,
            warehouse_id: row.warehouse_id,
            batch_id: row.batch_id,
            manufactured_on: row.manufactured_on,
            expires_on: row.expires_on,
            quantity: row.quantity,
            reserved: row.reserved,
            purchase_cost: row.purchase_cost,
            quality_status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Row for movement queries
#[derive(Debug, FromRow)]
struct MovementRow {
    id: i64,
    workspace_id: Uuid,
    lot_id: Uuid,
    kind: String,
    delta: i64,
    order_ref: Option<Uuid>,
    shipment_ref: Option<Uuid>,
    reason: String,
    performed_by: Uuid,
    created_at: DateTime<Utc>,
}

impl TryFrom<MovementRow> for MovementRecord {
    type Error = AppError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let kind = MovementKind::from_str(&row.kind)
            .ok_or_else(|| AppError::Internal(format!("Unknown movement kind '{}'", row.kind)))?;
        Ok(Self {
            id: row.id,
            workspace_id: row.workspace_id,
            lot_id: row.lot_id,
            kind,
            delta: row.delta,
            order_ref: row.order_ref,
            shipment_ref: row.shipment_ref,
            reason: row.reason,
            performed_by: row.performed_by,
            created_at: row.created_at,
        })
    }
}

/// Row for reservation queries
#[derive(Debug, FromRow)]
struct ReservationRow {
    id: Uuid,
    workspace_id: Uuid,
    order_ref: Uuid,
    variant_id: Uuid,
    quantity: i64,
    status: String,
    lines: Json<Vec<ReservationLine>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = AppError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let status = ReservationStatus::from_str(&row.status).ok_or_else(|| {
            AppError::Internal(format!("Unknown reservation status '{}'", row.status))
        })?;
        Ok(Self {
            id: row.id,
            workspace_id: row.workspace_id,
            order_ref: row.order_ref,
            variant_id: row.variant_id,
            quantity: row.quantity,
            status,
            lines: row.lines.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn lots_from_rows(rows: Vec<LotRow>) -> AppResult<Vec<Lot>> {
    rows.into_iter().map(Lot::try_from).collect()
}

fn movements_from_rows(rows: Vec<MovementRow>) -> AppResult<Vec<MovementRecord>> {
    rows.into_iter().map(MovementRecord::try_from).collect()
}

/// Inventory store backed by PostgreSQL
#[derive(Clone)]
pub struct PgInventoryStore {
    db: PgPool,
    lock_timeout_ms: u64,
}

impl PgInventoryStore {
    /// Create a new store over a connection pool
    pub fn new(db: PgPool) -> Self {
        Self {
            db,
            lock_timeout_ms: 2000,
        }
    }

    /// Bound how long a transaction waits for a row lock
    pub fn with_lock_timeout(mut self, lock_timeout_ms: u64) -> Self {
        self.lock_timeout_ms = lock_timeout_ms;
        self
    }
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn begin(&self) -> AppResult<Box<dyn InventoryTx>> {
        let mut tx = self.db.begin().await?;
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn find_stock(&self, key: StockKey) -> AppResult<Option<StockRecord>> {
        let row = sqlx::query_as::<_, StockRow>(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_records s
             WHERE s.workspace_id = $1 AND s.variant_id = $2 AND s.warehouse_id = $3"
        ))
        .bind(key.workspace_id)
        .bind(key.variant_id)
        .bind(key.warehouse_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(StockRecord::from))
    }

    async fn stock_for_variant(
        &self,
        workspace_id: Uuid,
        variant_id: Uuid,
    ) -> AppResult<Vec<StockRecord>> {
        let rows = sqlx::query_as::<_, StockRow>(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_records s
             WHERE s.workspace_id = $1 AND s.variant_id = $2
             ORDER BY s.warehouse_id"
        ))
        .bind(workspace_id)
        .bind(variant_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(StockRecord::from).collect())
    }

    async fn eligible_stock(
        &self,
        workspace_id: Uuid,
        variant_id: Uuid,
    ) -> AppResult<Vec<StockRecord>> {
        let rows = sqlx::query_as::<_, StockRow>(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_records s
             JOIN warehouses w ON w.id = s.warehouse_id
             WHERE s.workspace_id = $1 AND s.variant_id = $2 AND w.is_active
             ORDER BY s.warehouse_id"
        ))
        .bind(workspace_id)
        .bind(variant_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(StockRecord::from).collect())
    }

    async fn workspace_variants(&self, workspace_id: Uuid) -> AppResult<Vec<Uuid>> {
        let variants = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT variant_id FROM stock_records WHERE workspace_id = $1 ORDER BY variant_id",
        )
        .bind(workspace_id)
        .fetch_all(&self.db)
        .await?;

        Ok(variants)
    }

    async fn variant_on_hand(&self, workspace_id: Uuid, variant_id: Uuid) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT stock_on_hand FROM variants WHERE id = $1 AND workspace_id = $2",
        )
        .bind(variant_id)
        .bind(workspace_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Variant".to_string()))
    }

    async fn find_lot(&self, workspace_id: Uuid, lot_id: Uuid) -> AppResult<Option<Lot>> {
        let row = sqlx::query_as::<_, LotRow>(&format!(
            "SELECT {LOT_COLUMNS} FROM lots l WHERE l.id = $1 AND l.workspace_id = $2"
        ))
        .bind(lot_id)
        .bind(workspace_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(Lot::try_from).transpose()
    }

    async fn lots_at(
        &self,
        workspace_id: Uuid,
        variant_id: Uuid,
        warehouse_id: Uuid,
    ) -> AppResult<Vec<Lot>> {
        let rows = sqlx::query_as::<_, LotRow>(&format!(
            "SELECT {LOT_COLUMNS} FROM lots l
             WHERE l.workspace_id = $1 AND l.variant_id = $2 AND l.warehouse_id = $3
             ORDER BY l.id"
        ))
        .bind(workspace_id)
        .bind(variant_id)
        .bind(warehouse_id)
        .fetch_all(&self.db)
        .await?;

        lots_from_rows(rows)
    }

    async fn workspace_lots(&self, workspace_id: Uuid) -> AppResult<Vec<Lot>> {
        let rows = sqlx::query_as::<_, LotRow>(&format!(
            "SELECT {LOT_COLUMNS} FROM lots l WHERE l.workspace_id = $1 ORDER BY l.id"
        ))
        .bind(workspace_id)
        .fetch_all(&self.db)
        .await?;

        lots_from_rows(rows)
    }

    async fn lot_movements(
        &self,
        workspace_id: Uuid,
        lot_id: Uuid,
        cursor: MovementCursor,
        limit: usize,
    ) -> AppResult<Vec<MovementRecord>> {
        let rows = sqlx::query_as::<_, MovementRow>(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM lot_movements
             WHERE workspace_id = $1 AND lot_id = $2 AND ($3::BIGINT IS NULL OR id < $3)
             ORDER BY id DESC
             LIMIT $4"
        ))
        .bind(workspace_id)
        .bind(lot_id)
        .bind(cursor.before_id)
        .bind(limit as i64 + 1)
        .fetch_all(&self.db)
        .await?;

        movements_from_rows(rows)
    }

    async fn movements_between(
        &self,
        workspace_id: Uuid,
        range: DateRange,
        cursor: MovementCursor,
        limit: usize,
    ) -> AppResult<Vec<MovementRecord>> {
        let (from, until) = range.bounds();
        let rows = sqlx::query_as::<_, MovementRow>(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM lot_movements
             WHERE workspace_id = $1 AND created_at >= $2 AND created_at < $3
               AND ($4::BIGINT IS NULL OR id < $4)
             ORDER BY id DESC
             LIMIT $5"
        ))
        .bind(workspace_id)
        .bind(from)
        .bind(until)
        .bind(cursor.before_id)
        .bind(limit as i64 + 1)
        .fetch_all(&self.db)
        .await?;

        movements_from_rows(rows)
    }

    async fn lot_movement_total(&self, workspace_id: Uuid, lot_id: Uuid) -> AppResult<i64> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(delta), 0)::BIGINT FROM lot_movements
             WHERE workspace_id = $1 AND lot_id = $2",
        )
        .bind(workspace_id)
        .bind(lot_id)
        .fetch_one(&self.db)
        .await?;

        Ok(total)
    }

    async fn find_reservation(
        &self,
        workspace_id: Uuid,
        reservation_id: Uuid,
    ) -> AppResult<Option<Reservation>> {
        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1 AND workspace_id = $2"
        ))
        .bind(reservation_id)
        .bind(workspace_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(Reservation::try_from).transpose()
    }
}

/// Unit of work wrapping a database transaction
struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl InventoryTx for PgTx {
    async fn lock_stock(&mut self, key: StockKey) -> AppResult<StockRecord> {
        sqlx::query(
            r#"
            INSERT INTO stock_records (workspace_id, variant_id, warehouse_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (workspace_id, variant_id, warehouse_id) DO NOTHING
            "#,
        )
        .bind(key.workspace_id)
        .bind(key.variant_id)
        .bind(key.warehouse_id)
        .execute(&mut *self.tx)
        .await?;

        let row = sqlx::query_as::<_, StockRow>(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_records s
             WHERE s.workspace_id = $1 AND s.variant_id = $2 AND s.warehouse_id = $3
             FOR UPDATE"
        ))
        .bind(key.workspace_id)
        .bind(key.variant_id)
        .bind(key.warehouse_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row.into())
    }

    async fn lock_variant_stock(
        &mut self,
        workspace_id: Uuid,
        variant_id: Uuid,
    ) -> AppResult<Vec<StockRecord>> {
        let rows = sqlx::query_as::<_, StockRow>(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock_records s
             JOIN warehouses w ON w.id = s.warehouse_id
             WHERE s.workspace_id = $1 AND s.variant_id = $2 AND w.is_active
             ORDER BY s.warehouse_id
             FOR UPDATE OF s"
        ))
        .bind(workspace_id)
        .bind(variant_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(StockRecord::from).collect())
    }

    async fn save_stock(&mut self, record: &StockRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE stock_records
            SET quantity = $4, reserved = $5, updated_at = $6
            WHERE workspace_id = $1 AND variant_id = $2 AND warehouse_id = $3
            "#,
        )
        .bind(record.workspace_id)
        .bind(record.variant_id)
        .bind(record.warehouse_id)
        .bind(record.quantity)
        .bind(record.reserved)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn refresh_variant_total(
        &mut self,
        workspace_id: Uuid,
        variant_id: Uuid,
    ) -> AppResult<(i64, i64)> {
        let previous = sqlx::query_scalar::<_, i64>(
            "SELECT stock_on_hand FROM variants WHERE id = $1 AND workspace_id = $2 FOR UPDATE",
        )
        .bind(variant_id)
        .bind(workspace_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Variant".to_string()))?;

        let current = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE variants
            SET stock_on_hand = (
                SELECT COALESCE(SUM(quantity), 0)::BIGINT FROM stock_records
                WHERE workspace_id = $2 AND variant_id = $1
            )
            WHERE id = $1 AND workspace_id = $2
            RETURNING stock_on_hand
            "#,
        )
        .bind(variant_id)
        .bind(workspace_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok((previous, current))
    }

    async fn lock_lot(&mut self, workspace_id: Uuid, lot_id: Uuid) -> AppResult<Lot> {
        let row = sqlx::query_as::<_, LotRow>(&format!(
            "SELECT {LOT_COLUMNS} FROM lots l
             WHERE l.id = $1 AND l.workspace_id = $2
             FOR UPDATE"
        ))
        .bind(lot_id)
        .bind(workspace_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Lot".to_string()))?;

        row.try_into()
    }

    async fn lock_lots(
        &mut self,
        workspace_id: Uuid,
        variant_id: Uuid,
        warehouse_id: Uuid,
    ) -> AppResult<Vec<Lot>> {
        let rows = sqlx::query_as::<_, LotRow>(&format!(
            "SELECT {LOT_COLUMNS} FROM lots l
             WHERE l.workspace_id = $1 AND l.variant_id = $2 AND l.warehouse_id = $3
             ORDER BY l.id
             FOR UPDATE"
        ))
        .bind(workspace_id)
        .bind(variant_id)
        .bind(warehouse_id)
        .fetch_all(&mut *self.tx)
        .await?;

        lots_from_rows(rows)
    }

    async fn lock_lot_by_batch(
        &mut self,
        workspace_id: Uuid,
        warehouse_id: Uuid,
        batch_id: &str,
    ) -> AppResult<Option<Lot>> {
        let row = sqlx::query_as::<_, LotRow>(&format!(
            "SELECT {LOT_COLUMNS} FROM lots l
             WHERE l.workspace_id = $1 AND l.warehouse_id = $2 AND l.batch_id = $3
             FOR UPDATE"
        ))
        .bind(workspace_id)
        .bind(warehouse_id)
        .bind(batch_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Lot::try_from).transpose()
    }

    async fn insert_lot(&mut self, lot: &Lot) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO lots (
                id, workspace_id, variant_id, warehouse_id, batch_id, manufactured_on,
                expires_on, quantity, reserved, purchase_cost, quality_status,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(lot.id)
        .bind(lot.workspace_id)
        .bind(lot.variant_id)
        .bind(lot.warehouse_id)
        .bind(&lot.batch_id)
        .bind(lot.manufactured_on)
        .bind(lot.expires_on)
        .bind(lot.quantity)
        .bind(lot.reserved)
        .bind(lot.purchase_cost)
        .bind(lot.quality_status.as_str())
        .bind(lot.created_at)
        .bind(lot.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn save_lot(&mut self, lot: &Lot) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE lots
            SET quantity = $3, reserved = $4, quality_status = $5, updated_at = $6
            WHERE id = $1 AND workspace_id = $2
            "#,
        )
        .bind(lot.id)
        .bind(lot.workspace_id)
        .bind(lot.quantity)
        .bind(lot.reserved)
        .bind(lot.quality_status.as_str())
        .bind(lot.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn append_movement(&mut self, movement: NewMovement) -> AppResult<MovementRecord> {
        let row = sqlx::query_as::<_, MovementRow>(&format!(
            "INSERT INTO lot_movements (
                workspace_id, lot_id, kind, delta, order_ref, shipment_ref, reason, performed_by
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {MOVEMENT_COLUMNS}"
        ))
        .bind(movement.workspace_id)
        .bind(movement.lot_id)
        .bind(movement.kind.as_str())
        .bind(movement.delta)
        .bind(movement.order_ref)
        .bind(movement.shipment_ref)
        .bind(&movement.reason)
        .bind(movement.performed_by)
        .fetch_one(&mut *self.tx)
        .await?;

        row.try_into()
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reservations (
                id, workspace_id, order_ref, variant_id, quantity, status, lines,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(reservation.id)
        .bind(reservation.workspace_id)
        .bind(reservation.order_ref)
        .bind(reservation.variant_id)
        .bind(reservation.quantity)
        .bind(reservation.status.as_str())
        .bind(Json(&reservation.lines))
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn lock_reservation(
        &mut self,
        workspace_id: Uuid,
        reservation_id: Uuid,
    ) -> AppResult<Reservation> {
        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations
             WHERE id = $1 AND workspace_id = $2
             FOR UPDATE"
        ))
        .bind(reservation_id)
        .bind(workspace_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Reservation".to_string()))?;

        row.try_into()
    }

    async fn save_reservation(&mut self, reservation: &Reservation) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE reservations
            SET status = $3, lines = $4, updated_at = $5
            WHERE id = $1 AND workspace_id = $2
            "#,
        )
        .bind(reservation.id)
        .bind(reservation.workspace_id)
        .bind(reservation.status.as_str())
        .bind(Json(&reservation.lines))
        .bind(reservation.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
