//! Lot ledger service: receipts, consumption, transfers and quality holds

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{retry_on_conflict, Clock, SystemClock};
use crate::config::InventoryConfig;
use crate::error::{AppError, AppResult};
use crate::models::{
    ensure_positive, fefo_cmp, select_for_consumption, Lot, LotDraw, LotEarmark, MovementKind,
    MovementRecord, NewLot, NewMovement, QualityHold, StockError, StockKey, StockRecord,
};
use crate::store::{InventoryStore, InventoryTx};

/// Lot service for receiving, consuming and tracing batches
#[derive(Clone)]
pub struct LotService {
    store: Arc<dyn InventoryStore>,
    settings: InventoryConfig,
    clock: Arc<dyn Clock>,
}

fn default_true() -> bool {
    true
}

fn default_out() -> MovementKind {
    MovementKind::Out
}

/// Input for receiving a batch
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReceiveLotInput {
    pub workspace_id: Uuid,
    pub variant_id: Uuid,
    pub warehouse_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub batch_id: String,
    pub manufactured_on: NaiveDate,
    pub expires_on: Option<NaiveDate>,
    #[validate(range(min = 1))]
    pub quantity: i64,
    pub purchase_cost: Option<Decimal>,
    /// Also book the quantity on the coarse stock record
    #[serde(default = "default_true")]
    pub sync_stock: bool,
}

/// Input for taking stock out of one lot
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ConsumeLotInput {
    pub workspace_id: Uuid,
    pub lot_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i64,
    pub kind: MovementKind,
    pub order_ref: Option<Uuid>,
    pub shipment_ref: Option<Uuid>,
    pub reason: String,
    #[serde(default = "default_true")]
    pub sync_stock: bool,
}

/// Input for FEFO consumption across a variant's lots at one warehouse
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ConsumeFefoInput {
    pub workspace_id: Uuid,
    pub variant_id: Uuid,
    pub warehouse_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i64,
    #[serde(default = "default_out")]
    pub kind: MovementKind,
    pub order_ref: Option<Uuid>,
    pub reason: String,
    #[serde(default = "default_true")]
    pub sync_stock: bool,
}

/// Input for moving stock of a batch to another warehouse
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TransferLotInput {
    pub workspace_id: Uuid,
    pub lot_id: Uuid,
    pub to_warehouse_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i64,
    pub reason: String,
}

/// Created lot with its opening movement
#[derive(Debug, Clone, Serialize)]
pub struct LotReceipt {
    pub lot: Lot,
    pub movement: MovementRecord,
}

/// Both sides of a transfer
#[derive(Debug, Clone, Serialize)]
pub struct TransferReceipt {
    pub source: Lot,
    pub destination: Lot,
    pub outbound: MovementRecord,
    pub inbound: MovementRecord,
}

/// Attribution carried onto every movement a unit of work writes
#[derive(Debug, Clone, Copy)]
pub(crate) struct MovementContext<'a> {
    pub workspace_id: Uuid,
    pub order_ref: Option<Uuid>,
    pub shipment_ref: Option<Uuid>,
    pub reason: &'a str,
    pub performed_by: Uuid,
}

/// Append one movement for a lot mutation
pub(crate) async fn record_movement(
    tx: &mut dyn InventoryTx,
    lot: &Lot,
    kind: MovementKind,
    delta: i64,
    ctx: &MovementContext<'_>,
) -> AppResult<MovementRecord> {
    if !kind.accepts_delta(delta) {
        return Err(AppError::Internal(format!(
            "Movement kind {} cannot carry delta {}",
            kind, delta
        )));
    }
    tx.append_movement(NewMovement {
        workspace_id: ctx.workspace_id,
        lot_id: lot.id,
        kind,
        delta,
        order_ref: ctx.order_ref,
        shipment_ref: ctx.shipment_ref,
        reason: ctx.reason.to_string(),
        performed_by: ctx.performed_by,
    })
    .await
}

/// Apply a signed delta to a coarse stock record inside a unit of work
pub(crate) async fn shift_stock(
    tx: &mut dyn InventoryTx,
    key: StockKey,
    delta: i64,
) -> AppResult<StockRecord> {
    let mut record = tx.lock_stock(key).await?;
    record.adjust(delta)?;
    tx.save_stock(&record).await?;
    Ok(record)
}

/// Take free stock off a locked warehouse record. A record that cannot
/// cover the quantity is a shortage, not a rejected correction.
fn withdraw_stock(record: &mut StockRecord, quantity: i64) -> Result<(), StockError> {
    let available = record.available();
    record
        .adjust(-quantity)
        .map_err(|_| StockError::InsufficientStock {
            available,
            requested: quantity,
        })
}

/// Earmark FEFO lots for `quantity` at one warehouse
pub(crate) async fn earmark_lots(
    tx: &mut dyn InventoryTx,
    key: StockKey,
    quantity: i64,
    today: NaiveDate,
    warning_window: i64,
) -> AppResult<Vec<LotEarmark>> {
    let lots = tx
        .lock_lots(key.workspace_id, key.variant_id, key.warehouse_id)
        .await?;
    let draws = select_for_consumption(&lots, quantity, today, warning_window)?;
    let mut by_id: HashMap<Uuid, Lot> = lots.into_iter().map(|l| (l.id, l)).collect();

    let mut earmarks = Vec::with_capacity(draws.len());
    for draw in draws {
        let lot = by_id
            .get_mut(&draw.lot_id)
            .ok_or_else(|| AppError::Internal("Planned lot vanished".to_string()))?;
        lot.earmark(draw.quantity)?;
        tx.save_lot(lot).await?;
        earmarks.push(LotEarmark {
            lot_id: draw.lot_id,
            quantity: draw.quantity,
        });
    }
    Ok(earmarks)
}

/// Consume the earmarked lots of one reservation line.
///
/// Earmarks on lots that stopped being consumable are dropped and the
/// shortfall is drawn FEFO from the remaining eligible lots. Returns the
/// lots actually drawn and the movements written.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn consume_line_lots(
    tx: &mut dyn InventoryTx,
    key: StockKey,
    kind: MovementKind,
    quantity: i64,
    earmarks: &[LotEarmark],
    today: NaiveDate,
    warning_window: i64,
    ctx: &MovementContext<'_>,
) -> AppResult<(Vec<LotEarmark>, Vec<MovementRecord>)> {
    let lots = tx
        .lock_lots(key.workspace_id, key.variant_id, key.warehouse_id)
        .await?;
    let mut by_id: HashMap<Uuid, Lot> = lots.into_iter().map(|l| (l.id, l)).collect();

    let mut drawn = Vec::new();
    let mut movements = Vec::new();
    let mut shortfall = quantity - earmarks.iter().map(|e| e.quantity).sum::<i64>();

    for earmark in earmarks {
        let lot = by_id
            .get_mut(&earmark.lot_id)
            .ok_or_else(|| AppError::NotFound(format!("Lot {}", earmark.lot_id)))?;
        if lot.is_consumable(today, warning_window) {
            lot.consume(earmark.quantity, true)?;
            tx.save_lot(lot).await?;
            movements.push(record_movement(tx, lot, kind, -earmark.quantity, ctx).await?);
            drawn.push(*earmark);
        } else {
            tracing::warn!(
                lot_id = %lot.id,
                status = %lot.derived_status(today, warning_window),
                quantity = earmark.quantity,
                "Earmarked lot no longer consumable, drawing a replacement"
            );
            lot.release_earmark(earmark.quantity);
            tx.save_lot(lot).await?;
            shortfall += earmark.quantity;
        }
    }

    if shortfall > 0 {
        let current: Vec<Lot> = by_id.values().cloned().collect();
        let draws: Vec<LotDraw> = select_for_consumption(&current, shortfall, today, warning_window)?;
        for draw in draws {
            let lot = by_id
                .get_mut(&draw.lot_id)
                .ok_or_else(|| AppError::Internal("Planned lot vanished".to_string()))?;
            lot.consume(draw.quantity, false)?;
            tx.save_lot(lot).await?;
            movements.push(record_movement(tx, lot, kind, -draw.quantity, ctx).await?);
            drawn.push(LotEarmark {
                lot_id: draw.lot_id,
                quantity: draw.quantity,
            });
        }
    }

    Ok((drawn, movements))
}

fn validate_reason(reason: &str) -> AppResult<()> {
    if reason.trim().is_empty() {
        return Err(AppError::Validation {
            field: "reason".to_string(),
            message: "Reason must not be empty".to_string(),
        });
    }
    Ok(())
}

impl LotService {
    /// Create a new LotService instance
    pub fn new(store: Arc<dyn InventoryStore>, settings: InventoryConfig) -> Self {
        Self {
            store,
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for expiry decisions
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn warning_window(&self) -> i64 {
        self.settings.near_expiry_days
    }

    /// Get a lot by id
    pub async fn get_lot(&self, workspace_id: Uuid, lot_id: Uuid) -> AppResult<Lot> {
        self.store
            .find_lot(workspace_id, lot_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Lot".to_string()))
    }

    /// All lots of a variant at a warehouse, in FEFO order
    pub async fn list_lots(
        &self,
        workspace_id: Uuid,
        variant_id: Uuid,
        warehouse_id: Uuid,
    ) -> AppResult<Vec<Lot>> {
        let mut lots = self
            .store
            .lots_at(workspace_id, variant_id, warehouse_id)
            .await?;
        lots.sort_by(fefo_cmp);
        Ok(lots)
    }

    /// Receive a new batch and book its opening movement
    #[tracing::instrument(skip(self, input), fields(workspace_id = %input.workspace_id, batch_id = %input.batch_id))]
    pub async fn receive(&self, input: ReceiveLotInput, performed_by: Uuid) -> AppResult<LotReceipt> {
        input.validate()?;
        if matches!(input.expires_on, Some(expiry) if expiry < input.manufactured_on) {
            return Err(AppError::Validation {
                field: "expires_on".to_string(),
                message: "Expiry date precedes manufacture date".to_string(),
            });
        }

        let input = &input;
        let receipt = retry_on_conflict(
            "receive_lot",
            self.settings.max_conflict_retries,
            self.settings.retry_backoff(),
            move || self.try_receive(input, performed_by),
        )
        .await?;

        tracing::info!(
            lot_id = %receipt.lot.id,
            quantity = input.quantity,
            "Lot received"
        );
        Ok(receipt)
    }

    async fn try_receive(&self, input: &ReceiveLotInput, performed_by: Uuid) -> AppResult<LotReceipt> {
        let mut tx = self.store.begin().await?;
        let key = StockKey::new(input.workspace_id, input.variant_id, input.warehouse_id);

        if input.sync_stock {
            shift_stock(tx.as_mut(), key, input.quantity).await?;
        }

        if tx
            .lock_lot_by_batch(input.workspace_id, input.warehouse_id, &input.batch_id)
            .await?
            .is_some()
        {
            return Err(AppError::DuplicateEntry("batch_id".to_string()));
        }

        let new_lot = NewLot {
            workspace_id: input.workspace_id,
            variant_id: input.variant_id,
            warehouse_id: input.warehouse_id,
            batch_id: input.batch_id.clone(),
            manufactured_on: input.manufactured_on,
            expires_on: input.expires_on,
            quantity: input.quantity,
            purchase_cost: input.purchase_cost,
        };
        let mut lot = Lot::open(&new_lot, self.clock.today(), self.warning_window());
        lot.add(new_lot.quantity)?;
        tx.insert_lot(&lot).await?;

        let ctx = MovementContext {
            workspace_id: input.workspace_id,
            order_ref: None,
            shipment_ref: None,
            reason: "receipt",
            performed_by,
        };
        let movement =
            record_movement(tx.as_mut(), &lot, MovementKind::In, new_lot.quantity, &ctx).await?;

        if input.sync_stock {
            tx.refresh_variant_total(input.workspace_id, input.variant_id)
                .await?;
        }
        tx.commit().await?;

        Ok(LotReceipt { lot, movement })
    }

    /// Take stock out of one lot
    #[tracing::instrument(skip(self, input), fields(workspace_id = %input.workspace_id, lot_id = %input.lot_id))]
    pub async fn consume(&self, input: ConsumeLotInput, performed_by: Uuid) -> AppResult<MovementRecord> {
        input.validate()?;
        validate_reason(&input.reason)?;
        if !matches!(input.kind, MovementKind::Out | MovementKind::Adjustment) {
            return Err(AppError::Validation {
                field: "kind".to_string(),
                message: format!("Lot consumption cannot book {} movements", input.kind),
            });
        }

        let input = &input;
        let movement = retry_on_conflict(
            "consume_lot",
            self.settings.max_conflict_retries,
            self.settings.retry_backoff(),
            move || self.try_consume(input, performed_by),
        )
        .await
        .map_err(|err| {
            if err.stock().map_or(false, StockError::is_shortage) {
                tracing::warn!(quantity = input.quantity, "Lot consumption refused: {}", err);
            }
            err
        })?;

        tracing::debug!(quantity = input.quantity, kind = %input.kind, "Lot consumed");
        Ok(movement)
    }

    async fn try_consume(&self, input: &ConsumeLotInput, performed_by: Uuid) -> AppResult<MovementRecord> {
        // Variant and warehouse never change on a lot, so an unlocked read is
        // enough to find the stock record to lock first.
        let located = self.get_lot(input.workspace_id, input.lot_id).await?;
        let key = StockKey::new(input.workspace_id, located.variant_id, located.warehouse_id);
        let today = self.clock.today();

        let mut tx = self.store.begin().await?;
        let mut record = if input.sync_stock {
            Some(tx.lock_stock(key).await?)
        } else {
            None
        };

        let mut lot = tx.lock_lot(input.workspace_id, input.lot_id).await?;
        // Write-offs of expired or held stock go through adjustments
        if input.kind == MovementKind::Out && !lot.is_consumable(today, self.warning_window()) {
            return Err(StockError::LotNotConsumable {
                lot_id: lot.id,
                status: lot.derived_status(today, self.warning_window()),
            }
            .into());
        }
        // Earmarked stock belongs to a reservation and leaves only through
        // its fulfilment
        lot.consume(input.quantity, false)?;
        if let Some(record) = record.as_mut() {
            withdraw_stock(record, input.quantity)?;
            tx.save_stock(record).await?;
        }
        tx.save_lot(&lot).await?;

        let ctx = MovementContext {
            workspace_id: input.workspace_id,
            order_ref: input.order_ref,
            shipment_ref: input.shipment_ref,
            reason: &input.reason,
            performed_by,
        };
        let movement =
            record_movement(tx.as_mut(), &lot, input.kind, -input.quantity, &ctx).await?;

        if input.sync_stock {
            tx.refresh_variant_total(input.workspace_id, key.variant_id)
                .await?;
        }
        tx.commit().await?;
        Ok(movement)
    }

    /// Plan FEFO draws without touching any lot
    pub async fn select_for_consumption(
        &self,
        workspace_id: Uuid,
        variant_id: Uuid,
        warehouse_id: Uuid,
        quantity: i64,
    ) -> AppResult<Vec<LotDraw>> {
        let lots = self
            .store
            .lots_at(workspace_id, variant_id, warehouse_id)
            .await?;
        Ok(select_for_consumption(
            &lots,
            quantity,
            self.clock.today(),
            self.warning_window(),
        )?)
    }

    /// Consume `quantity` FEFO across the variant's lots at a warehouse
    #[tracing::instrument(skip(self, input), fields(workspace_id = %input.workspace_id, variant_id = %input.variant_id, warehouse_id = %input.warehouse_id))]
    pub async fn consume_fefo(
        &self,
        input: ConsumeFefoInput,
        performed_by: Uuid,
    ) -> AppResult<Vec<MovementRecord>> {
        input.validate()?;
        validate_reason(&input.reason)?;
        if !matches!(input.kind, MovementKind::Out | MovementKind::Adjustment) {
            return Err(AppError::Validation {
                field: "kind".to_string(),
                message: format!("FEFO consumption cannot book {} movements", input.kind),
            });
        }

        let input = &input;
        retry_on_conflict(
            "consume_fefo",
            self.settings.max_conflict_retries,
            self.settings.retry_backoff(),
            move || self.try_consume_fefo(input, performed_by),
        )
        .await
    }

    async fn try_consume_fefo(
        &self,
        input: &ConsumeFefoInput,
        performed_by: Uuid,
    ) -> AppResult<Vec<MovementRecord>> {
        let key = StockKey::new(input.workspace_id, input.variant_id, input.warehouse_id);
        let mut tx = self.store.begin().await?;
        let mut record = if input.sync_stock {
            Some(tx.lock_stock(key).await?)
        } else {
            None
        };

        let ctx = MovementContext {
            workspace_id: input.workspace_id,
            order_ref: input.order_ref,
            shipment_ref: None,
            reason: &input.reason,
            performed_by,
        };
        let (_, movements) = consume_line_lots(
            tx.as_mut(),
            key,
            input.kind,
            input.quantity,
            &[],
            self.clock.today(),
            self.warning_window(),
            &ctx,
        )
        .await?;

        if let Some(record) = record.as_mut() {
            withdraw_stock(record, input.quantity)?;
            tx.save_stock(record).await?;
            tx.refresh_variant_total(input.workspace_id, input.variant_id)
                .await?;
        }
        tx.commit().await?;
        Ok(movements)
    }

    /// Manual correction of a lot's quantity
    #[tracing::instrument(skip(self, reason))]
    pub async fn adjust_lot(
        &self,
        workspace_id: Uuid,
        lot_id: Uuid,
        delta: i64,
        reason: &str,
        sync_stock: bool,
        performed_by: Uuid,
    ) -> AppResult<MovementRecord> {
        validate_reason(reason)?;
        retry_on_conflict(
            "adjust_lot",
            self.settings.max_conflict_retries,
            self.settings.retry_backoff(),
            move || {
                self.try_book_lot_delta(
                    workspace_id,
                    lot_id,
                    MovementKind::Adjustment,
                    delta,
                    None,
                    reason,
                    sync_stock,
                    performed_by,
                )
            },
        )
        .await
    }

    /// Book returned goods back onto their lot
    #[tracing::instrument(skip(self, reason))]
    pub async fn return_to_lot(
        &self,
        workspace_id: Uuid,
        lot_id: Uuid,
        quantity: i64,
        order_ref: Option<Uuid>,
        reason: &str,
        sync_stock: bool,
        performed_by: Uuid,
    ) -> AppResult<MovementRecord> {
        ensure_positive(quantity)?;
        validate_reason(reason)?;
        retry_on_conflict(
            "return_to_lot",
            self.settings.max_conflict_retries,
            self.settings.retry_backoff(),
            move || {
                self.try_book_lot_delta(
                    workspace_id,
                    lot_id,
                    MovementKind::Return,
                    quantity,
                    order_ref,
                    reason,
                    sync_stock,
                    performed_by,
                )
            },
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_book_lot_delta(
        &self,
        workspace_id: Uuid,
        lot_id: Uuid,
        kind: MovementKind,
        delta: i64,
        order_ref: Option<Uuid>,
        reason: &str,
        sync_stock: bool,
        performed_by: Uuid,
    ) -> AppResult<MovementRecord> {
        let located = self.get_lot(workspace_id, lot_id).await?;
        let key = StockKey::new(workspace_id, located.variant_id, located.warehouse_id);

        let mut tx = self.store.begin().await?;
        if sync_stock {
            shift_stock(tx.as_mut(), key, delta).await?;
        }

        let mut lot = tx.lock_lot(workspace_id, lot_id).await?;
        match kind {
            MovementKind::Return | MovementKind::In => lot.add(delta)?,
            MovementKind::Adjustment => lot.adjust(delta)?,
            MovementKind::Out | MovementKind::Transfer => {
                return Err(AppError::Internal(format!(
                    "{} movements are not booked as a plain delta",
                    kind
                )))
            }
        }
        tx.save_lot(&lot).await?;

        let ctx = MovementContext {
            workspace_id,
            order_ref,
            shipment_ref: None,
            reason,
            performed_by,
        };
        let movement = record_movement(tx.as_mut(), &lot, kind, delta, &ctx).await?;

        if sync_stock {
            tx.refresh_variant_total(workspace_id, key.variant_id)
                .await?;
        }
        tx.commit().await?;
        Ok(movement)
    }

    /// Move available stock of a batch to another warehouse
    #[tracing::instrument(skip(self, input), fields(workspace_id = %input.workspace_id, lot_id = %input.lot_id, to_warehouse_id = %input.to_warehouse_id))]
    pub async fn transfer_lot(
        &self,
        input: TransferLotInput,
        performed_by: Uuid,
    ) -> AppResult<TransferReceipt> {
        input.validate()?;
        validate_reason(&input.reason)?;

        let input = &input;
        let receipt = retry_on_conflict(
            "transfer_lot",
            self.settings.max_conflict_retries,
            self.settings.retry_backoff(),
            move || self.try_transfer(input, performed_by),
        )
        .await?;

        tracing::info!(
            destination_lot_id = %receipt.destination.id,
            quantity = input.quantity,
            "Lot stock transferred"
        );
        Ok(receipt)
    }

    async fn try_transfer(
        &self,
        input: &TransferLotInput,
        performed_by: Uuid,
    ) -> AppResult<TransferReceipt> {
        let located = self.get_lot(input.workspace_id, input.lot_id).await?;
        if located.warehouse_id == input.to_warehouse_id {
            return Err(AppError::Validation {
                field: "to_warehouse_id".to_string(),
                message: "Transfer destination is the lot's own warehouse".to_string(),
            });
        }
        let from_key = StockKey::new(input.workspace_id, located.variant_id, located.warehouse_id);
        let to_key = StockKey::new(input.workspace_id, located.variant_id, input.to_warehouse_id);

        let mut tx = self.store.begin().await?;

        // Stock records first, in warehouse order
        let mut keys = [from_key, to_key];
        keys.sort_by_key(|key| key.warehouse_id);
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            records.push(tx.lock_stock(key).await?);
        }

        let mut source = tx.lock_lot(input.workspace_id, input.lot_id).await?;
        source.consume(input.quantity, false)?;
        tx.save_lot(&source).await?;

        for record in records.iter_mut() {
            if record.warehouse_id == from_key.warehouse_id {
                withdraw_stock(record, input.quantity)?;
            } else {
                record.adjust(input.quantity)?;
            }
            tx.save_stock(record).await?;
        }

        let mut destination = match tx
            .lock_lot_by_batch(input.workspace_id, input.to_warehouse_id, &source.batch_id)
            .await?
        {
            Some(existing) if existing.variant_id != source.variant_id => {
                return Err(AppError::Validation {
                    field: "batch_id".to_string(),
                    message: "Batch id is used by another variant at the destination".to_string(),
                });
            }
            Some(existing) => existing,
            None => {
                let sibling = source.sibling_at(input.to_warehouse_id);
                tx.insert_lot(&sibling).await?;
                sibling
            }
        };
        destination.add(input.quantity)?;
        tx.save_lot(&destination).await?;

        let ctx = MovementContext {
            workspace_id: input.workspace_id,
            order_ref: None,
            shipment_ref: None,
            reason: &input.reason,
            performed_by,
        };
        let outbound =
            record_movement(tx.as_mut(), &source, MovementKind::Transfer, -input.quantity, &ctx)
                .await?;
        let inbound = record_movement(
            tx.as_mut(),
            &destination,
            MovementKind::Transfer,
            input.quantity,
            &ctx,
        )
        .await?;

        tx.refresh_variant_total(input.workspace_id, located.variant_id)
            .await?;
        tx.commit().await?;

        Ok(TransferReceipt {
            source,
            destination,
            outbound,
            inbound,
        })
    }

    /// Recall or quarantine a lot. It stops being drawn from immediately.
    #[tracing::instrument(skip(self))]
    pub async fn place_quality_hold(
        &self,
        workspace_id: Uuid,
        lot_id: Uuid,
        hold: QualityHold,
        performed_by: Uuid,
    ) -> AppResult<Lot> {
        let lot = retry_on_conflict(
            "place_quality_hold",
            self.settings.max_conflict_retries,
            self.settings.retry_backoff(),
            move || async move {
                let mut tx = self.store.begin().await?;
                let mut lot = tx.lock_lot(workspace_id, lot_id).await?;
                lot.place_hold(hold);
                tx.save_lot(&lot).await?;
                tx.commit().await?;
                Ok::<_, AppError>(lot)
            },
        )
        .await?;

        tracing::info!(status = %lot.quality_status, %performed_by, "Quality hold placed");
        Ok(lot)
    }

    /// Lift a recall or quarantine; the lot returns to its date-derived status
    #[tracing::instrument(skip(self))]
    pub async fn lift_quality_hold(
        &self,
        workspace_id: Uuid,
        lot_id: Uuid,
        performed_by: Uuid,
    ) -> AppResult<Lot> {
        let today = self.clock.today();
        let window = self.warning_window();
        let lot = retry_on_conflict(
            "lift_quality_hold",
            self.settings.max_conflict_retries,
            self.settings.retry_backoff(),
            move || async move {
                let mut tx = self.store.begin().await?;
                let mut lot = tx.lock_lot(workspace_id, lot_id).await?;
                lot.lift_hold(today, window);
                tx.save_lot(&lot).await?;
                tx.commit().await?;
                Ok::<_, AppError>(lot)
            },
        )
        .await?;

        tracing::info!(status = %lot.quality_status, %performed_by, "Quality hold lifted");
        Ok(lot)
    }

    /// Persist the date-derived status of every lot in the workspace.
    /// Returns how many lots changed status.
    #[tracing::instrument(skip(self))]
    pub async fn refresh_quality(&self, workspace_id: Uuid) -> AppResult<usize> {
        let today = self.clock.today();
        let window = self.warning_window();
        let stale: Vec<Uuid> = self
            .store
            .workspace_lots(workspace_id)
            .await?
            .into_iter()
            .filter(|lot| lot.derived_status(today, window) != lot.quality_status)
            .map(|lot| lot.id)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let stale = &stale;
        let changed = retry_on_conflict(
            "refresh_quality",
            self.settings.max_conflict_retries,
            self.settings.retry_backoff(),
            move || async move {
                let mut tx = self.store.begin().await?;
                let mut changed = 0;
                for lot_id in stale {
                    let mut lot = tx.lock_lot(workspace_id, *lot_id).await?;
                    if lot.refresh_status(today, window) {
                        tx.save_lot(&lot).await?;
                        changed += 1;
                    }
                }
                tx.commit().await?;
                Ok::<_, AppError>(changed)
            },
        )
        .await?;

        tracing::info!(changed, "Lot quality statuses refreshed");
        Ok(changed)
    }

    /// Lots with stock left that expire within `within_days`, soonest first
    pub async fn expiring_lots(&self, workspace_id: Uuid, within_days: i64) -> AppResult<Vec<Lot>> {
        let today = self.clock.today();
        let mut lots: Vec<Lot> = self
            .store
            .workspace_lots(workspace_id)
            .await?
            .into_iter()
            .filter(|lot| {
                lot.available() > 0
                    && !lot.quality_status.is_hold()
                    && lot.is_expiring_within(today, within_days)
            })
            .collect();
        lots.sort_by(fefo_cmp);
        Ok(lots)
    }
}
