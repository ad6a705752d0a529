//! Stock ledger service: per-warehouse levels, reservations and allocation

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::lot::{consume_line_lots, earmark_lots, MovementContext};
use super::{retry_on_conflict, Clock, SystemClock};
use crate::config::InventoryConfig;
use crate::error::{AppError, AppResult};
use crate::models::{
    allocate, available_warehouses, AllocationLine, MovementKind, MovementRecord, Reservation,
    ReservationLine, ReservationStatus, StockError, StockKey, StockRecord,
};
use crate::store::InventoryStore;

/// Inventory service for the per-warehouse stock ledger
#[derive(Clone)]
pub struct InventoryService {
    store: Arc<dyn InventoryStore>,
    settings: InventoryConfig,
    clock: Arc<dyn Clock>,
}

/// Input for reserving stock for one order line
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PlaceReservationInput {
    pub workspace_id: Uuid,
    pub order_ref: Uuid,
    pub variant_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i64,
}

/// A fulfilled reservation and the lot movements it wrote
#[derive(Debug, Clone, Serialize)]
pub struct FulfillmentReceipt {
    pub reservation: Reservation,
    pub movements: Vec<MovementRecord>,
}

/// Result of a best-effort cancellation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancellationOutcome {
    Released(Reservation),
    /// The reservation had already reached a terminal state
    AlreadySettled {
        reservation_id: Uuid,
        status: ReservationStatus,
    },
    /// Release failed; the reserved stock stays held until repaired
    Leaked {
        reservation_id: Uuid,
        error_code: String,
    },
}

impl CancellationOutcome {
    pub fn is_leaked(&self) -> bool {
        matches!(self, CancellationOutcome::Leaked { .. })
    }
}

impl InventoryService {
    /// Create a new InventoryService instance
    pub fn new(store: Arc<dyn InventoryStore>, settings: InventoryConfig) -> Self {
        Self {
            store,
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for lot expiry decisions
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, attempt: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = AppResult<T>>,
    {
        retry_on_conflict(
            operation,
            self.settings.max_conflict_retries,
            self.settings.retry_backoff(),
            attempt,
        )
        .await
    }

    // =========================================================================
    // Stock levels
    // =========================================================================

    /// Get the stock record for a key, creating it at zero on first reference
    pub async fn get_or_create(&self, key: StockKey) -> AppResult<StockRecord> {
        self.with_retry("get_or_create_stock", move || async move {
            let mut tx = self.store.begin().await?;
            let record = tx.lock_stock(key).await?;
            tx.commit().await?;
            Ok::<_, AppError>(record)
        })
        .await
    }

    /// Current stock record; an unknown key reads as empty
    pub async fn stock_level(&self, key: StockKey) -> AppResult<StockRecord> {
        Ok(self
            .store
            .find_stock(key)
            .await?
            .unwrap_or_else(|| StockRecord::empty(key)))
    }

    /// Cached on-hand counter of the variant
    pub async fn variant_on_hand(&self, workspace_id: Uuid, variant_id: Uuid) -> AppResult<i64> {
        self.store.variant_on_hand(workspace_id, variant_id).await
    }

    /// Apply a signed correction to on-hand stock
    #[tracing::instrument(skip(self, reason), fields(workspace_id = %key.workspace_id, variant_id = %key.variant_id, warehouse_id = %key.warehouse_id))]
    pub async fn adjust(
        &self,
        key: StockKey,
        delta: i64,
        reason: &str,
        performed_by: Uuid,
    ) -> AppResult<StockRecord> {
        let record = self
            .with_retry("adjust_stock", move || async move {
                let mut tx = self.store.begin().await?;
                let mut record = tx.lock_stock(key).await?;
                record.adjust(delta)?;
                tx.save_stock(&record).await?;
                tx.refresh_variant_total(key.workspace_id, key.variant_id)
                    .await?;
                tx.commit().await?;
                Ok::<_, AppError>(record)
            })
            .await?;

        tracing::info!(
            delta,
            quantity = record.quantity,
            reason,
            %performed_by,
            "Stock adjusted"
        );
        Ok(record)
    }

    /// Hold `quantity` of available stock at one warehouse
    #[tracing::instrument(skip(self), fields(workspace_id = %key.workspace_id, variant_id = %key.variant_id, warehouse_id = %key.warehouse_id))]
    pub async fn reserve(&self, key: StockKey, quantity: i64) -> AppResult<StockRecord> {
        let outcome = self
            .with_retry("reserve_stock", move || async move {
                let mut tx = self.store.begin().await?;
                let mut record = tx.lock_stock(key).await?;
                record.reserve(quantity)?;
                tx.save_stock(&record).await?;
                tx.commit().await?;
                Ok::<_, AppError>(record)
            })
            .await;

        if let Err(AppError::Stock(err @ StockError::InsufficientStock { .. })) = &outcome {
            tracing::warn!(quantity, "Reservation refused: {}", err);
        }
        outcome
    }

    /// Give back up to `quantity` of reserved stock. Releasing more than is
    /// reserved clamps to what is held. Returns the quantity released.
    #[tracing::instrument(skip(self), fields(workspace_id = %key.workspace_id, variant_id = %key.variant_id, warehouse_id = %key.warehouse_id))]
    pub async fn release(&self, key: StockKey, quantity: i64) -> AppResult<i64> {
        let released = self
            .with_retry("release_stock", move || async move {
                let mut tx = self.store.begin().await?;
                let mut record = tx.lock_stock(key).await?;
                let released = record.release(quantity)?;
                tx.save_stock(&record).await?;
                tx.commit().await?;
                Ok::<_, AppError>(released)
            })
            .await?;

        if released < quantity {
            tracing::debug!(requested = quantity, released, "Release clamped to reserved stock");
        }
        Ok(released)
    }

    /// Ship reserved stock out of one warehouse
    #[tracing::instrument(skip(self), fields(workspace_id = %key.workspace_id, variant_id = %key.variant_id, warehouse_id = %key.warehouse_id))]
    pub async fn fulfill(&self, key: StockKey, quantity: i64) -> AppResult<StockRecord> {
        let outcome = self
            .with_retry("fulfill_stock", move || async move {
                let mut tx = self.store.begin().await?;
                let mut record = tx.lock_stock(key).await?;
                record.fulfill(quantity)?;
                tx.save_stock(&record).await?;
                tx.refresh_variant_total(key.workspace_id, key.variant_id)
                    .await?;
                tx.commit().await?;
                Ok::<_, AppError>(record)
            })
            .await;

        if let Err(AppError::Stock(err @ StockError::InsufficientReservation { .. })) = &outcome {
            tracing::error!(quantity, "Fulfilment without a matching reservation: {}", err);
        }
        outcome
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Active-warehouse stock records with at least `min_quantity` available,
    /// fullest first
    pub async fn available_warehouses(
        &self,
        workspace_id: Uuid,
        variant_id: Uuid,
        min_quantity: i64,
    ) -> AppResult<Vec<StockRecord>> {
        let records = self.store.eligible_stock(workspace_id, variant_id).await?;
        Ok(available_warehouses(&records, min_quantity)
            .cloned()
            .collect())
    }

    /// Plan which warehouses cover `required` without reserving anything
    pub async fn allocate(
        &self,
        workspace_id: Uuid,
        variant_id: Uuid,
        required: i64,
    ) -> AppResult<Vec<AllocationLine>> {
        let records = self.store.eligible_stock(workspace_id, variant_id).await?;
        Ok(allocate(&records, required)?)
    }

    /// Reserve every line of a plan atomically; a single short line fails
    /// the whole plan.
    #[tracing::instrument(skip(self, lines))]
    pub async fn reserve_allocation(
        &self,
        workspace_id: Uuid,
        variant_id: Uuid,
        lines: &[AllocationLine],
    ) -> AppResult<Vec<StockRecord>> {
        let mut ordered = lines.to_vec();
        ordered.sort_by_key(|line| line.warehouse_id);
        let ordered = &ordered;

        self.with_retry("reserve_allocation", move || async move {
            let mut tx = self.store.begin().await?;
            let mut records = Vec::with_capacity(ordered.len());
            for line in ordered {
                let key = StockKey::new(workspace_id, variant_id, line.warehouse_id);
                let mut record = tx.lock_stock(key).await?;
                record.reserve(line.quantity)?;
                tx.save_stock(&record).await?;
                records.push(record);
            }
            tx.commit().await?;
            Ok::<_, AppError>(records)
        })
        .await
    }

    // =========================================================================
    // Reservation lifecycle
    // =========================================================================

    /// Get a reservation by id
    pub async fn get_reservation(
        &self,
        workspace_id: Uuid,
        reservation_id: Uuid,
    ) -> AppResult<Reservation> {
        self.store
            .find_reservation(workspace_id, reservation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Reservation".to_string()))
    }

    /// Allocate, reserve and (with lot tracking) earmark lots for one order
    /// line in a single unit of work
    #[tracing::instrument(skip(self, input), fields(workspace_id = %input.workspace_id, order_ref = %input.order_ref, variant_id = %input.variant_id))]
    pub async fn place_reservation(
        &self,
        input: PlaceReservationInput,
        performed_by: Uuid,
    ) -> AppResult<Reservation> {
        input.validate()?;

        let input = &input;
        let outcome = self
            .with_retry("place_reservation", move || self.try_place_reservation(input))
            .await;

        match &outcome {
            Ok(reservation) => tracing::info!(
                reservation_id = %reservation.id,
                quantity = reservation.quantity,
                warehouses = reservation.lines.len(),
                %performed_by,
                "Reservation placed"
            ),
            Err(err) if err.stock().map_or(false, StockError::is_shortage) => {
                tracing::warn!(quantity = input.quantity, "Reservation refused: {}", err)
            }
            Err(_) => {}
        }
        outcome
    }

    async fn try_place_reservation(&self, input: &PlaceReservationInput) -> AppResult<Reservation> {
        let mut tx = self.store.begin().await?;
        let mut records = tx
            .lock_variant_stock(input.workspace_id, input.variant_id)
            .await?;

        let mut plan = allocate(&records, input.quantity)?;
        plan.sort_by_key(|line| line.warehouse_id);

        for line in &plan {
            let record = records
                .iter_mut()
                .find(|r| r.warehouse_id == line.warehouse_id)
                .ok_or_else(|| AppError::Internal("Allocated warehouse vanished".to_string()))?;
            record.reserve(line.quantity)?;
            tx.save_stock(record).await?;
        }

        let tracked = self.settings.lot_tracking_enabled(input.workspace_id);
        let today = self.clock.today();
        let mut lines = Vec::with_capacity(plan.len());
        for line in plan {
            let lots = if tracked {
                let key = StockKey::new(input.workspace_id, input.variant_id, line.warehouse_id);
                earmark_lots(
                    tx.as_mut(),
                    key,
                    line.quantity,
                    today,
                    self.settings.near_expiry_days,
                )
                .await?
            } else {
                Vec::new()
            };
            lines.push(ReservationLine {
                warehouse_id: line.warehouse_id,
                quantity: line.quantity,
                lots,
            });
        }

        let reservation = Reservation::new(
            input.workspace_id,
            input.order_ref,
            input.variant_id,
            lines,
        );
        tx.insert_reservation(&reservation).await?;
        tx.commit().await?;
        Ok(reservation)
    }

    /// Ship a reservation: stock leaves every reserved warehouse and the
    /// earmarked lots are consumed
    #[tracing::instrument(skip(self))]
    pub async fn fulfill_reservation(
        &self,
        workspace_id: Uuid,
        reservation_id: Uuid,
        shipment_ref: Option<Uuid>,
        performed_by: Uuid,
    ) -> AppResult<FulfillmentReceipt> {
        let outcome = self
            .with_retry("fulfill_reservation", move || {
                self.try_fulfill_reservation(workspace_id, reservation_id, shipment_ref, performed_by)
            })
            .await;

        match &outcome {
            Ok(receipt) => tracing::info!(
                quantity = receipt.reservation.quantity,
                movements = receipt.movements.len(),
                "Reservation fulfilled"
            ),
            Err(AppError::Stock(err @ StockError::InsufficientReservation { .. })) => {
                tracing::error!("Reservation ledger out of step with stock: {}", err)
            }
            Err(err) if err.stock().map_or(false, StockError::is_shortage) => {
                tracing::warn!("Fulfilment refused: {}", err)
            }
            Err(_) => {}
        }
        outcome
    }

    async fn try_fulfill_reservation(
        &self,
        workspace_id: Uuid,
        reservation_id: Uuid,
        shipment_ref: Option<Uuid>,
        performed_by: Uuid,
    ) -> AppResult<FulfillmentReceipt> {
        let mut tx = self.store.begin().await?;
        let mut reservation = tx.lock_reservation(workspace_id, reservation_id).await?;
        reservation.transition(ReservationStatus::Fulfilled)?;
        reservation.lines.sort_by_key(|line| line.warehouse_id);

        for line in &reservation.lines {
            let key = StockKey::new(workspace_id, reservation.variant_id, line.warehouse_id);
            let mut record = tx.lock_stock(key).await?;
            record.fulfill(line.quantity)?;
            tx.save_stock(&record).await?;
        }

        let consume_lots = reservation.is_lot_tracked()
            || self.settings.lot_tracking_enabled(workspace_id);
        let mut movements = Vec::new();
        if consume_lots {
            let today = self.clock.today();
            let ctx = MovementContext {
                workspace_id,
                order_ref: Some(reservation.order_ref),
                shipment_ref,
                reason: "fulfilment",
                performed_by,
            };
            for line in reservation.lines.iter_mut() {
                let key = StockKey::new(workspace_id, reservation.variant_id, line.warehouse_id);
                let (drawn, written) = consume_line_lots(
                    tx.as_mut(),
                    key,
                    MovementKind::Out,
                    line.quantity,
                    &line.lots,
                    today,
                    self.settings.near_expiry_days,
                    &ctx,
                )
                .await?;
                line.lots = drawn;
                movements.extend(written);
            }
        }

        tx.refresh_variant_total(workspace_id, reservation.variant_id)
            .await?;
        tx.save_reservation(&reservation).await?;
        tx.commit().await?;

        Ok(FulfillmentReceipt {
            reservation,
            movements,
        })
    }

    /// Give a reservation's stock and lot earmarks back. No movement is
    /// written since nothing left the warehouse.
    #[tracing::instrument(skip(self))]
    pub async fn release_reservation(
        &self,
        workspace_id: Uuid,
        reservation_id: Uuid,
        performed_by: Uuid,
    ) -> AppResult<Reservation> {
        let reservation = self
            .with_retry("release_reservation", move || {
                self.try_release_reservation(workspace_id, reservation_id)
            })
            .await?;

        tracing::info!(quantity = reservation.quantity, %performed_by, "Reservation released");
        Ok(reservation)
    }

    async fn try_release_reservation(
        &self,
        workspace_id: Uuid,
        reservation_id: Uuid,
    ) -> AppResult<Reservation> {
        let mut tx = self.store.begin().await?;
        let mut reservation = tx.lock_reservation(workspace_id, reservation_id).await?;
        reservation.transition(ReservationStatus::Released)?;
        reservation.lines.sort_by_key(|line| line.warehouse_id);

        for line in &reservation.lines {
            let key = StockKey::new(workspace_id, reservation.variant_id, line.warehouse_id);
            let mut record = tx.lock_stock(key).await?;
            record.release(line.quantity)?;
            tx.save_stock(&record).await?;
        }

        let mut earmarks: Vec<_> = reservation
            .lines
            .iter()
            .flat_map(|line| line.lots.iter().copied())
            .collect();
        earmarks.sort_by_key(|earmark| earmark.lot_id);
        for earmark in earmarks {
            let mut lot = tx.lock_lot(workspace_id, earmark.lot_id).await?;
            lot.release_earmark(earmark.quantity);
            tx.save_lot(&lot).await?;
        }

        tx.save_reservation(&reservation).await?;
        tx.commit().await?;
        Ok(reservation)
    }

    /// Release for the order-cancellation path. Never fails: a release that
    /// cannot complete is logged and reported as leaked stock.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_reservation(
        &self,
        workspace_id: Uuid,
        reservation_id: Uuid,
        performed_by: Uuid,
    ) -> CancellationOutcome {
        match self
            .release_reservation(workspace_id, reservation_id, performed_by)
            .await
        {
            Ok(reservation) => CancellationOutcome::Released(reservation),
            Err(AppError::Stock(StockError::InvalidTransition { from, .. })) => {
                tracing::info!(status = %from, "Cancelled reservation was already settled");
                CancellationOutcome::AlreadySettled {
                    reservation_id,
                    status: from,
                }
            }
            Err(err) => {
                tracing::error!(
                    error_code = err.code(),
                    "Cancellation could not release reserved stock: {}",
                    err
                );
                CancellationOutcome::Leaked {
                    reservation_id,
                    error_code: err.code().to_string(),
                }
            }
        }
    }
}
