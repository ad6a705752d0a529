//! Movement log reads and ledger reconciliation

use std::sync::Arc;

use futures::stream::{self, Stream, TryStreamExt};
use serde::Serialize;
use uuid::Uuid;

use super::retry_on_conflict;
use crate::config::InventoryConfig;
use crate::error::{AppError, AppResult};
use crate::models::{
    DateRange, LotReconciliation, MovementCursor, MovementPage, MovementRecord, StockKey,
    VariantTotals,
};
use crate::store::InventoryStore;

/// Largest page a caller may request
pub const MAX_PAGE_SIZE: usize = 500;

/// Movement service for history and reconciliation
#[derive(Clone)]
pub struct MovementService {
    store: Arc<dyn InventoryStore>,
    settings: InventoryConfig,
}

/// Coarse stock quantity set against the lots held at the same warehouse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StockLotDrift {
    pub key: StockKey,
    pub stock_quantity: i64,
    pub lot_quantity: i64,
}

impl StockLotDrift {
    /// Positive when the stock record holds more than its lots
    pub fn drift(&self) -> i64 {
        self.stock_quantity - self.lot_quantity
    }
}

fn page_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_PAGE_SIZE)
}

impl MovementService {
    /// Create a new MovementService instance
    pub fn new(store: Arc<dyn InventoryStore>, settings: InventoryConfig) -> Self {
        Self { store, settings }
    }

    /// One page of a lot's movements, newest first
    pub async fn lot_movements(
        &self,
        workspace_id: Uuid,
        lot_id: Uuid,
        cursor: MovementCursor,
        limit: usize,
    ) -> AppResult<MovementPage> {
        if self.store.find_lot(workspace_id, lot_id).await?.is_none() {
            return Err(AppError::NotFound("Lot".to_string()));
        }
        let limit = page_limit(limit);
        let rows = self
            .store
            .lot_movements(workspace_id, lot_id, cursor, limit)
            .await?;
        Ok(MovementPage::from_rows(rows, limit))
    }

    /// One page of the workspace's movements inside `range`, newest first
    pub async fn movements_between(
        &self,
        workspace_id: Uuid,
        range: DateRange,
        cursor: MovementCursor,
        limit: usize,
    ) -> AppResult<MovementPage> {
        if range.end < range.start {
            return Err(AppError::Validation {
                field: "range".to_string(),
                message: "Range ends before it starts".to_string(),
            });
        }
        let limit = page_limit(limit);
        let rows = self
            .store
            .movements_between(workspace_id, range, cursor, limit)
            .await?;
        Ok(MovementPage::from_rows(rows, limit))
    }

    /// A lot's full history as a lazy stream, fetched `page_size` rows at a time
    pub fn lot_history(
        &self,
        workspace_id: Uuid,
        lot_id: Uuid,
        page_size: usize,
    ) -> impl Stream<Item = AppResult<MovementRecord>> + '_ {
        stream::try_unfold(Some(MovementCursor::start()), move |cursor| async move {
            let Some(cursor) = cursor else {
                return Ok::<_, AppError>(None);
            };
            let page = self
                .lot_movements(workspace_id, lot_id, cursor, page_size)
                .await?;
            let items = stream::iter(page.items.into_iter().map(Ok::<_, AppError>));
            Ok(Some((items, page.next_cursor)))
        })
        .try_flatten()
    }

    /// Workspace movements inside `range` as a lazy stream
    pub fn history_between(
        &self,
        workspace_id: Uuid,
        range: DateRange,
        page_size: usize,
    ) -> impl Stream<Item = AppResult<MovementRecord>> + '_ {
        stream::try_unfold(Some(MovementCursor::start()), move |cursor| async move {
            let Some(cursor) = cursor else {
                return Ok::<_, AppError>(None);
            };
            let page = self
                .movements_between(workspace_id, range, cursor, page_size)
                .await?;
            let items = stream::iter(page.items.into_iter().map(Ok::<_, AppError>));
            Ok(Some((items, page.next_cursor)))
        })
        .try_flatten()
    }

    /// Movement total against the lot's current quantity
    pub async fn reconcile_lot(
        &self,
        workspace_id: Uuid,
        lot_id: Uuid,
    ) -> AppResult<LotReconciliation> {
        let lot = self
            .store
            .find_lot(workspace_id, lot_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Lot".to_string()))?;
        let movement_total = self.store.lot_movement_total(workspace_id, lot_id).await?;

        let reconciliation = LotReconciliation {
            lot_id,
            quantity: lot.quantity,
            movement_total,
        };
        if !reconciliation.is_balanced() {
            tracing::warn!(
                %lot_id,
                quantity = lot.quantity,
                movement_total,
                "Lot quantity disagrees with its movements"
            );
        }
        Ok(reconciliation)
    }

    /// Every lot of the workspace whose movements do not add up
    pub async fn unbalanced_lots(&self, workspace_id: Uuid) -> AppResult<Vec<LotReconciliation>> {
        let mut unbalanced = Vec::new();
        for lot in self.store.workspace_lots(workspace_id).await? {
            let movement_total = self.store.lot_movement_total(workspace_id, lot.id).await?;
            let reconciliation = LotReconciliation {
                lot_id: lot.id,
                quantity: lot.quantity,
                movement_total,
            };
            if !reconciliation.is_balanced() {
                unbalanced.push(reconciliation);
            }
        }
        Ok(unbalanced)
    }

    /// Recompute the variant aggregate from its stock records and rewrite it
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_variant(
        &self,
        workspace_id: Uuid,
        variant_id: Uuid,
    ) -> AppResult<VariantTotals> {
        let (previous, current) = retry_on_conflict(
            "reconcile_variant",
            self.settings.max_conflict_retries,
            self.settings.retry_backoff(),
            move || async move {
                let mut tx = self.store.begin().await?;
                let totals = tx.refresh_variant_total(workspace_id, variant_id).await?;
                tx.commit().await?;
                Ok::<_, AppError>(totals)
            },
        )
        .await?;

        let totals = VariantTotals {
            variant_id,
            previous,
            current,
        };
        if totals.drift() != 0 {
            tracing::warn!(
                previous,
                current,
                drift = totals.drift(),
                "Variant aggregate had drifted from its stock records"
            );
        }
        Ok(totals)
    }

    /// Coarse stock at a warehouse against the sum of its lots
    pub async fn stock_lot_drift(
        &self,
        workspace_id: Uuid,
        variant_id: Uuid,
        warehouse_id: Uuid,
    ) -> AppResult<StockLotDrift> {
        let key = StockKey::new(workspace_id, variant_id, warehouse_id);
        let stock_quantity = self
            .store
            .find_stock(key)
            .await?
            .map_or(0, |record| record.quantity);
        let lot_quantity = self
            .store
            .lots_at(workspace_id, variant_id, warehouse_id)
            .await?
            .iter()
            .map(|lot| lot.quantity)
            .sum();

        Ok(StockLotDrift {
            key,
            stock_quantity,
            lot_quantity,
        })
    }
}
