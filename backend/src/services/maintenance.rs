//! Periodic ledger upkeep: quality refresh, aggregate reconciliation and
//! near-expiry reporting

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use super::{LotService, MovementService};
use crate::error::AppResult;
use crate::store::InventoryStore;

/// Outcome of one maintenance sweep over a workspace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub workspace_id: Uuid,
    pub quality_changes: usize,
    pub variants_reconciled: usize,
    pub variants_drifted: usize,
    pub unbalanced_lots: usize,
    pub expiring_lots: usize,
}

/// Runs the maintenance jobs over the lot and movement services
#[derive(Clone)]
pub struct MaintenanceService {
    store: Arc<dyn InventoryStore>,
    lots: LotService,
    movements: MovementService,
    near_expiry_days: i64,
}

impl MaintenanceService {
    /// Create a new MaintenanceService instance
    pub fn new(
        store: Arc<dyn InventoryStore>,
        lots: LotService,
        movements: MovementService,
        near_expiry_days: i64,
    ) -> Self {
        Self {
            store,
            lots,
            movements,
            near_expiry_days,
        }
    }

    /// Run every job once over a workspace
    #[tracing::instrument(skip(self))]
    pub async fn run_sweep(&self, workspace_id: Uuid) -> AppResult<SweepReport> {
        let mut report = SweepReport {
            workspace_id,
            ..SweepReport::default()
        };

        report.quality_changes = self.lots.refresh_quality(workspace_id).await?;

        for variant_id in self.store.workspace_variants(workspace_id).await? {
            let totals = self
                .movements
                .reconcile_variant(workspace_id, variant_id)
                .await?;
            report.variants_reconciled += 1;
            if totals.drift() != 0 {
                report.variants_drifted += 1;
            }
        }

        let unbalanced = self.movements.unbalanced_lots(workspace_id).await?;
        for lot in &unbalanced {
            tracing::warn!(
                lot_id = %lot.lot_id,
                quantity = lot.quantity,
                movement_total = lot.movement_total,
                "Lot movements do not add up"
            );
        }
        report.unbalanced_lots = unbalanced.len();

        let expiring = self
            .lots
            .expiring_lots(workspace_id, self.near_expiry_days)
            .await?;
        report.expiring_lots = expiring.len();
        if !expiring.is_empty() {
            tracing::info!(
                count = expiring.len(),
                within_days = self.near_expiry_days,
                "Lots approaching expiry"
            );
        }

        tracing::debug!(?report, "Maintenance sweep finished");
        Ok(report)
    }
}
