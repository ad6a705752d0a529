//! Coarse stock ledger: one record per variant and warehouse

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ensure_positive, StockError};

/// Identifies a stock record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub workspace_id: Uuid,
    pub variant_id: Uuid,
    pub warehouse_id: Uuid,
}

impl StockKey {
    pub fn new(workspace_id: Uuid, variant_id: Uuid, warehouse_id: Uuid) -> Self {
        Self {
            workspace_id,
            variant_id,
            warehouse_id,
        }
    }
}

/// On-hand and reserved quantity of a variant at one warehouse.
///
/// `0 <= reserved <= quantity` holds after every successful operation; a
/// failed operation leaves the record untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub workspace_id: Uuid,
    pub variant_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: i64,
    pub reserved: i64,
    pub updated_at: DateTime<Utc>,
}

impl StockRecord {
    /// A fresh record at zero, as created on first reference
    pub fn empty(key: StockKey) -> Self {
        Self {
            workspace_id: key.workspace_id,
            variant_id: key.variant_id,
            warehouse_id: key.warehouse_id,
            quantity: 0,
            reserved: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.workspace_id, self.variant_id, self.warehouse_id)
    }

    pub fn available(&self) -> i64 {
        self.quantity - self.reserved
    }

    /// Add a signed delta to the on-hand quantity.
    ///
    /// On-hand may never drop below what is already promised to orders.
    pub fn adjust(&mut self, delta: i64) -> Result<(), StockError> {
        let invalid = StockError::InvalidAdjustment {
            quantity: self.quantity,
            reserved: self.reserved,
            delta,
        };
        let quantity = self.quantity.checked_add(delta).ok_or_else(|| invalid.clone())?;
        if quantity < self.reserved {
            return Err(invalid);
        }
        self.quantity = quantity;
        self.touch();
        Ok(())
    }

    pub fn reserve(&mut self, quantity: i64) -> Result<(), StockError> {
        ensure_positive(quantity)?;
        if self.available() < quantity {
            return Err(StockError::InsufficientStock {
                available: self.available(),
                requested: quantity,
            });
        }
        self.reserved += quantity;
        self.touch();
        Ok(())
    }

    /// Retire up to `quantity` of the reservation. Over-release is clamped;
    /// the amount actually released is returned.
    pub fn release(&mut self, quantity: i64) -> Result<i64, StockError> {
        ensure_positive(quantity)?;
        let released = quantity.min(self.reserved);
        self.reserved -= released;
        self.touch();
        Ok(released)
    }

    /// Ship reserved stock: on-hand and reserved drop together.
    pub fn fulfill(&mut self, quantity: i64) -> Result<(), StockError> {
        ensure_positive(quantity)?;
        if self.reserved < quantity {
            return Err(StockError::InsufficientReservation {
                reserved: self.reserved,
                requested: quantity,
            });
        }
        self.quantity -= quantity;
        self.reserved -= quantity;
        self.touch();
        Ok(())
    }

    pub fn is_consistent(&self) -> bool {
        0 <= self.reserved && self.reserved <= self.quantity
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Cached on-hand total for a variant, as read by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantTotals {
    pub variant_id: Uuid,
    /// Value held by the counter before it was recomputed
    pub previous: i64,
    /// Sum of on-hand quantity across the variant's stock records
    pub current: i64,
}

impl VariantTotals {
    pub fn drift(&self) -> i64 {
        self.current - self.previous
    }
}

/// Sum of on-hand quantity across records
pub fn total_on_hand<'a>(records: impl IntoIterator<Item = &'a StockRecord>) -> i64 {
    records.into_iter().map(|r| r.quantity).sum()
}
