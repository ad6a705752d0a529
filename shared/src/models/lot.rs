//! Lot ledger: physical batches with expiry and quality state

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ensure_positive, StockError};

/// Days before expiry at which a lot turns to `Warning`
pub const NEAR_EXPIRY_DAYS: i64 = 30;

/// Quality state of a lot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityStatus {
    Normal,
    Warning,
    Expired,
    Recalled,
    Quarantined,
}

impl QualityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityStatus::Normal => "normal",
            QualityStatus::Warning => "warning",
            QualityStatus::Expired => "expired",
            QualityStatus::Recalled => "recalled",
            QualityStatus::Quarantined => "quarantined",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(QualityStatus::Normal),
            "warning" => Some(QualityStatus::Warning),
            "expired" => Some(QualityStatus::Expired),
            "recalled" => Some(QualityStatus::Recalled),
            "quarantined" => Some(QualityStatus::Quarantined),
            _ => None,
        }
    }

    /// Operator-set states. They stick until lifted and override expiry.
    pub fn is_hold(&self) -> bool {
        match self {
            QualityStatus::Recalled | QualityStatus::Quarantined => true,
            QualityStatus::Normal | QualityStatus::Warning | QualityStatus::Expired => false,
        }
    }

    pub fn is_consumable(&self) -> bool {
        match self {
            QualityStatus::Normal | QualityStatus::Warning => true,
            QualityStatus::Expired | QualityStatus::Recalled | QualityStatus::Quarantined => false,
        }
    }
}

impl std::fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Manual states an operator may set on a lot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityHold {
    Recalled,
    Quarantined,
}

impl QualityHold {
    pub fn status(&self) -> QualityStatus {
        match self {
            QualityHold::Recalled => QualityStatus::Recalled,
            QualityHold::Quarantined => QualityStatus::Quarantined,
        }
    }
}

/// A batch of one variant received together at one warehouse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub variant_id: Uuid,
    pub warehouse_id: Uuid,
    /// Batch identifier, unique per workspace and warehouse
    pub batch_id: String,
    pub manufactured_on: NaiveDate,
    /// `None` for non-perishable goods
    pub expires_on: Option<NaiveDate>,
    pub quantity: i64,
    pub reserved: i64,
    pub purchase_cost: Option<Decimal>,
    pub quality_status: QualityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when stock is received
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLot {
    pub workspace_id: Uuid,
    pub variant_id: Uuid,
    pub warehouse_id: Uuid,
    pub batch_id: String,
    pub manufactured_on: NaiveDate,
    pub expires_on: Option<NaiveDate>,
    pub quantity: i64,
    pub purchase_cost: Option<Decimal>,
}

impl Lot {
    /// Build an empty lot from receipt details. The received quantity is
    /// booked afterwards through an `in` movement.
    pub fn open(new: &NewLot, today: NaiveDate, warning_window: i64) -> Self {
        let now = Utc::now();
        let mut lot = Self {
            id: Uuid::new_v4(),
            workspace_id: new.workspace_id,
            variant_id: new.variant_id,
            warehouse_id: new.warehouse_id,
            batch_id: new.batch_id.clone(),
            manufactured_on: new.manufactured_on,
            expires_on: new.expires_on,
            quantity: 0,
            reserved: 0,
            purchase_cost: new.purchase_cost,
            quality_status: QualityStatus::Normal,
            created_at: now,
            updated_at: now,
        };
        lot.quality_status = lot.derived_status(today, warning_window);
        lot
    }

    /// Same batch at another warehouse, used as a transfer destination
    pub fn sibling_at(&self, warehouse_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            warehouse_id,
            quantity: 0,
            reserved: 0,
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn available(&self) -> i64 {
        self.quantity - self.reserved
    }

    pub fn days_to_expiry(&self, today: NaiveDate) -> Option<i64> {
        self.expires_on.map(|expiry| (expiry - today).num_days())
    }

    pub fn is_near_expiry(&self, today: NaiveDate) -> bool {
        self.is_expiring_within(today, NEAR_EXPIRY_DAYS)
    }

    pub fn is_expiring_within(&self, today: NaiveDate, days: i64) -> bool {
        matches!(self.days_to_expiry(today), Some(d) if (0..=days).contains(&d))
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        matches!(self.days_to_expiry(today), Some(d) if d < 0)
    }

    /// Status implied by the dates alone
    pub fn expiry_status(&self, today: NaiveDate, warning_window: i64) -> QualityStatus {
        match self.days_to_expiry(today) {
            None => QualityStatus::Normal,
            Some(d) if d < 0 => QualityStatus::Expired,
            Some(d) if d <= warning_window => QualityStatus::Warning,
            Some(_) => QualityStatus::Normal,
        }
    }

    /// Status the lot should carry today: a hold wins over expiry
    pub fn derived_status(&self, today: NaiveDate, warning_window: i64) -> QualityStatus {
        if self.quality_status.is_hold() {
            self.quality_status
        } else {
            self.expiry_status(today, warning_window)
        }
    }

    pub fn is_consumable(&self, today: NaiveDate, warning_window: i64) -> bool {
        self.derived_status(today, warning_window).is_consumable()
    }

    /// Re-derive the stored status. Returns true when it changed.
    pub fn refresh_status(&mut self, today: NaiveDate, warning_window: i64) -> bool {
        let status = self.derived_status(today, warning_window);
        if status == self.quality_status {
            return false;
        }
        self.quality_status = status;
        self.touch();
        true
    }

    /// Put the lot on recall or quarantine
    pub fn place_hold(&mut self, hold: QualityHold) {
        self.quality_status = hold.status();
        self.touch();
    }

    /// Drop a hold and fall back to the date-derived status
    pub fn lift_hold(&mut self, today: NaiveDate, warning_window: i64) {
        self.quality_status = self.expiry_status(today, warning_window);
        self.touch();
    }

    /// Promise part of the lot to a reservation without moving stock
    pub fn earmark(&mut self, quantity: i64) -> Result<(), StockError> {
        ensure_positive(quantity)?;
        if self.available() < quantity {
            return Err(self.shortage(quantity));
        }
        self.reserved += quantity;
        self.touch();
        Ok(())
    }

    /// Clamped, like the coarse ledger's release
    pub fn release_earmark(&mut self, quantity: i64) -> i64 {
        let released = quantity.clamp(0, self.reserved);
        self.reserved -= released;
        self.touch();
        released
    }

    /// Take stock out of the lot. With `earmarked` the quantity comes out of
    /// a prior earmark, otherwise out of the free balance.
    pub fn consume(&mut self, quantity: i64, earmarked: bool) -> Result<(), StockError> {
        ensure_positive(quantity)?;
        if earmarked {
            if self.reserved < quantity {
                return Err(StockError::InsufficientReservation {
                    reserved: self.reserved,
                    requested: quantity,
                });
            }
            self.reserved -= quantity;
        } else if self.available() < quantity {
            return Err(self.shortage(quantity));
        }
        self.quantity -= quantity;
        self.touch();
        Ok(())
    }

    /// Book incoming stock (receipt, return, inbound transfer)
    pub fn add(&mut self, quantity: i64) -> Result<(), StockError> {
        ensure_positive(quantity)?;
        self.quantity = self
            .quantity
            .checked_add(quantity)
            .ok_or_else(|| self.rejected(quantity))?;
        self.touch();
        Ok(())
    }

    /// Signed manual correction; cannot cut into earmarked stock
    pub fn adjust(&mut self, delta: i64) -> Result<(), StockError> {
        let quantity = self
            .quantity
            .checked_add(delta)
            .ok_or_else(|| self.rejected(delta))?;
        if delta == 0 || quantity < self.reserved {
            return Err(self.rejected(delta));
        }
        self.quantity = quantity;
        self.touch();
        Ok(())
    }

    pub fn is_consistent(&self) -> bool {
        0 <= self.reserved && self.reserved <= self.quantity
    }

    fn rejected(&self, delta: i64) -> StockError {
        StockError::InvalidAdjustment {
            quantity: self.quantity,
            reserved: self.reserved,
            delta,
        }
    }

    fn shortage(&self, requested: i64) -> StockError {
        StockError::InsufficientLotStock {
            lot_id: self.id,
            available: self.available(),
            requested,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
