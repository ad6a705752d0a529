//! Reservation lifecycle: reserved -> fulfilled | released

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StockError;

/// State of a reservation. An order line without a reservation is
/// unreserved; `Fulfilled` and `Released` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Reserved,
    Fulfilled,
    Released,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Reserved => "reserved",
            ReservationStatus::Fulfilled => "fulfilled",
            ReservationStatus::Released => "released",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "reserved" => Some(ReservationStatus::Reserved),
            "fulfilled" => Some(ReservationStatus::Fulfilled),
            "released" => Some(ReservationStatus::Released),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            ReservationStatus::Reserved => false,
            ReservationStatus::Fulfilled | ReservationStatus::Released => true,
        }
    }

    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (ReservationStatus::Reserved, ReservationStatus::Fulfilled)
                | (ReservationStatus::Reserved, ReservationStatus::Released)
        )
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quantity promised out of one lot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotEarmark {
    pub lot_id: Uuid,
    pub quantity: i64,
}

/// Quantity promised at one warehouse
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationLine {
    pub warehouse_id: Uuid,
    pub quantity: i64,
    /// Empty when lot tracking was off at placement
    #[serde(default)]
    pub lots: Vec<LotEarmark>,
}

/// Stock promised to one order line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub order_ref: Uuid,
    pub variant_id: Uuid,
    pub quantity: i64,
    pub status: ReservationStatus,
    pub lines: Vec<ReservationLine>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(
        workspace_id: Uuid,
        order_ref: Uuid,
        variant_id: Uuid,
        lines: Vec<ReservationLine>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            order_ref,
            variant_id,
            quantity: lines.iter().map(|l| l.quantity).sum(),
            status: ReservationStatus::Reserved,
            lines,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting anything but reserved -> terminal
    pub fn transition(&mut self, next: ReservationStatus) -> Result<(), StockError> {
        if !self.status.can_transition_to(next) {
            return Err(StockError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_lot_tracked(&self) -> bool {
        self.lines.iter().any(|l| !l.lots.is_empty())
    }
}
