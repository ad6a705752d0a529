//! Domain errors raised by the ledger rules
//!
//! These carry no storage detail: the backend wraps them into its own
//! application error before they reach a caller.

use thiserror::Error;
use uuid::Uuid;

use crate::models::{QualityStatus, ReservationStatus};

/// Rule violations detected while applying a ledger operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StockError {
    #[error("Insufficient stock: {available} available, {requested} requested")]
    InsufficientStock { available: i64, requested: i64 },

    #[error("Insufficient reservation: {reserved} reserved, {requested} requested")]
    InsufficientReservation { reserved: i64, requested: i64 },

    #[error("Invalid adjustment: quantity {quantity} with {reserved} reserved cannot take delta {delta}")]
    InvalidAdjustment {
        quantity: i64,
        reserved: i64,
        delta: i64,
    },

    #[error("Insufficient stock in lot {lot_id}: {available} available, {requested} requested")]
    InsufficientLotStock {
        lot_id: Uuid,
        available: i64,
        requested: i64,
    },

    #[error("Lot {lot_id} cannot be consumed while {status}")]
    LotNotConsumable { lot_id: Uuid, status: QualityStatus },

    #[error("Quantity must be positive, got {0}")]
    InvalidQuantity(i64),

    #[error("Reservation cannot move from {from} to {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
}

impl StockError {
    /// Shortages are shown to the end user; everything else points at a bug
    /// or an operator mistake.
    pub fn is_shortage(&self) -> bool {
        matches!(
            self,
            StockError::InsufficientStock { .. } | StockError::InsufficientLotStock { .. }
        )
    }
}

/// Reject zero and negative quantities
pub fn ensure_positive(quantity: i64) -> Result<i64, StockError> {
    if quantity <= 0 {
        return Err(StockError::InvalidQuantity(quantity));
    }
    Ok(quantity)
}
