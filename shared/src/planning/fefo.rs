//! First-expired-first-out lot selection

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

use crate::error::{ensure_positive, StockError};
use crate::models::Lot;

/// Quantity to take from one lot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotDraw {
    pub lot_id: Uuid,
    pub quantity: i64,
}

/// FEFO order: earliest expiry first with non-expiring lots last, then
/// oldest manufacture date, then creation time.
pub fn fefo_cmp(a: &Lot, b: &Lot) -> Ordering {
    let expiry = match (a.expires_on, b.expires_on) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    expiry
        .then_with(|| a.manufactured_on.cmp(&b.manufactured_on))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Lots that may be drawn from today, in FEFO order. Expired, recalled and
/// quarantined lots are skipped, as are lots with nothing available.
pub fn consumable_lots<'a>(
    lots: &'a [Lot],
    today: NaiveDate,
    warning_window: i64,
) -> impl Iterator<Item = &'a Lot> {
    let mut eligible: Vec<&Lot> = lots
        .iter()
        .filter(|lot| lot.available() > 0 && lot.is_consumable(today, warning_window))
        .collect();
    eligible.sort_by(|a, b| fefo_cmp(a, b));
    eligible.into_iter()
}

/// Plan draws covering `required` in FEFO order. Fails without a plan when
/// the eligible lots fall short.
pub fn select_for_consumption(
    lots: &[Lot],
    required: i64,
    today: NaiveDate,
    warning_window: i64,
) -> Result<Vec<LotDraw>, StockError> {
    ensure_positive(required)?;

    let mut remaining = required;
    let mut draws = Vec::new();
    let mut total_available = 0;
    for lot in consumable_lots(lots, today, warning_window) {
        total_available += lot.available();
        if remaining == 0 {
            continue;
        }
        let take = remaining.min(lot.available());
        draws.push(LotDraw {
            lot_id: lot.id,
            quantity: take,
        });
        remaining -= take;
    }

    if remaining > 0 {
        return Err(StockError::InsufficientStock {
            available: total_available,
            requested: required,
        });
    }
    Ok(draws)
}
