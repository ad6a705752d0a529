//! Multi-warehouse allocation over the coarse stock ledger

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ensure_positive, StockError};
use crate::models::StockRecord;

/// Quantity to take from one warehouse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub warehouse_id: Uuid,
    pub quantity: i64,
}

/// Records with at least `min_quantity` available, fullest warehouse first.
///
/// Ties fall back to available quantity, then warehouse id, so the order is
/// stable across calls.
pub fn available_warehouses(
    records: &[StockRecord],
    min_quantity: i64,
) -> impl Iterator<Item = &StockRecord> {
    let mut eligible: Vec<&StockRecord> = records
        .iter()
        .filter(|r| r.available() >= min_quantity)
        .collect();
    eligible.sort_by(|a, b| {
        b.quantity
            .cmp(&a.quantity)
            .then_with(|| b.available().cmp(&a.available()))
            .then_with(|| a.warehouse_id.cmp(&b.warehouse_id))
    });
    eligible.into_iter()
}

/// Cover `required` from as few warehouses as possible, largest available
/// first. All-or-nothing: a shortfall returns no lines at all.
pub fn allocate(records: &[StockRecord], required: i64) -> Result<Vec<AllocationLine>, StockError> {
    ensure_positive(required)?;

    let mut candidates: Vec<&StockRecord> = available_warehouses(records, 1).collect();
    let total_available: i64 = candidates.iter().map(|r| r.available()).sum();
    if total_available < required {
        return Err(StockError::InsufficientStock {
            available: total_available,
            requested: required,
        });
    }

    candidates.sort_by(|a, b| {
        b.available()
            .cmp(&a.available())
            .then_with(|| b.quantity.cmp(&a.quantity))
            .then_with(|| a.warehouse_id.cmp(&b.warehouse_id))
    });

    let mut remaining = required;
    let mut lines = Vec::new();
    for record in candidates {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(record.available());
        lines.push(AllocationLine {
            warehouse_id: record.warehouse_id,
            quantity: take,
        });
        remaining -= take;
    }

    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(warehouse: u128, quantity: i64, reserved: i64) -> StockRecord {
        let key = crate::models::StockKey::new(
            Uuid::from_u128(1),
            Uuid::from_u128(2),
            Uuid::from_u128(warehouse),
        );
        StockRecord {
            quantity,
            reserved,
            ..StockRecord::empty(key)
        }
    }

    // ========================================================================
    // Ordering Tests
    // ========================================================================

    #[test]
    fn test_available_warehouses_orders_by_on_hand() {
        let records = vec![record(1, 40, 0), record(2, 50, 30), record(3, 5, 5)];
        let order: Vec<u128> = available_warehouses(&records, 1)
            .map(|r| r.warehouse_id.as_u128())
            .collect();
        assert_eq!(order, vec![2, 1]);
    }

    #[test]
    fn test_available_warehouses_zero_threshold_keeps_empty_records() {
        let records = vec![record(1, 40, 0), record(2, 5, 5)];
        let order: Vec<u128> = available_warehouses(&records, 0)
            .map(|r| r.warehouse_id.as_u128())
            .collect();
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn test_allocate_prefers_largest_available() {
        let records = vec![record(1, 40, 0), record(2, 50, 30)];
        let lines = allocate(&records, 45).unwrap();
        assert_eq!(
            lines,
            vec![
                AllocationLine { warehouse_id: Uuid::from_u128(1), quantity: 40 },
                AllocationLine { warehouse_id: Uuid::from_u128(2), quantity: 5 },
            ]
        );
    }

    #[test]
    fn test_allocate_rejects_non_positive_quantity() {
        let records = vec![record(1, 10, 0)];
        assert!(allocate(&records, 0).is_err());
    }

    // ========================================================================
    // Property Tests
    // ========================================================================

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_allocation_is_all_or_nothing(
            levels in prop::collection::vec((0i64..100, 0i64..100), 1..6),
            required in 1i64..400,
        ) {
            let records: Vec<StockRecord> = levels
                .iter()
                .enumerate()
                .map(|(i, (quantity, reserved))| {
                    record(i as u128 + 1, quantity + reserved, *reserved)
                })
                .collect();
            let total: i64 = records.iter().map(|r| r.available()).sum();

            match allocate(&records, required) {
                Ok(lines) => {
                    prop_assert!(total >= required);
                    prop_assert_eq!(lines.iter().map(|l| l.quantity).sum::<i64>(), required);
                    for line in &lines {
                        let source = records
                            .iter()
                            .find(|r| r.warehouse_id == line.warehouse_id)
                            .unwrap();
                        prop_assert!(line.quantity > 0 && line.quantity <= source.available());
                    }
                }
                Err(StockError::InsufficientStock { available, requested }) => {
                    prop_assert_eq!(available, total);
                    prop_assert_eq!(requested, required);
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
        }
    }
}
