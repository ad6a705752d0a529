//! Append-only movement log entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Actor recorded on movements written by maintenance jobs
pub const SYSTEM_ACTOR: Uuid = Uuid::nil();

/// Kinds of lot movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    In,
    Out,
    Transfer,
    Adjustment,
    Return,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::In => "in",
            MovementKind::Out => "out",
            MovementKind::Transfer => "transfer",
            MovementKind::Adjustment => "adjustment",
            MovementKind::Return => "return",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "in" => Some(MovementKind::In),
            "out" => Some(MovementKind::Out),
            "transfer" => Some(MovementKind::Transfer),
            "adjustment" => Some(MovementKind::Adjustment),
            "return" => Some(MovementKind::Return),
            _ => None,
        }
    }

    /// Whether a delta of this sign is meaningful for the kind
    pub fn accepts_delta(&self, delta: i64) -> bool {
        match self {
            MovementKind::In | MovementKind::Return => delta > 0,
            MovementKind::Out => delta < 0,
            MovementKind::Transfer | MovementKind::Adjustment => delta != 0,
        }
    }
}

impl std::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A movement before the log assigns it an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub workspace_id: Uuid,
    pub lot_id: Uuid,
    pub kind: MovementKind,
    /// Positive for increases, negative for decreases
    pub delta: i64,
    pub order_ref: Option<Uuid>,
    pub shipment_ref: Option<Uuid>,
    pub reason: String,
    pub performed_by: Uuid,
}

/// An immutable movement log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub id: i64,
    pub workspace_id: Uuid,
    pub lot_id: Uuid,
    pub kind: MovementKind,
    pub delta: i64,
    pub order_ref: Option<Uuid>,
    pub shipment_ref: Option<Uuid>,
    pub reason: String,
    pub performed_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl MovementRecord {
    pub fn from_new(id: i64, movement: NewMovement, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            workspace_id: movement.workspace_id,
            lot_id: movement.lot_id,
            kind: movement.kind,
            delta: movement.delta,
            order_ref: movement.order_ref,
            shipment_ref: movement.shipment_ref,
            reason: movement.reason,
            performed_by: movement.performed_by,
            created_at,
        }
    }
}

/// Position in a newest-first movement sequence. Pass `next_cursor` from the
/// previous page to continue; `MovementCursor::start()` begins at the newest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementCursor {
    pub before_id: Option<i64>,
}

impl MovementCursor {
    pub fn start() -> Self {
        Self::default()
    }

    pub fn admits(&self, id: i64) -> bool {
        self.before_id.map_or(true, |before| id < before)
    }
}

/// One page of movements, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementPage {
    pub items: Vec<MovementRecord>,
    /// `None` once the sequence is exhausted
    pub next_cursor: Option<MovementCursor>,
}

impl MovementPage {
    /// Build a page from up to `limit + 1` rows fetched newest first
    pub fn from_rows(mut rows: Vec<MovementRecord>, limit: usize) -> Self {
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = match rows.last() {
            Some(last) if has_more => Some(MovementCursor {
                before_id: Some(last.id),
            }),
            _ => None,
        };
        Self {
            items: rows,
            next_cursor,
        }
    }
}

/// Movement totals set against a lot's current quantity.
///
/// Every lot opens at zero and receives its first stock through an `in`
/// movement, so the deltas must add up to the current quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotReconciliation {
    pub lot_id: Uuid,
    pub quantity: i64,
    pub movement_total: i64,
}

impl LotReconciliation {
    pub fn discrepancy(&self) -> i64 {
        self.quantity - self.movement_total
    }

    pub fn is_balanced(&self) -> bool {
        self.discrepancy() == 0
    }
}

/// Sum of signed deltas
pub fn movement_total<'a>(movements: impl IntoIterator<Item = &'a MovementRecord>) -> i64 {
    movements.into_iter().map(|m| m.delta).sum()
}
