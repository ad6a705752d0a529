//! Inventory engine services
//!
//! The services are the only writers of the stock and lot ledgers. Each
//! mutating operation runs as one unit of work on the store and is retried
//! a bounded number of times when the store reports a concurrency conflict.

use std::future::Future;
use std::time::Duration;

use chrono::{NaiveDate, Utc};

use crate::error::{AppError, AppResult};

pub mod inventory;
pub mod lot;
pub mod maintenance;
pub mod movement;

pub use inventory::InventoryService;
pub use lot::LotService;
pub use maintenance::MaintenanceService;
pub use movement::MovementService;

/// Source of "today" for expiry decisions
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Wall-clock date in UTC
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// A clock pinned to one date
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// Run `attempt` until it stops failing with `Conflict`, at most
/// `max_retries` extra times, backing off linearly between attempts.
pub async fn retry_on_conflict<T, F, Fut>(
    operation: &'static str,
    max_retries: u32,
    backoff: Duration,
    mut attempt: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut retries = 0;
    loop {
        match attempt().await {
            Err(AppError::Conflict { resource, message }) if retries < max_retries => {
                retries += 1;
                tracing::warn!(
                    operation,
                    retries,
                    resource = %resource,
                    "Concurrent write conflict, retrying: {}",
                    message
                );
                tokio::time::sleep(backoff * retries).await;
            }
            outcome => return outcome,
        }
    }
}
