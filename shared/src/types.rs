//! Common types used across the engine

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Date range for movement queries, both ends inclusive
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let day = at.date_naive();
        self.start <= day && day <= self.end
    }

    /// Half-open timestamp bounds `[start 00:00, end + 1 day 00:00)`
    pub fn bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.start.and_time(chrono::NaiveTime::MIN).and_utc();
        let end = (self.end + chrono::Duration::days(1))
            .and_time(chrono::NaiveTime::MIN)
            .and_utc();
        (start, end)
    }
}
