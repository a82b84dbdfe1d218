//! Record sources
//!
//! A source returns one batch of raw records for a date range. Fetching is
//! a single call with no automatic retry: the booking system can take
//! minutes to answer and a retried request would only queue behind the
//! first one.

pub mod fidelo;
pub mod local;
pub mod payload;

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use fidelo::{FideloClient, FideloConfig};
pub use local::{JsonFileSource, StaticSource};
pub use payload::{SourcePayload, TabularData, TabularRow};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Source rejected credentials (HTTP {0})")]
    Unauthorized(u16),

    #[error("Source returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Inclusive date range used to filter the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub until: NaiveDate,
}

impl DateRange {
    /// `None` when `from` is after `until`
    pub fn new(from: NaiveDate, until: NaiveDate) -> Option<Self> {
        (from <= until).then_some(Self { from, until })
    }

    /// The `days` days ending at `until`
    pub fn ending_at(until: NaiveDate, days: u64) -> Self {
        let from = until.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN);
        Self { from, until }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.from, self.until)
    }
}

/// Where raw records come from
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Short name for logs and reports
    fn name(&self) -> &str;

    /// Fetch everything in the range in one request
    async fn fetch(&self, range: &DateRange) -> Result<SourcePayload, SourceError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_date_range() {
        assert!(DateRange::new(date(2025, 9, 1), date(2025, 9, 30)).is_some());
        assert!(DateRange::new(date(2025, 9, 30), date(2025, 9, 1)).is_none());

        let range = DateRange::ending_at(date(2025, 9, 30), 30);
        assert_eq!(range.from, date(2025, 8, 31));
        assert_eq!(range.to_string(), "2025-08-31..2025-09-30");
    }
}
