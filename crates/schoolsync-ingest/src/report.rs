//! Sync run statistics

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RecordError, RecordErrorKind};
use crate::types::UpsertOutcome;

/// One per-record problem, as it appears in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncIssue {
    /// Position of the record in the fetched batch
    pub record_index: usize,
    pub key: Option<String>,
    pub field: Option<String>,
    pub kind: RecordErrorKind,
    pub message: String,
}

/// Aggregated outcome of one sync run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub profile: String,
    pub source: String,
    pub range_from: Option<NaiveDate>,
    pub range_until: Option<NaiveDate>,
    /// Records returned by the source
    pub fetched: u64,
    /// Rows created
    pub inserted: u64,
    /// Existing rows refreshed
    pub updated: u64,
    /// Records that could not be written
    pub failed: u64,
    /// Records with no usable fields
    pub skipped: u64,
    /// Records written under a placeholder key
    pub unkeyed: u64,
    pub key_collisions: u64,
    pub columns_added: u64,
    /// Fields left out because their column could not be added
    pub fields_dropped: u64,
    /// Values stored as NULL because they could not be parsed
    pub values_nulled: u64,
    /// Values kept in a TEXT fallback column because they did not fit
    /// their typed column
    pub values_as_text: u64,
    /// Records whose primary row was written but whose extension row failed
    pub extension_failures: u64,
    pub issues: Vec<SyncIssue>,
    pub duration_secs: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncReport {
    pub fn new(profile: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            source: source.into(),
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Mark the report as completed
    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
        if let (Some(start), Some(end)) = (self.started_at, self.completed_at) {
            self.duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;
        }
    }

    pub fn inc_inserted(&mut self) {
        self.inserted += 1;
    }

    pub fn inc_updated(&mut self) {
        self.updated += 1;
    }

    pub fn inc_failed(&mut self) {
        self.failed += 1;
    }

    pub fn inc_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn inc_unkeyed(&mut self) {
        self.unkeyed += 1;
    }

    pub fn record_outcome(&mut self, outcome: &UpsertOutcome) {
        if outcome.is_new() {
            self.inc_inserted();
        } else {
            self.inc_updated();
        }
    }

    /// Count a per-record problem and keep it for the report
    pub fn record_error(&mut self, record_index: usize, key: Option<&str>, error: RecordError) {
        match error.kind {
            RecordErrorKind::SchemaEvolution => self.fields_dropped += 1,
            RecordErrorKind::Normalization => self.values_nulled += 1,
            RecordErrorKind::TextFallback => self.values_as_text += 1,
            RecordErrorKind::Upsert => self.inc_failed(),
            RecordErrorKind::ExtensionUpsert => self.extension_failures += 1,
            RecordErrorKind::KeyCollision => self.key_collisions += 1,
        }
        self.issues.push(SyncIssue {
            record_index,
            key: key.map(str::to_string),
            field: error.field,
            kind: error.kind,
            message: error.message,
        });
    }

    /// Records that reached a terminal state
    pub fn processed(&self) -> u64 {
        self.inserted + self.updated + self.failed + self.skipped
    }

    /// Percentage of attempted writes that succeeded
    pub fn success_rate(&self) -> f64 {
        let attempted = self.inserted + self.updated + self.failed;
        if attempted > 0 {
            ((self.inserted + self.updated) as f64 / attempted as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn issues_of(&self, kind: RecordErrorKind) -> impl Iterator<Item = &SyncIssue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use crate::types::{ColumnDescriptor, ColumnType, TargetTable};
    use crate::upsert::TextFallback;

    #[test]
    fn test_counts_and_success_rate() {
        let mut report = SyncReport::new("payments", "fidelo");
        report.fetched = 4;
        report.record_outcome(&UpsertOutcome::inserted(1));
        report.record_outcome(&UpsertOutcome::updated(2));
        report.inc_skipped();
        report.record_error(3, Some("v1:x"), RecordError::upsert(&StoreError::Rejected("no".into())));

        assert_eq!(report.inserted, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.processed(), 4);
        assert!((report.success_rate() - 66.666).abs() < 0.01);
        assert_eq!(report.issues_of(RecordErrorKind::Upsert).count(), 1);
        assert_eq!(report.issues[0].key.as_deref(), Some("v1:x"));
    }

    #[test]
    fn test_error_kinds_feed_counters() {
        let mut report = SyncReport::new("bookings", "file");
        report.record_error(0, None, RecordError::key_collision("v1:a"));
        report.record_error(
            0,
            None,
            RecordError::schema_evolution("notes", &StoreError::Rejected("x".into())),
        );
        report.record_error(
            1,
            Some("v1:b"),
            RecordError::extension_upsert("fidelo_bookings_ext", &StoreError::Rejected("x".into())),
        );
        let fallback = TextFallback {
            column: ColumnDescriptor {
                name: "weeks".to_string(),
                column_type: ColumnType::Int,
                target: TargetTable::Primary,
            },
            text: "four".to_string(),
            reason: "not an integer".to_string(),
        };
        report.record_error(2, Some("v1:c"), RecordError::text_fallback(&fallback, "weeks_text"));

        assert_eq!(report.key_collisions, 1);
        assert_eq!(report.fields_dropped, 1);
        assert_eq!(report.extension_failures, 1);
        assert_eq!(report.values_as_text, 1);
        assert_eq!(report.values_nulled, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(report.success_rate(), 0.0);
    }

    #[test]
    fn test_complete_sets_duration() {
        let mut report = SyncReport::new("bookings", "file");
        report.complete();
        assert!(report.completed_at.is_some());
        assert!(report.duration_secs >= 0.0);
    }
}
