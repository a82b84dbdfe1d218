//! Error types for the sync pipeline
//!
//! Only [`SyncError`] ends a run. Everything that goes wrong with a single
//! record is a [`RecordError`] value collected into the report.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::normalize::NormalizationIssue;
use crate::upsert::TextFallback;
use crate::source::SourceError;
use crate::store::StoreError;

/// Failures that abort a sync run
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] StoreError),

    #[error("Invalid sync profile: {0}")]
    Profile(String),

    #[error("Failed to compile pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// What kind of per-record problem occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordErrorKind {
    SchemaEvolution,
    Normalization,
    /// Value kept in a TEXT fallback column instead of its typed column
    TextFallback,
    Upsert,
    /// Primary row written, extension row not
    ExtensionUpsert,
    KeyCollision,
}

impl RecordErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordErrorKind::SchemaEvolution => "schema_evolution",
            RecordErrorKind::Normalization => "normalization",
            RecordErrorKind::TextFallback => "text_fallback",
            RecordErrorKind::Upsert => "upsert",
            RecordErrorKind::ExtensionUpsert => "extension_upsert",
            RecordErrorKind::KeyCollision => "key_collision",
        }
    }
}

impl fmt::Display for RecordErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A problem with one record that did not stop the run
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct RecordError {
    pub kind: RecordErrorKind,
    pub field: Option<String>,
    pub message: String,
}

impl RecordError {
    pub fn schema_evolution(column: &str, error: &StoreError) -> Self {
        Self {
            kind: RecordErrorKind::SchemaEvolution,
            field: Some(column.to_string()),
            message: error.to_string(),
        }
    }

    pub fn normalization(issue: &NormalizationIssue) -> Self {
        Self {
            kind: RecordErrorKind::Normalization,
            field: Some(issue.field.clone()),
            message: format!("{} ({:?}), stored NULL", issue.reason, issue.value),
        }
    }

    pub fn text_fallback(fallback: &TextFallback, text_column: &str) -> Self {
        Self {
            kind: RecordErrorKind::TextFallback,
            field: Some(fallback.column.name.clone()),
            message: format!(
                "{} ({:?}) does not fit {} column, kept in `{text_column}`",
                fallback.reason, fallback.text, fallback.column.column_type
            ),
        }
    }

    pub fn upsert(error: &StoreError) -> Self {
        Self {
            kind: RecordErrorKind::Upsert,
            field: None,
            message: error.to_string(),
        }
    }

    pub fn extension_upsert(table: &str, error: &StoreError) -> Self {
        Self {
            kind: RecordErrorKind::ExtensionUpsert,
            field: None,
            message: format!("primary row written, `{table}` row not: {error}"),
        }
    }

    pub fn key_collision(key: &str) -> Self {
        Self {
            kind: RecordErrorKind::KeyCollision,
            field: None,
            message: format!("different record content already written under {key}, later write wins"),
        }
    }
}
