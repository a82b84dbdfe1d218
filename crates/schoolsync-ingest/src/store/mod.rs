//! Storage boundary
//!
//! The orchestrator talks to storage only through [`RecordStore`], so the
//! MySQL implementation can be swapped for [`memory::MemoryStore`] in tests
//! and dry runs.

pub mod memory;
pub mod mysql;

use async_trait::async_trait;
use thiserror::Error;

use crate::key::CompositeKey;
use crate::schema::identifier::is_sanitized;
use crate::types::{ColumnType, FieldMap, ProtectedFields, StoredColumn, TablePair, UpsertOutcome, UpsertStatus};

pub use memory::{MemoryRow, MemoryStore, StoreOp};
pub use mysql::MySqlStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unknown table `{0}`")]
    UnknownTable(String),

    #[error("Unknown column `{column}` in `{table}`")]
    UnknownColumn { table: String, column: String },

    #[error("Column `{column}` already exists in `{table}`")]
    DuplicateColumn { table: String, column: String },

    #[error("No row with id {id} in `{table}` to extend")]
    MissingParent { table: String, id: u64 },

    #[error("Invalid identifier `{0}`")]
    InvalidIdentifier(String),

    #[error("Write rejected: {0}")]
    Rejected(String),
}

/// Relational store the sync writes into.
///
/// Every table and column name passed in is expected to be sanitized;
/// implementations reject anything else with
/// [`StoreError::InvalidIdentifier`].
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short name for logs ("mysql", "memory")
    fn name(&self) -> &str;

    /// Create the primary and extension tables with their sync columns
    async fn ensure_tables(&self, tables: &TablePair) -> Result<(), StoreError>;

    /// All columns of a table, sync-managed ones included
    async fn list_columns(&self, table: &str) -> Result<Vec<StoredColumn>, StoreError>;

    /// Add one nullable column
    async fn add_column(&self, table: &str, column: &str, column_type: ColumnType) -> Result<(), StoreError>;

    /// Insert a row for an unseen key, otherwise update every non-protected
    /// field, refresh `last_synced_at` and increment `sync_count`.
    async fn upsert(
        &self,
        table: &str,
        key: &CompositeKey,
        fields: &FieldMap,
        protected: &ProtectedFields,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Same semantics for the 1:1 extension row joined on the primary `id`
    async fn upsert_extension(
        &self,
        table: &str,
        id: u64,
        fields: &FieldMap,
        protected: &ProtectedFields,
    ) -> Result<UpsertStatus, StoreError>;
}

/// Reject names that did not come through identifier sanitization
pub fn checked_identifier(name: &str) -> Result<&str, StoreError> {
    if is_sanitized(name) {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}
