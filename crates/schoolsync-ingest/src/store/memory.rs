//! In-memory [`RecordStore`]
//!
//! Follows the MySQL store's semantics closely enough for tests and dry
//! runs: writes to unknown columns fail, protected columns are left alone on
//! update, and extension rows need an existing primary row. Every call is
//! recorded so tests can assert on ordering (e.g. `ADD COLUMN` before the
//! upsert that needs it).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{checked_identifier, RecordStore, StoreError};
use crate::key::CompositeKey;
use crate::types::{ColumnType, FieldMap, ProtectedFields, StoredColumn, TablePair, UpsertOutcome, UpsertStatus};

/// One recorded store call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    EnsureTables { primary: String, extension: String },
    AddColumn { table: String, column: String, column_type: ColumnType },
    Upsert { table: String, key: String },
    UpsertExtension { table: String, id: u64 },
}

/// A stored row
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRow {
    pub id: u64,
    pub sync_key: Option<String>,
    pub sync_count: u32,
    pub last_synced_at: DateTime<Utc>,
    pub fields: FieldMap,
}

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<StoredColumn>,
    rows: BTreeMap<u64, MemoryRow>,
    by_key: HashMap<String, u64>,
    /// Primary table an extension table joins to
    parent: Option<String>,
}

impl MemoryTable {
    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
    next_id: u64,
    operations: Vec<StoreOp>,
    failing_columns: HashSet<String>,
    failing_keys: HashSet<String>,
    failing_extensions: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every call made so far, in order
    pub fn operations(&self) -> Vec<StoreOp> {
        self.state().operations.clone()
    }

    pub fn columns(&self, table: &str) -> Vec<StoredColumn> {
        self.state()
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default()
    }

    pub fn row(&self, table: &str, id: u64) -> Option<MemoryRow> {
        self.state().tables.get(table)?.rows.get(&id).cloned()
    }

    pub fn row_by_key(&self, table: &str, key: &str) -> Option<MemoryRow> {
        let state = self.state();
        let t = state.tables.get(table)?;
        let id = t.by_key.get(key)?;
        t.rows.get(id).cloned()
    }

    pub fn rows(&self, table: &str) -> Vec<MemoryRow> {
        self.state()
            .tables
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.state().tables.get(table).map_or(0, |t| t.rows.len())
    }

    /// Write a value the way an operator would, outside the sync path
    pub fn set_field(&self, table: &str, id: u64, column: &str, value: Value) -> Result<(), StoreError> {
        let mut state = self.state();
        let t = state
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        if !t.has_column(column) {
            return Err(StoreError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
        let row = t.rows.get_mut(&id).ok_or_else(|| StoreError::MissingParent {
            table: table.to_string(),
            id,
        })?;
        row.fields.insert(column.to_string(), value);
        Ok(())
    }

    /// Make every later `add_column` for this column name fail
    pub fn fail_add_column(&self, column: &str) {
        self.state().failing_columns.insert(column.to_string());
    }

    /// Make every later upsert for this key fail
    pub fn fail_upsert_for_key(&self, key: &str) {
        self.state().failing_keys.insert(key.to_string());
    }

    /// Make every later extension upsert into this table fail
    pub fn fail_upsert_extension(&self, table: &str) {
        self.state().failing_extensions.insert(table.to_string());
    }
}

fn system_columns(extension: bool) -> Vec<StoredColumn> {
    let column = |name: &str, column_type| StoredColumn {
        name: name.to_string(),
        column_type,
    };
    if extension {
        vec![
            column("id", ColumnType::Int),
            column("created_at", ColumnType::DateTime),
            column("last_synced_at", ColumnType::DateTime),
        ]
    } else {
        vec![
            column("id", ColumnType::Int),
            column("sync_key", ColumnType::Text),
            column("sync_key_version", ColumnType::Int),
            column("created_at", ColumnType::DateTime),
            column("last_synced_at", ColumnType::DateTime),
            column("sync_count", ColumnType::Int),
        ]
    }
}

fn check_columns(table_name: &str, table: &MemoryTable, fields: &FieldMap) -> Result<(), StoreError> {
    for column in fields.keys() {
        checked_identifier(column)?;
        if !table.has_column(column) {
            return Err(StoreError::UnknownColumn {
                table: table_name.to_string(),
                column: column.clone(),
            });
        }
    }
    Ok(())
}

fn apply_update(row: &mut MemoryRow, fields: &FieldMap, protected: &ProtectedFields) {
    for (column, value) in fields {
        if !protected.contains(column) {
            row.fields.insert(column.clone(), value.clone());
        }
    }
    row.sync_count += 1;
    row.last_synced_at = Utc::now();
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ensure_tables(&self, tables: &TablePair) -> Result<(), StoreError> {
        checked_identifier(&tables.primary)?;
        checked_identifier(&tables.extension)?;

        let mut state = self.state();
        state.operations.push(StoreOp::EnsureTables {
            primary: tables.primary.clone(),
            extension: tables.extension.clone(),
        });
        state
            .tables
            .entry(tables.primary.clone())
            .or_insert_with(|| MemoryTable {
                columns: system_columns(false),
                ..Default::default()
            });
        state
            .tables
            .entry(tables.extension.clone())
            .or_insert_with(|| MemoryTable {
                columns: system_columns(true),
                parent: Some(tables.primary.clone()),
                ..Default::default()
            });
        Ok(())
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<StoredColumn>, StoreError> {
        self.state()
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }

    async fn add_column(&self, table: &str, column: &str, column_type: ColumnType) -> Result<(), StoreError> {
        checked_identifier(column)?;

        let mut state = self.state();
        state.operations.push(StoreOp::AddColumn {
            table: table.to_string(),
            column: column.to_string(),
            column_type,
        });
        if state.failing_columns.contains(column) {
            return Err(StoreError::Rejected(format!("add column `{column}` refused")));
        }

        let t = state
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        if t.has_column(column) {
            return Err(StoreError::DuplicateColumn {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
        t.columns.push(StoredColumn {
            name: column.to_string(),
            column_type,
        });
        Ok(())
    }

    async fn upsert(
        &self,
        table: &str,
        key: &CompositeKey,
        fields: &FieldMap,
        protected: &ProtectedFields,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut state = self.state();
        state.operations.push(StoreOp::Upsert {
            table: table.to_string(),
            key: key.as_str().to_string(),
        });
        if state.failing_keys.contains(key.as_str()) {
            return Err(StoreError::Rejected(format!("upsert for `{key}` refused")));
        }

        state.next_id += 1;
        let next_id = state.next_id;

        let t = state
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        check_columns(table, t, fields)?;

        if let Some(id) = t.by_key.get(key.as_str()).copied() {
            let row = t.rows.get_mut(&id).ok_or_else(|| StoreError::MissingParent {
                table: table.to_string(),
                id,
            })?;
            apply_update(row, fields, protected);
            return Ok(UpsertOutcome::updated(id));
        }

        t.by_key.insert(key.as_str().to_string(), next_id);
        t.rows.insert(
            next_id,
            MemoryRow {
                id: next_id,
                sync_key: Some(key.as_str().to_string()),
                sync_count: 1,
                last_synced_at: Utc::now(),
                fields: fields.clone(),
            },
        );
        Ok(UpsertOutcome::inserted(next_id))
    }

    async fn upsert_extension(
        &self,
        table: &str,
        id: u64,
        fields: &FieldMap,
        protected: &ProtectedFields,
    ) -> Result<UpsertStatus, StoreError> {
        let mut state = self.state();
        state.operations.push(StoreOp::UpsertExtension {
            table: table.to_string(),
            id,
        });
        if state.failing_extensions.contains(table) {
            return Err(StoreError::Rejected(format!("extension upsert into `{table}` refused")));
        }

        let parent = state
            .tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?
            .parent
            .clone()
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        let parent_exists = state
            .tables
            .get(&parent)
            .is_some_and(|p| p.rows.contains_key(&id));
        if !parent_exists {
            return Err(StoreError::MissingParent { table: parent, id });
        }

        let t = state
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        check_columns(table, t, fields)?;

        if let Some(row) = t.rows.get_mut(&id) {
            apply_update(row, fields, protected);
            return Ok(UpsertStatus::Updated);
        }

        t.rows.insert(
            id,
            MemoryRow {
                id,
                sync_key: None,
                sync_count: 1,
                last_synced_at: Utc::now(),
                fields: fields.clone(),
            },
        );
        Ok(UpsertStatus::Inserted)
    }
}
