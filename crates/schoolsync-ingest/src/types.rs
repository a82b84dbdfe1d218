//! Core types for the sync pipeline

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// A record exactly as the source returned it
pub type RawRecord = serde_json::Map<String, Value>;

/// Normalized fields keyed by sanitized identifier, in stable order
pub type FieldMap = BTreeMap<String, Value>;

/// Closed set of column types the schema can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Text,
    Int,
    Decimal,
    DateTime,
    Boolean,
    Json,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Int => "INT",
            ColumnType::Decimal => "DECIMAL",
            ColumnType::DateTime => "DATETIME",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Json => "JSON",
        }
    }

    /// MySQL column definition used by `ADD COLUMN`
    pub fn sql_definition(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Int => "BIGINT",
            ColumnType::Decimal => "DECIMAL(15,2)",
            ColumnType::DateTime => "DATETIME",
            ColumnType::Boolean => "TINYINT(1)",
            ColumnType::Json => "JSON",
        }
    }

    /// Map an `information_schema` data type back onto the closed set.
    ///
    /// Unknown types read as TEXT, which every value can be coerced into.
    pub fn from_sql(data_type: &str, column_type: &str) -> Self {
        match data_type.to_ascii_lowercase().as_str() {
            "tinyint" if column_type.eq_ignore_ascii_case("tinyint(1)") => ColumnType::Boolean,
            "bool" | "boolean" => ColumnType::Boolean,
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" => ColumnType::Int,
            "decimal" | "numeric" | "float" | "double" => ColumnType::Decimal,
            "date" | "datetime" | "timestamp" => ColumnType::DateTime,
            "json" => ColumnType::Json,
            _ => ColumnType::Text,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which half of a primary/extension pair a column lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetTable {
    Primary,
    Extension,
}

impl fmt::Display for TargetTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetTable::Primary => f.write_str("primary"),
            TargetTable::Extension => f.write_str("extension"),
        }
    }
}

/// A column known to the schema. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: ColumnType,
    pub target: TargetTable,
}

/// A column as reported by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredColumn {
    pub name: String,
    pub column_type: ColumnType,
}

/// Physical table names for one record kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePair {
    pub primary: String,
    pub extension: String,
}

impl TablePair {
    pub fn table(&self, target: TargetTable) -> &str {
        match target {
            TargetTable::Primary => &self.primary,
            TargetTable::Extension => &self.extension,
        }
    }
}

/// Ordered, append-only column set of one table
#[derive(Debug, Clone, Default)]
pub struct TableSchema {
    columns: Vec<ColumnDescriptor>,
    index: HashMap<String, usize>,
}

impl TableSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.index.get(name).map(|&i| &self.columns[i])
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// Add a column; an existing column of the same name is left untouched.
    /// Returns whether the column was new.
    pub fn add(&mut self, column: ColumnDescriptor) -> bool {
        if self.index.contains_key(&column.name) {
            return false;
        }
        self.index.insert(column.name.clone(), self.columns.len());
        self.columns.push(column);
        true
    }
}

/// Columns owned by human operators once set; never overwritten on update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtectedFields(BTreeSet<String>);

impl ProtectedFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

/// Whether an upsert created or refreshed a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertStatus {
    Inserted,
    Updated,
}

/// Result of one primary-table upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    /// Primary row id; extension rows join on it
    pub id: u64,
    pub status: UpsertStatus,
}

impl UpsertOutcome {
    pub fn inserted(id: u64) -> Self {
        Self {
            id,
            status: UpsertStatus::Inserted,
        }
    }

    pub fn updated(id: u64) -> Self {
        Self {
            id,
            status: UpsertStatus::Updated,
        }
    }

    pub fn is_new(&self) -> bool {
        self.status == UpsertStatus::Inserted
    }

    pub fn is_update(&self) -> bool {
        self.status == UpsertStatus::Updated
    }
}
