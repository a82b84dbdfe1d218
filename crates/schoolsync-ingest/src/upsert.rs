//! Upsert coordination
//!
//! Splits a normalized record across the primary and extension tables,
//! coerces each value to the type its column already has, and writes the
//! primary row before the extension row that references it. A value that
//! does not fit its column is never cut down to what would fit: the column
//! gets NULL and the full text goes to the column's TEXT fallback.

use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::key::CompositeKey;
use crate::normalize::date::{parse_datetime, DATETIME_FORMAT, DATE_FORMAT};
use crate::normalize::money::format_number;
use crate::normalize::NormalizationIssue;
use crate::schema::inference::is_decimal_literal;
use crate::schema::SchemaManager;
use crate::store::{RecordStore, StoreError};
use crate::types::{ColumnDescriptor, ColumnType, FieldMap, ProtectedFields, TablePair, TargetTable, UpsertOutcome};

/// A value kept as text because its column's type cannot hold it
#[derive(Debug, Clone, PartialEq)]
pub struct TextFallback {
    /// The typed column the value belongs to
    pub column: ColumnDescriptor,
    pub text: String,
    pub reason: String,
}

/// A record ready to be written
#[derive(Debug, Clone)]
pub struct PreparedRecord {
    pub key: CompositeKey,
    pub primary: FieldMap,
    pub extension: FieldMap,
    /// Values waiting for a place in their column's TEXT fallback
    pub fallbacks: Vec<TextFallback>,
}

impl PreparedRecord {
    pub fn has_extension(&self) -> bool {
        !self.extension.is_empty()
    }

    /// Set `value` in whichever table `column` lives in
    pub fn place(&mut self, column: &ColumnDescriptor, value: Value) {
        match column.target {
            TargetTable::Primary => self.primary.insert(column.name.clone(), value),
            TargetTable::Extension => self.extension.insert(column.name.clone(), value),
        };
    }
}

/// What [`UpsertCoordinator::write`] got into storage
#[derive(Debug)]
pub struct WriteOutcome {
    pub primary: UpsertOutcome,
    /// The primary row was written but its extension row was not
    pub extension_error: Option<StoreError>,
}

#[derive(Debug, Clone)]
pub struct UpsertCoordinator {
    tables: TablePair,
    protected: ProtectedFields,
}

impl UpsertCoordinator {
    pub fn new(tables: TablePair, protected: ProtectedFields) -> Self {
        Self { tables, protected }
    }

    pub fn tables(&self) -> &TablePair {
        &self.tables
    }

    /// Route and coerce fields according to the current schema.
    ///
    /// Fields without a column (their add failed) are left out. Values that
    /// fit clear their column's TEXT fallback, if it exists; values that do
    /// not are collected in [`PreparedRecord::fallbacks`].
    pub fn prepare(&self, key: CompositeKey, fields: FieldMap, schema: &SchemaManager) -> PreparedRecord {
        let mut prepared = PreparedRecord {
            key,
            primary: FieldMap::new(),
            extension: FieldMap::new(),
            fallbacks: Vec::new(),
        };
        let incoming: BTreeSet<String> = fields.keys().cloned().collect();

        for (name, value) in fields {
            let Some(column) = schema.column(&name) else {
                debug!(field = %name, "no column for field, skipping");
                continue;
            };

            match coerce_value(value, column.column_type) {
                Ok(coerced) => {
                    if let Some(fallback) = schema.fallback_for(column) {
                        if !incoming.contains(&fallback.name) {
                            prepared.place(fallback, Value::Null);
                        }
                    }
                    prepared.place(column, coerced);
                },
                Err(issue) => {
                    debug!(
                        key = %prepared.key,
                        field = %name,
                        column_type = %column.column_type,
                        reason = %issue.reason,
                        "value does not fit column type"
                    );
                    prepared.fallbacks.push(TextFallback {
                        column: column.clone(),
                        text: issue.value,
                        reason: issue.reason,
                    });
                    prepared.place(column, Value::Null);
                },
            }
        }

        prepared
    }

    /// Write the primary row, then the extension row if it has fields.
    ///
    /// Only a failed primary upsert is an `Err`; once the primary row exists
    /// an extension failure is returned alongside its outcome.
    pub async fn write(&self, store: &dyn RecordStore, prepared: &PreparedRecord) -> Result<WriteOutcome, StoreError> {
        let primary = store
            .upsert(&self.tables.primary, &prepared.key, &prepared.primary, &self.protected)
            .await?;
        let mut outcome = WriteOutcome {
            primary,
            extension_error: None,
        };

        if prepared.has_extension() {
            let written = store
                .upsert_extension(&self.tables.extension, primary.id, &prepared.extension, &self.protected)
                .await;
            if let Err(e) = written {
                warn!(
                    key = %prepared.key,
                    id = primary.id,
                    table = %self.tables.extension,
                    error = %e,
                    "extension row write failed, primary row kept"
                );
                outcome.extension_error = Some(e);
            }
        }

        Ok(outcome)
    }
}

fn mismatch(value: Value, reason: &str) -> NormalizationIssue {
    let text = match value {
        Value::String(s) => s,
        other => other.to_string(),
    };
    NormalizationIssue {
        field: String::new(),
        value: text,
        reason: reason.to_string(),
    }
}

/// Coerce a value into an existing column's type.
///
/// NULL fits every column. TEXT takes the text form of anything. A value
/// only fits DATETIME when the whole string is a date or timestamp. The
/// error carries the full text form of the value.
pub fn coerce_value(value: Value, column_type: ColumnType) -> Result<Value, NormalizationIssue> {
    if value.is_null() {
        return Ok(value);
    }

    match column_type {
        ColumnType::Text => Ok(match value {
            Value::String(s) => Value::String(s),
            other => Value::String(other.to_string()),
        }),
        ColumnType::Int => {
            let int = match &value {
                Value::Number(n) if n.is_i64() => n.as_i64(),
                Value::Number(n) => n
                    .as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                    .map(|f| f as i64),
                Value::Bool(b) => Some(i64::from(*b)),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            int.map(Value::from)
                .ok_or_else(|| mismatch(value, "not an integer"))
        },
        ColumnType::Decimal => {
            let decimal = match &value {
                Value::Number(n) => format_number(n),
                Value::String(s) if is_decimal_literal(s.trim()) => Some(s.trim().to_string()),
                _ => None,
            };
            decimal
                .map(Value::String)
                .ok_or_else(|| mismatch(value, "not a decimal"))
        },
        ColumnType::DateTime => {
            let stamp = match &value {
                Value::String(s) if NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).is_ok() => {
                    Some(s.trim().to_string())
                },
                Value::String(s) => parse_datetime(s).map(|dt| dt.format(DATETIME_FORMAT).to_string()),
                _ => None,
            };
            stamp
                .map(Value::String)
                .ok_or_else(|| mismatch(value, "not a date"))
        },
        ColumnType::Boolean => {
            let flag = match &value {
                Value::Bool(b) => Some(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Some(false),
                    Some(1) => Some(true),
                    _ => None,
                },
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" => Some(true),
                    "false" | "0" | "no" => Some(false),
                    _ => None,
                },
                _ => None,
            };
            flag.map(Value::Bool)
                .ok_or_else(|| mismatch(value, "not a boolean"))
        },
        ColumnType::Json => Ok(match value {
            Value::String(s) if serde_json::from_str::<Value>(&s).is_ok() => Value::String(s),
            Value::String(s) => Value::String(Value::String(s).to_string()),
            other => Value::String(other.to_string()),
        }),
    }
}
