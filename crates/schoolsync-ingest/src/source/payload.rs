//! Source payload shapes
//!
//! The booking system answers in one of two shapes:
//!
//! ```json
//! { "hits": 2, "entries": { "41": { ... }, "42": { ... } } }
//! { "data": { "head": ["Name", {"title": "Amount"}], "body": [{ "items": [...] }] } }
//! ```
//!
//! Local fixtures may also be a plain array of record objects.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::SourceError;
use crate::types::RawRecord;

/// Any payload the pipeline accepts
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SourcePayload {
    Entries {
        #[serde(default)]
        hits: Option<u64>,
        entries: Value,
    },
    Tabular {
        data: TabularData,
    },
    Records(Vec<Value>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct TabularData {
    #[serde(default)]
    pub head: Vec<Value>,
    #[serde(default)]
    pub body: Vec<TabularRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TabularRow {
    #[serde(default)]
    pub items: Vec<Value>,
}

impl SourcePayload {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SourceError> {
        serde_json::from_slice(bytes).map_err(|e| SourceError::Malformed(e.to_string()))
    }

    /// Flatten the payload into records
    pub fn into_records(self) -> Result<Vec<RawRecord>, SourceError> {
        match self {
            SourcePayload::Entries { hits, entries } => {
                let records = entry_records(entries)?;
                if let Some(hits) = hits {
                    if hits != records.len() as u64 {
                        debug!(hits, received = records.len(), "hit count differs from entries received");
                    }
                }
                Ok(records)
            },
            SourcePayload::Tabular { data } => Ok(tabular_records(data)),
            SourcePayload::Records(values) => Ok(values.into_iter().filter_map(object_or_skip).collect()),
        }
    }
}

fn entry_records(entries: Value) -> Result<Vec<RawRecord>, SourceError> {
    match entries {
        Value::Null => Ok(Vec::new()),
        Value::Array(values) => Ok(values.into_iter().filter_map(object_or_skip).collect()),
        Value::Object(map) => Ok(map
            .into_iter()
            .filter_map(|(id, value)| {
                let mut record = object_or_skip(value)?;
                record.entry("id").or_insert_with(|| entry_id(&id));
                Some(record)
            })
            .collect()),
        other => Err(SourceError::Malformed(format!(
            "entries must be an object or array, got {}",
            json_kind(&other)
        ))),
    }
}

/// Entry ids are map keys; numeric ones become numbers again
fn entry_id(id: &str) -> Value {
    id.parse::<i64>().map(Value::from).unwrap_or_else(|_| Value::from(id))
}

fn object_or_skip(value: Value) -> Option<RawRecord> {
    match value {
        Value::Object(map) => Some(map),
        other => {
            warn!(kind = json_kind(&other), "skipping non-object entry");
            None
        },
    }
}

fn tabular_records(data: TabularData) -> Vec<RawRecord> {
    let names: Vec<String> = data
        .head
        .iter()
        .enumerate()
        .map(|(i, column)| head_name(column).unwrap_or_else(|| format!("column_{i}")))
        .collect();

    data.body
        .into_iter()
        .map(|row| {
            row.items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    let name = names.get(i).cloned().unwrap_or_else(|| format!("column_{i}"));
                    (name, cell_value(item))
                })
                .collect()
        })
        .collect()
}

fn head_name(column: &Value) -> Option<String> {
    match column {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(map) => ["key", "name", "title", "label"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string),
        _ => None,
    }
}

/// Cells are either bare values or `{ "value": ..., ... }` wrappers
fn cell_value(item: Value) -> Value {
    match item {
        Value::Object(mut map) if map.contains_key("value") => map.remove("value").unwrap_or(Value::Null),
        other => other,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
