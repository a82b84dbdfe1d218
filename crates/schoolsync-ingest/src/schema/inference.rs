//! Column type inference
//!
//! A pure, total mapping from a normalized value (and optionally its field
//! name) to a [`ColumnType`]. TEXT is the fallback for anything uncertain.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::normalize::{parse_datetime, FieldRules};
use crate::types::ColumnType;

/// Dialect and hint switches for [`TypeInference`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceOptions {
    /// Store arrays/objects (and JSON object text) in JSON columns instead of TEXT
    #[serde(default = "enabled")]
    pub json_columns: bool,
    /// Let field names refine the value-based type
    #[serde(default = "enabled")]
    pub name_hints: bool,
}

fn enabled() -> bool {
    true
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            json_columns: true,
            name_hints: true,
        }
    }
}

/// Infer a column type from a value alone
pub fn infer_value_type(value: &Value, json_columns: bool) -> ColumnType {
    match value {
        Value::Null => ColumnType::Text,
        Value::Bool(_) => ColumnType::Boolean,
        Value::Number(n) if n.is_i64() => ColumnType::Int,
        // u64 beyond i64::MAX does not fit BIGINT
        Value::Number(n) if n.is_u64() => ColumnType::Text,
        Value::Number(_) => ColumnType::Decimal,
        Value::String(s) if parse_datetime(s).is_some() => ColumnType::DateTime,
        Value::String(s) if json_columns && is_json_object_text(s) => ColumnType::Json,
        Value::String(_) => ColumnType::Text,
        Value::Array(_) | Value::Object(_) if json_columns => ColumnType::Json,
        Value::Array(_) | Value::Object(_) => ColumnType::Text,
    }
}

/// Value-based inference refined by field-name hints
#[derive(Debug, Clone, Default)]
pub struct TypeInference {
    options: InferenceOptions,
    rules: FieldRules,
}

impl TypeInference {
    pub fn new(options: InferenceOptions, rules: FieldRules) -> Self {
        Self { options, rules }
    }

    pub fn options(&self) -> InferenceOptions {
        self.options
    }

    pub fn infer(&self, field: &str, value: &Value) -> ColumnType {
        let by_value = infer_value_type(value, self.options.json_columns);
        if !self.options.name_hints {
            return by_value;
        }

        if field.contains("email") {
            return ColumnType::Text;
        }

        if self.rules.is_monetary(field) {
            match value {
                Value::Null | Value::Number(_) => return ColumnType::Decimal,
                Value::String(s) if is_decimal_literal(s) => return ColumnType::Decimal,
                _ => {},
            }
        }

        if self.rules.is_date(field) && value.is_null() {
            return ColumnType::DateTime;
        }

        if field == "id" || field.ends_with("_id") {
            if let Value::String(s) = value {
                if s.parse::<i64>().is_ok() {
                    return ColumnType::Int;
                }
            }
        }

        by_value
    }
}

/// `-?digits(.digits)?`
pub fn is_decimal_literal(s: &str) -> bool {
    let unsigned = s.strip_prefix('-').unwrap_or(s);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };
    let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    digits(int_part) && frac_part.is_none_or(digits)
}

fn is_json_object_text(s: &str) -> bool {
    let trimmed = s.trim_start();
    trimmed.starts_with('{') && serde_json::from_str::<serde_json::Map<String, Value>>(s).is_ok()
}
