//! Value normalization
//!
//! Turns raw source values into storage-ready values:
//!
//! - **text**: HTML stripped, `<br>` → `", "`, mojibake repaired, whitespace
//!   and commas collapsed
//! - **arrays**: items cleaned and joined with `", "`, empty items dropped
//! - **objects** (and arrays that nest arrays or objects): string leaves
//!   cleaned in place, then serialized to JSON text. JSON text that arrives
//!   as a string gets the same treatment, never the free-text rules.
//! - **monetary fields**: two-decimal numeric strings (`"1234.56"`)
//! - **date fields**: `YYYY-MM-DD`
//!
//! Normalization is idempotent: records are re-synced over and over, and a
//! second pass over stored values must not change them. Values that cannot
//! be parsed become NULL with a warning rather than an error.

pub mod date;
pub mod money;
pub mod text;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

use crate::schema::identifier::{matches_token, sanitize_identifier};
use crate::types::{FieldMap, RawRecord};

pub use date::{normalize_date, parse_date, parse_datetime};
pub use money::parse_money;
pub use text::{TextCleaner, LIST_DELIMITER};

/// Field name hints that select the monetary or date rules.
///
/// Hints match whole `_`-separated segments of the sanitized field name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRules {
    #[serde(default = "default_monetary_hints")]
    pub monetary: Vec<String>,
    #[serde(default = "default_date_hints")]
    pub dates: Vec<String>,
}

fn default_monetary_hints() -> Vec<String> {
    ["amount", "price", "fee", "fees", "balance", "cost", "commission"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_date_hints() -> Vec<String> {
    ["date", "birthday", "from", "until"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for FieldRules {
    fn default() -> Self {
        Self {
            monetary: default_monetary_hints(),
            dates: default_date_hints(),
        }
    }
}

impl FieldRules {
    pub fn is_date(&self, field: &str) -> bool {
        self.dates.iter().any(|hint| matches_token(field, hint))
    }

    /// Date hints win when a field matches both
    pub fn is_monetary(&self, field: &str) -> bool {
        !self.is_date(field) && self.monetary.iter().any(|hint| matches_token(field, hint))
    }
}

/// A value that could not be cleaned into its expected form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationIssue {
    pub field: String,
    pub value: String,
    pub reason: String,
}

impl NormalizationIssue {
    fn new(field: &str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for NormalizationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({:?})", self.field, self.reason, self.value)
    }
}

/// A record after normalization
#[derive(Debug, Clone, Default)]
pub struct NormalizedRecord {
    pub fields: FieldMap,
    /// Values that were replaced by NULL
    pub issues: Vec<NormalizationIssue>,
}

/// Field-aware value normalizer
#[derive(Debug, Clone)]
pub struct Normalizer {
    cleaner: TextCleaner,
    rules: FieldRules,
}

impl Normalizer {
    pub fn new(rules: FieldRules) -> Result<Self, regex::Error> {
        Ok(Self {
            cleaner: TextCleaner::new()?,
            rules,
        })
    }

    pub fn rules(&self) -> &FieldRules {
        &self.rules
    }

    /// Normalize one value of the (sanitized) field `field`
    pub fn normalize_value(&self, field: &str, value: &Value) -> Result<Value, NormalizationIssue> {
        match value {
            Value::Null | Value::Bool(_) => Ok(value.clone()),
            Value::Number(n) if self.rules.is_monetary(field) => money::format_number(n)
                .map(Value::String)
                .ok_or_else(|| NormalizationIssue::new(field, n.to_string(), "amount out of range")),
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => self.normalize_text(field, s),
            Value::Array(items) if items.iter().any(|i| i.is_array() || i.is_object()) => {
                self.normalize_structured(field, value)
            },
            Value::Array(items) => {
                let joined = items
                    .iter()
                    .filter_map(item_text)
                    .map(|item| self.cleaner.clean(&item))
                    .filter(|item| !item.is_empty())
                    .collect::<Vec<_>>()
                    .join(LIST_DELIMITER);
                self.normalize_text(field, &joined)
            },
            Value::Object(_) => self.normalize_structured(field, value),
        }
    }

    fn normalize_structured(&self, field: &str, value: &Value) -> Result<Value, NormalizationIssue> {
        if self.rules.is_date(field) || self.rules.is_monetary(field) {
            return Err(NormalizationIssue::new(field, value.to_string(), "structured value"));
        }
        Ok(Value::String(self.clean_leaves(value).to_string()))
    }

    fn normalize_text(&self, field: &str, raw: &str) -> Result<Value, NormalizationIssue> {
        if self.rules.is_date(field) {
            let cleaned = self.cleaner.clean(raw);
            if cleaned.is_empty() {
                return Ok(Value::Null);
            }
            return normalize_date(&cleaned)
                .map(Value::String)
                .ok_or_else(|| NormalizationIssue::new(field, cleaned, "unparseable date"));
        }

        if self.rules.is_monetary(field) {
            let cleaned = self.cleaner.clean(raw);
            if cleaned.is_empty() {
                return Ok(Value::Null);
            }
            return parse_money(&cleaned)
                .map(Value::String)
                .ok_or_else(|| NormalizationIssue::new(field, cleaned, "unparseable amount"));
        }

        Ok(Value::String(self.free_text(raw)))
    }

    /// Clean free text. JSON object or array text keeps its structure, also
    /// when it only shows up after cleaning (`<p>{"a":1}</p>`).
    fn free_text(&self, raw: &str) -> String {
        if let Some(parsed) = parse_structured(raw) {
            return self.clean_leaves(&parsed).to_string();
        }
        let cleaned = self.cleaner.clean(raw);
        match parse_structured(&cleaned) {
            Some(parsed) => self.clean_leaves(&parsed).to_string(),
            None => cleaned,
        }
    }

    fn clean_leaves(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.cleaner.clean(s)),
            Value::Array(items) => Value::Array(items.iter().map(|item| self.clean_leaves(item)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, item)| (key.clone(), self.clean_leaves(item)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Normalize every field of a raw record.
    ///
    /// Field names are sanitized; names with nothing usable left are
    /// dropped. Unparseable values are kept as NULL and reported.
    pub fn normalize_record(&self, raw: &RawRecord) -> NormalizedRecord {
        let mut record = NormalizedRecord::default();

        for (raw_name, value) in raw {
            let Some(name) = sanitize_identifier(raw_name) else {
                debug!(field = %raw_name, "dropping field with unusable name");
                continue;
            };

            let normalized = match self.normalize_value(&name, value) {
                Ok(v) => v,
                Err(issue) => {
                    warn!(
                        field = %issue.field,
                        value = %issue.value,
                        reason = %issue.reason,
                        "value could not be normalized, storing NULL"
                    );
                    record.issues.push(issue);
                    Value::Null
                },
            };

            if record.fields.insert(name.clone(), normalized).is_some() {
                debug!(field = %name, raw = %raw_name, "two source fields share a column name, last one wins");
            }
        }

        record
    }
}

/// JSON object or array text, parsed
fn parse_structured(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
        return None;
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}

fn item_text(item: &Value) -> Option<String> {
    match item {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalizer() -> Normalizer {
        Normalizer::new(FieldRules::default()).unwrap()
    }

    #[test]
    fn test_field_rules() {
        let rules = FieldRules::default();
        assert!(rules.is_monetary("amount"));
        assert!(rules.is_monetary("course_fee"));
        assert!(!rules.is_monetary("feedback"));
        assert!(rules.is_date("payment_date"));
        assert!(!rules.is_monetary("payment_date"));
        assert!(!rules.is_date("updated_by"));
    }

    #[test]
    fn test_payment_record_values() {
        let n = normalizer();
        assert_eq!(n.normalize_value("amount", &json!("€1,234.56")).unwrap(), json!("1234.56"));
        assert_eq!(n.normalize_value("payment_date", &json!("05/09/2025")).unwrap(), json!("2025-09-05"));
        assert_eq!(n.normalize_value("email", &json!("a<br>b@x.com")).unwrap(), json!("a, b@x.com"));
        assert_eq!(n.normalize_value("amount", &json!(12)).unwrap(), json!("12.00"));
    }

    #[test]
    fn test_arrays_and_objects() {
        let n = normalizer();
        assert_eq!(
            n.normalize_value("courses", &json!(["B2 AM", "", null, " Business <b>English</b> "]))
                .unwrap(),
            json!("B2 AM, Business English")
        );
        assert_eq!(n.normalize_value("weeks", &json!([1, 2, 3])).unwrap(), json!("1, 2, 3"));
        assert_eq!(
            n.normalize_value("meta", &json!({"room": "A1"})).unwrap(),
            json!("{\"room\":\"A1\"}")
        );
    }

    #[test]
    fn test_objects_keep_their_structure() {
        let n = normalizer();
        let raw = json!({
            "a": "x<y",
            "b": "z>w",
            "c": [1, 2],
            "d": "one,, two <br> three",
            "e": {"inner": "<b>bold</b>, text"}
        });
        let once = n.normalize_value("meta", &raw).unwrap();
        let parsed: Value = serde_json::from_str(once.as_str().unwrap()).unwrap();
        assert_eq!(
            parsed,
            json!({
                "a": "x<y",
                "b": "z>w",
                "c": [1, 2],
                "d": "one, two, three",
                "e": {"inner": "bold, text"}
            })
        );
        assert_eq!(n.normalize_value("meta", &once).unwrap(), once);
    }

    #[test]
    fn test_nested_arrays_are_serialized() {
        let n = normalizer();
        let raw = json!([{"room": "A<1>"}, ["x", "y"], "plain"]);
        let once = n.normalize_value("rooms", &raw).unwrap();
        assert_eq!(once, json!("[{\"room\":\"A\"},[\"x\",\"y\"],\"plain\"]"));
        assert_eq!(n.normalize_value("rooms", &once).unwrap(), once);
        assert!(n.normalize_value("payment_date", &json!({"d": "05/09/2025"})).is_err());
    }

    #[test]
    fn test_json_text_is_not_cleaned_as_prose() {
        let n = normalizer();
        let text = json!("{\"note\": \"a < b, c > d\"}");
        assert_eq!(
            n.normalize_value("meta", &text).unwrap(),
            json!("{\"note\":\"a < b, c > d\"}")
        );
        assert_eq!(n.normalize_value("meta", &json!("<p>[1, 2]</p>")).unwrap(), json!("[1,2]"));
    }

    #[test]
    fn test_unparseable_values_are_issues() {
        let n = normalizer();
        let issue = n.normalize_value("payment_date", &json!("someday")).unwrap_err();
        assert_eq!(issue.field, "payment_date");
        assert!(n.normalize_value("amount", &json!("tbd")).is_err());
        assert_eq!(n.normalize_value("payment_date", &json!("  ")).unwrap(), Value::Null);
    }

    #[test]
    fn test_passthrough_scalars() {
        let n = normalizer();
        assert_eq!(n.normalize_value("approved", &json!(true)).unwrap(), json!(true));
        assert_eq!(n.normalize_value("weeks", &json!(4)).unwrap(), json!(4));
        assert_eq!(n.normalize_value("notes", &Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_normalize_record() {
        let n = normalizer();
        let raw = json!({
            "Payment Date": "05/09/2025",
            "Amount": "€10",
            "Due Date": "never",
            "€": "dropped",
        });
        let record = n.normalize_record(raw.as_object().unwrap());

        assert_eq!(record.fields.get("payment_date"), Some(&json!("2025-09-05")));
        assert_eq!(record.fields.get("amount"), Some(&json!("10.00")));
        assert_eq!(record.fields.get("due_date"), Some(&Value::Null));
        assert_eq!(record.fields.len(), 3);
        assert_eq!(record.issues.len(), 1);
    }
}
