//! Composite deduplication keys
//!
//! Records without a stable source id are matched on a key built from a
//! configured tuple of business fields. Each component is trimmed,
//! lowercased, whitespace becomes `_` and everything outside `[a-z0-9_]` is
//! stripped. The key carries a format version so a future change of the
//! pipeline can be migrated instead of silently duplicating rows.
//!
//! | Form               | When                                      |
//! |--------------------|-------------------------------------------|
//! | `v1:<body>`        | at least `min_components` usable fields   |
//! | `v1h:<sha256/32>`  | some, but fewer than `min_components`     |
//! | `unkeyed:<uuid>`   | no usable component; never matches a row  |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::types::FieldMap;

/// Current key pipeline version
pub const KEY_FORMAT_VERSION: u16 = 1;

/// Natural key bodies are cut to this many characters
pub const MAX_KEY_BODY_LEN: usize = 191;

const HASH_PREFIX_LEN: usize = 32;
const COMPONENT_SEPARATOR: char = '\u{1f}';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Natural,
    Hashed,
    Unkeyed,
}

/// A versioned deduplication key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeKey {
    value: String,
    kind: KeyKind,
    version: u16,
}

impl CompositeKey {
    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn is_unkeyed(&self) -> bool {
        self.kind == KeyKind::Unkeyed
    }

    fn unkeyed() -> Self {
        Self {
            value: format!("unkeyed:{}", Uuid::new_v4()),
            kind: KeyKind::Unkeyed,
            version: KEY_FORMAT_VERSION,
        }
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// The fields a record kind is keyed on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpec {
    pub fields: Vec<String>,
    #[serde(default = "default_min_components")]
    pub min_components: usize,
}

fn default_min_components() -> usize {
    1
}

impl KeySpec {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            min_components: default_min_components(),
        }
    }

    pub fn with_min_components(mut self, min: usize) -> Self {
        self.min_components = min;
        self
    }

    /// Key for a normalized record. Missing fields count as empty components.
    pub fn key_for(&self, fields: &FieldMap) -> CompositeKey {
        let components: Vec<String> = self
            .fields
            .iter()
            .map(|name| fields.get(name).map(component_text).unwrap_or_default())
            .collect();
        composite_key(&components, self.min_components)
    }
}

/// Build a key from raw component strings
pub fn composite_key<S: AsRef<str>>(components: &[S], min_components: usize) -> CompositeKey {
    let normalized: Vec<String> = components
        .iter()
        .map(|c| normalize_component(c.as_ref()))
        .collect();
    let usable = normalized.iter().filter(|c| !c.is_empty()).count();

    if usable == 0 {
        return CompositeKey::unkeyed();
    }

    if usable < min_components {
        let joined = normalized.join(&COMPONENT_SEPARATOR.to_string());
        let digest = hex::encode(Sha256::digest(joined.as_bytes()));
        return CompositeKey {
            value: format!("v{KEY_FORMAT_VERSION}h:{}", &digest[..HASH_PREFIX_LEN]),
            kind: KeyKind::Hashed,
            version: KEY_FORMAT_VERSION,
        };
    }

    let mut body = normalized.join("_");
    body.truncate(MAX_KEY_BODY_LEN);
    CompositeKey {
        value: format!("v{KEY_FORMAT_VERSION}:{body}"),
        kind: KeyKind::Natural,
        version: KEY_FORMAT_VERSION,
    }
}

/// trim → lowercase → whitespace to `_` → strip outside `[a-z0-9_]` →
/// collapse and trim `_`
pub fn normalize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_underscore = true;

    for c in raw.trim().chars().flat_map(char::to_lowercase) {
        let c = if c.is_whitespace() { '_' } else { c };
        if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
            continue;
        }
        if c == '_' {
            if last_underscore {
                continue;
            }
            last_underscore = true;
        } else {
            last_underscore = false;
        }
        out.push(c);
    }

    out.trim_end_matches('_').to_string()
}

fn component_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
