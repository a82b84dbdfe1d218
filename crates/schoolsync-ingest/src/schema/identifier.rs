//! Identifier sanitization for table and column names
//!
//! Every name that reaches DDL or DML goes through [`sanitize_identifier`],
//! which is what makes interpolating identifiers into SQL safe.

/// Maximum identifier length MySQL accepts
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Columns managed by the sync layer itself
pub const SYSTEM_COLUMNS: &[&str] = &[
    "id",
    "sync_key",
    "sync_key_version",
    "created_at",
    "last_synced_at",
    "sync_count",
];

/// Lowercase, map everything outside `[a-z0-9_]` to `_`, collapse runs of
/// `_`, strip leading/trailing `_` and cap at 64 characters.
///
/// Returns `None` when nothing usable is left.
pub fn sanitize_identifier(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut last_underscore = true;

    for c in raw.chars().flat_map(char::to_lowercase) {
        let mapped = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '_'
        };
        if mapped == '_' {
            if last_underscore {
                continue;
            }
            last_underscore = true;
        } else {
            last_underscore = false;
        }
        out.push(mapped);
    }

    out.truncate(MAX_IDENTIFIER_LEN);
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Whether `name` is already in sanitized form
pub fn is_sanitized(name: &str) -> bool {
    sanitize_identifier(name).as_deref() == Some(name)
}

/// Column name a source field is stored under.
///
/// Fields that collide with [`SYSTEM_COLUMNS`] are stored as `source_<name>`.
pub fn column_name_for(field: &str) -> String {
    if SYSTEM_COLUMNS.contains(&field) {
        format!("source_{field}")
    } else {
        field.to_string()
    }
}

/// Suffix of the TEXT column that keeps values a typed column cannot hold
pub const FALLBACK_SUFFIX: &str = "_text";

/// Name of the TEXT fallback column for `column`, capped at 64 characters
pub fn fallback_column_name(column: &str) -> String {
    let keep = MAX_IDENTIFIER_LEN - FALLBACK_SUFFIX.len();
    let base = column.get(..keep).unwrap_or(column).trim_end_matches('_');
    format!("{base}{FALLBACK_SUFFIX}")
}

/// Whether a field name matches a hint token.
///
/// `hint` matches whole `_`-separated segments, so "date" matches
/// `payment_date` and `date_of_birth` but not `update_count`.
pub fn matches_token(field: &str, hint: &str) -> bool {
    if hint.is_empty() {
        return false;
    }
    field == hint
        || field.starts_with(&format!("{hint}_"))
        || field.ends_with(&format!("_{hint}"))
        || field.contains(&format!("_{hint}_"))
}
