//! Column inference, identifier rules and additive schema evolution

pub mod evolution;
pub mod identifier;
pub mod inference;

pub use evolution::{DroppedColumn, ExtensionRouting, SchemaEvolution, SchemaManager};
pub use identifier::{
    column_name_for, fallback_column_name, sanitize_identifier, MAX_IDENTIFIER_LEN, SYSTEM_COLUMNS,
};
pub use inference::{infer_value_type, InferenceOptions, TypeInference};

use crate::types::FieldMap;

/// Rename fields that collide with sync-managed columns
pub fn storage_fields(fields: FieldMap) -> FieldMap {
    fields
        .into_iter()
        .map(|(name, value)| (column_name_for(&name), value))
        .collect()
}
