//! Sync profiles
//!
//! Everything that is specific to one record kind lives here as data: table
//! names, key fields, protected fields, extension routing and field hints.
//! Profiles come from TOML files or the built-in `bookings` / `payments`
//! definitions.
//!
//! ```toml
//! name = "bookings"
//! primary_table = "fidelo_bookings"
//! protected_fields = ["manual_hours", "pay_override"]
//!
//! [key]
//! fields = ["customer_name", "period", "class_name", "days"]
//! min_components = 3
//!
//! [extension]
//! prefixes = ["accommodation_", "transfer_"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::SyncError;
use crate::key::KeySpec;
use crate::normalize::FieldRules;
use crate::schema::{sanitize_identifier, ExtensionRouting, InferenceOptions, SYSTEM_COLUMNS};
use crate::types::{ProtectedFields, TablePair};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProfile {
    pub name: String,
    pub primary_table: String,
    /// Defaults to `<primary_table>_ext`
    #[serde(default)]
    pub extension_table: Option<String>,
    pub key: KeySpec,
    #[serde(default)]
    pub protected_fields: Vec<String>,
    #[serde(default)]
    pub extension: ExtensionRouting,
    #[serde(default)]
    pub fields: FieldRules,
    #[serde(default)]
    pub inference: InferenceOptions,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl SyncProfile {
    /// Course bookings: one row per student, period, class and day pattern
    pub fn bookings() -> Self {
        Self {
            name: "bookings".to_string(),
            primary_table: "fidelo_bookings".to_string(),
            extension_table: Some("fidelo_bookings_ext".to_string()),
            key: KeySpec::new(["customer_name", "period", "class_name", "days"]).with_min_components(3),
            protected_fields: strings(&["manual_hours", "pay_override", "approved", "approved_by"]),
            extension: ExtensionRouting {
                fields: strings(&["insurance", "emergency_contact"]),
                prefixes: strings(&["accommodation_", "transfer_", "document_", "payment_"]),
            },
            fields: FieldRules::default(),
            inference: InferenceOptions::default(),
        }
    }

    /// Incoming payments: one row per invoice, date, amount and payer
    pub fn payments() -> Self {
        Self {
            name: "payments".to_string(),
            primary_table: "fidelo_payments".to_string(),
            extension_table: Some("fidelo_payments_ext".to_string()),
            key: KeySpec::new(["invoice_number", "payment_date", "amount", "payer"]).with_min_components(3),
            protected_fields: strings(&["manual_note", "reconciled", "reconciled_by"]),
            extension: ExtensionRouting {
                fields: Vec::new(),
                prefixes: strings(&["document_", "bank_"]),
            },
            fields: FieldRules::default(),
            inference: InferenceOptions::default(),
        }
    }

    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "bookings" => Some(Self::bookings()),
            "payments" => Some(Self::payments()),
            _ => None,
        }
    }

    /// A built-in profile name or a path to a TOML profile
    pub fn resolve(name_or_path: &str) -> Result<Self, SyncError> {
        if let Some(profile) = Self::builtin(name_or_path) {
            return Ok(profile);
        }
        let path = Path::new(name_or_path);
        if path.exists() {
            return Self::from_toml_file(path);
        }
        Err(SyncError::Profile(format!(
            "'{name_or_path}' is neither a built-in profile (bookings, payments) nor a file"
        )))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SyncError> {
        let profile: Self = toml::from_str(content).map_err(|e| SyncError::Profile(e.to_string()))?;
        profile.validated()
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, SyncError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Profile(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Sanitize every configured name and reject unusable profiles
    pub fn validated(mut self) -> Result<Self, SyncError> {
        let table = |raw: &str| {
            sanitize_identifier(raw).ok_or_else(|| SyncError::Profile(format!("unusable table name '{raw}'")))
        };
        self.primary_table = table(&self.primary_table)?;
        self.extension_table = Some(match self.extension_table.as_deref() {
            Some(ext) => table(ext)?,
            None => table(&format!("{}_ext", self.primary_table))?,
        });
        if self.extension_table.as_deref() == Some(self.primary_table.as_str()) {
            return Err(SyncError::Profile(
                "primary and extension table must differ".to_string(),
            ));
        }

        if self.key.fields.is_empty() {
            return Err(SyncError::Profile("key needs at least one field".to_string()));
        }
        self.key.fields = sanitize_all(&self.key.fields, "key field")?;
        if self.key.min_components == 0 || self.key.min_components > self.key.fields.len() {
            return Err(SyncError::Profile(format!(
                "min_components must be between 1 and {}",
                self.key.fields.len()
            )));
        }

        self.protected_fields = sanitize_all(&self.protected_fields, "protected field")?;
        if let Some(system) = self
            .protected_fields
            .iter()
            .find(|f| SYSTEM_COLUMNS.contains(&f.as_str()))
        {
            return Err(SyncError::Profile(format!(
                "'{system}' is managed by the sync and cannot be protected"
            )));
        }

        self.extension.fields = sanitize_all(&self.extension.fields, "extension field")?;
        Ok(self)
    }

    pub fn tables(&self) -> TablePair {
        TablePair {
            primary: self.primary_table.clone(),
            extension: self
                .extension_table
                .clone()
                .unwrap_or_else(|| format!("{}_ext", self.primary_table)),
        }
    }

    pub fn protected(&self) -> ProtectedFields {
        ProtectedFields::new(self.protected_fields.iter().cloned())
    }
}

fn sanitize_all(names: &[String], what: &str) -> Result<Vec<String>, SyncError> {
    names
        .iter()
        .map(|raw| {
            sanitize_identifier(raw).ok_or_else(|| SyncError::Profile(format!("unusable {what} '{raw}'")))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtins_are_valid() {
        for name in ["bookings", "payments"] {
            let profile = SyncProfile::builtin(name).unwrap();
            assert_eq!(profile.clone().validated().unwrap(), profile);
        }
        assert!(SyncProfile::builtin("invoices").is_none());
    }

    #[test]
    fn test_toml_profile_is_sanitized() {
        let profile = SyncProfile::from_toml_str(
            r#"
            name = "courses"
            primary_table = "Fidelo Courses"
            protected_fields = ["Manual Hours"]

            [key]
            fields = ["Course Name", "Start Date"]

            [extension]
            prefixes = ["room_"]

            [fields]
            monetary = ["price"]
            "#,
        )
        .unwrap();

        assert_eq!(profile.primary_table, "fidelo_courses");
        assert_eq!(profile.tables().extension, "fidelo_courses_ext");
        assert_eq!(profile.key.fields, vec!["course_name", "start_date"]);
        assert_eq!(profile.key.min_components, 1);
        assert!(profile.protected().contains("manual_hours"));
        assert_eq!(profile.fields.monetary, vec!["price"]);
        assert_eq!(profile.fields.dates, FieldRules::default().dates);
        assert!(profile.inference.json_columns);
    }

    #[test]
    fn test_invalid_profiles() {
        let no_key = SyncProfile::from_toml_str("name = \"x\"\nprimary_table = \"t\"\n[key]\nfields = []\n");
        assert!(matches!(no_key, Err(SyncError::Profile(_))));

        let mut protected_system = SyncProfile::bookings();
        protected_system.protected_fields.push("sync_count".to_string());
        assert!(protected_system.validated().is_err());

        let mut too_many = SyncProfile::payments();
        too_many.key.min_components = 5;
        assert!(too_many.validated().is_err());

        assert!(SyncProfile::from_toml_str("not toml [").is_err());
    }

    #[test]
    fn test_resolve_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"x\"\nprimary_table = \"x_rows\"\n[key]\nfields = [\"ref\"]").unwrap();

        let profile = SyncProfile::resolve(file.path().to_str().unwrap()).unwrap();
        assert_eq!(profile.primary_table, "x_rows");
        assert_eq!(SyncProfile::resolve("bookings").unwrap().name, "bookings");
        assert!(SyncProfile::resolve("/no/such/profile.toml").is_err());
    }
}
