//! Additive schema evolution
//!
//! [`SchemaManager`] caches the column sets of a primary/extension table pair
//! and adds a column the first time a record carries an unseen field. Columns
//! are never dropped or retyped; once a field has a type, later values are
//! coerced to it by the upsert coordinator. A value that cannot be coerced
//! goes to a companion TEXT column (`<col>_text`) added by
//! [`SchemaManager::ensure_fallback`].

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::schema::identifier::{fallback_column_name, SYSTEM_COLUMNS};
use crate::schema::inference::TypeInference;
use crate::store::{RecordStore, StoreError};
use crate::types::{ColumnDescriptor, ColumnType, FieldMap, TablePair, TableSchema, TargetTable};

/// Which fields live in the extension table.
///
/// A field is routed to the extension table when it is listed in `fields`
/// or starts with one of `prefixes`; everything else stays in the primary
/// table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionRouting {
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub prefixes: Vec<String>,
}

impl ExtensionRouting {
    pub fn target_for(&self, column: &str) -> TargetTable {
        let listed = self.fields.iter().any(|f| f == column);
        let prefixed = self
            .prefixes
            .iter()
            .any(|p| !p.is_empty() && column.starts_with(p.as_str()));
        if listed || prefixed {
            TargetTable::Extension
        } else {
            TargetTable::Primary
        }
    }
}

/// A column that could not be added
#[derive(Debug)]
pub struct DroppedColumn {
    pub column: ColumnDescriptor,
    pub error: StoreError,
}

/// What one call to [`SchemaManager::evolve`] changed
#[derive(Debug, Default)]
pub struct SchemaEvolution {
    pub added: Vec<ColumnDescriptor>,
    pub dropped: Vec<DroppedColumn>,
}

impl SchemaEvolution {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.dropped.is_empty()
    }
}

/// Cached schema of one table pair
#[derive(Debug, Clone)]
pub struct SchemaManager {
    tables: TablePair,
    routing: ExtensionRouting,
    inference: TypeInference,
    primary: TableSchema,
    extension: TableSchema,
    loaded: bool,
}

impl SchemaManager {
    pub fn new(tables: TablePair, routing: ExtensionRouting, inference: TypeInference) -> Self {
        Self {
            tables,
            routing,
            inference,
            primary: TableSchema::new(),
            extension: TableSchema::new(),
            loaded: false,
        }
    }

    pub fn tables(&self) -> &TablePair {
        &self.tables
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn schema(&self, target: TargetTable) -> &TableSchema {
        match target {
            TargetTable::Primary => &self.primary,
            TargetTable::Extension => &self.extension,
        }
    }

    /// Total number of data columns across both tables
    pub fn column_count(&self) -> usize {
        self.primary.len() + self.extension.len()
    }

    /// Create the tables if needed and read their current columns
    pub async fn load(&mut self, store: &dyn RecordStore) -> Result<(), StoreError> {
        store.ensure_tables(&self.tables).await?;

        for target in [TargetTable::Primary, TargetTable::Extension] {
            let table = self.tables.table(target).to_string();
            let columns = store.list_columns(&table).await?;
            let schema = match target {
                TargetTable::Primary => &mut self.primary,
                TargetTable::Extension => &mut self.extension,
            };
            for column in columns {
                if SYSTEM_COLUMNS.contains(&column.name.as_str()) {
                    continue;
                }
                schema.add(ColumnDescriptor {
                    name: column.name,
                    column_type: column.column_type,
                    target,
                });
            }
        }

        self.loaded = true;
        debug!(
            table = %self.tables.primary,
            primary_columns = self.primary.len(),
            extension_columns = self.extension.len(),
            "loaded schema"
        );
        Ok(())
    }

    /// Existing column for a field, in either table
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.primary.get(name).or_else(|| self.extension.get(name))
    }

    /// Columns a record would add, without touching the store
    pub fn plan_record(&self, fields: &FieldMap) -> Vec<ColumnDescriptor> {
        fields
            .iter()
            .filter(|(name, _)| self.column(name).is_none())
            .map(|(name, value)| ColumnDescriptor {
                name: name.clone(),
                column_type: self.inference.infer(name, value),
                target: self.routing.target_for(name),
            })
            .collect()
    }

    /// Record planned columns in the cache without issuing DDL
    pub fn apply_planned(&mut self, columns: &[ColumnDescriptor]) {
        for column in columns {
            self.register(column.clone());
        }
    }

    /// Add every column the record needs, one `ADD COLUMN` at a time.
    ///
    /// A failed add is logged and reported in [`SchemaEvolution::dropped`];
    /// the caller must drop that field from the record.
    pub async fn evolve(&mut self, store: &dyn RecordStore, fields: &FieldMap) -> Result<SchemaEvolution, StoreError> {
        if !self.loaded {
            self.load(store).await?;
        }

        let mut evolution = SchemaEvolution::default();
        for column in self.plan_record(fields) {
            let table = self.tables.table(column.target).to_string();
            match store.add_column(&table, &column.name, column.column_type).await {
                Ok(()) => {
                    info!(
                        table = %table,
                        column = %column.name,
                        column_type = %column.column_type,
                        "added column"
                    );
                    self.register(column.clone());
                    evolution.added.push(column);
                },
                Err(error) => {
                    warn!(
                        table = %table,
                        column = %column.name,
                        column_type = %column.column_type,
                        error = %error,
                        "failed to add column, dropping field"
                    );
                    evolution.dropped.push(DroppedColumn { column, error });
                },
            }
        }

        Ok(evolution)
    }

    /// Existing TEXT fallback column for `column`
    pub fn fallback_for(&self, column: &ColumnDescriptor) -> Option<&ColumnDescriptor> {
        self.column(&fallback_column_name(&column.name))
            .filter(|c| c.column_type == ColumnType::Text && c.target == column.target)
    }

    /// The fallback column [`Self::ensure_fallback`] would add, if any
    pub fn plan_fallback(&self, column: &ColumnDescriptor) -> Option<ColumnDescriptor> {
        let name = fallback_column_name(&column.name);
        self.column(&name).is_none().then(|| ColumnDescriptor {
            name,
            column_type: ColumnType::Text,
            target: column.target,
        })
    }

    /// TEXT column that keeps values `column` cannot hold, added on first use
    /// in the same table.
    ///
    /// Fails with [`StoreError::DuplicateColumn`] when a source field already
    /// owns the name with another type.
    pub async fn ensure_fallback(
        &mut self,
        store: &dyn RecordStore,
        column: &ColumnDescriptor,
    ) -> Result<ColumnDescriptor, StoreError> {
        if let Some(existing) = self.fallback_for(column) {
            return Ok(existing.clone());
        }

        let table = self.tables.table(column.target).to_string();
        let Some(fallback) = self.plan_fallback(column) else {
            return Err(StoreError::DuplicateColumn {
                table,
                column: fallback_column_name(&column.name),
            });
        };

        store.add_column(&table, &fallback.name, ColumnType::Text).await?;
        info!(table = %table, column = %fallback.name, typed_column = %column.name, "added text fallback column");
        self.register(fallback.clone());
        Ok(fallback)
    }

    fn register(&mut self, column: ColumnDescriptor) -> bool {
        match column.target {
            TargetTable::Primary => self.primary.add(column),
            TargetTable::Extension => self.extension.add(column),
        }
    }
}
