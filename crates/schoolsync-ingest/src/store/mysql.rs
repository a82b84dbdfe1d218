//! MySQL-backed [`RecordStore`]
//!
//! Identifiers cannot be bound as parameters, so every table and column
//! name is checked with [`checked_identifier`] before it is interpolated.
//! Values are always bound.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::mysql::{MySqlArguments, MySqlDatabaseError, MySqlPool, MySqlPoolOptions};
use sqlx::query::Query;
use sqlx::MySql;
use std::time::Duration;
use tracing::debug;

use super::{checked_identifier, RecordStore, StoreError};
use crate::config::{
    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS, DEFAULT_DATABASE_MAX_CONNECTIONS, DEFAULT_DATABASE_MIN_CONNECTIONS,
    DEFAULT_DATABASE_URL,
};
use crate::key::CompositeKey;
use crate::schema::identifier::MAX_IDENTIFIER_LEN;
use crate::types::{ColumnType, FieldMap, ProtectedFields, StoredColumn, TablePair, UpsertOutcome, UpsertStatus};

const ER_DUP_FIELDNAME: u16 = 1060;
const ER_NO_REFERENCED_ROW: u16 = 1452;

/// Connection pool settings
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
    pub max_lifetime_secs: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: Some(600),
            max_lifetime_secs: Some(1800),
        }
    }
}

impl DatabaseConfig {
    pub async fn connect(&self) -> Result<MySqlPool, StoreError> {
        let mut options = MySqlPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.connect_timeout_secs));

        if let Some(idle_timeout) = self.idle_timeout_secs {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }

        if let Some(max_lifetime) = self.max_lifetime_secs {
            options = options.max_lifetime(Duration::from_secs(max_lifetime));
        }

        let pool = options.connect(&self.url).await?;

        tracing::info!(
            max_connections = self.max_connections,
            min_connections = self.min_connections,
            "Database connection pool created"
        );

        Ok(pool)
    }
}

#[derive(Debug, Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(StoreError::from)
    }
}

fn mysql_error_number(error: &sqlx::Error) -> Option<u16> {
    error
        .as_database_error()?
        .try_downcast_ref::<MySqlDatabaseError>()
        .map(MySqlDatabaseError::number)
}

/// Constraint names share one namespace per database and are capped at 64
fn constraint_name(prefix: &str, table: &str) -> String {
    let mut name = format!("{prefix}_{table}");
    name.truncate(MAX_IDENTIFIER_LEN);
    name
}

fn bind_value<'q>(query: Query<'q, MySql, MySqlArguments>, value: &'q Value) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(u) = n.as_u64() {
                query.bind(u)
            } else {
                query.bind(n.as_f64())
            }
        },
        Value::String(s) => query.bind(s.as_str()),
        Value::Array(_) | Value::Object(_) => query.bind(value.to_string()),
    }
}

fn column_list(fields: &FieldMap) -> Result<Vec<&str>, StoreError> {
    fields.keys().map(|c| checked_identifier(c)).collect()
}

fn update_assignments(columns: &[&str], protected: &ProtectedFields) -> String {
    columns
        .iter()
        .filter(|c| !protected.contains(c))
        .map(|c| format!(", `{c}` = VALUES(`{c}`)"))
        .collect()
}

#[async_trait]
impl RecordStore for MySqlStore {
    fn name(&self) -> &str {
        "mysql"
    }

    async fn ensure_tables(&self, tables: &TablePair) -> Result<(), StoreError> {
        let primary = checked_identifier(&tables.primary)?;
        let extension = checked_identifier(&tables.extension)?;

        let create_primary = format!(
            r#"
            CREATE TABLE IF NOT EXISTS `{primary}` (
                `id` BIGINT UNSIGNED NOT NULL AUTO_INCREMENT,
                `sync_key` VARCHAR(255) NOT NULL,
                `sync_key_version` SMALLINT UNSIGNED NOT NULL,
                `created_at` DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                `last_synced_at` DATETIME NOT NULL,
                `sync_count` INT UNSIGNED NOT NULL DEFAULT 1,
                PRIMARY KEY (`id`),
                UNIQUE KEY `uq_sync_key` (`sync_key`)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
            "#
        );
        sqlx::query(&create_primary).execute(&self.pool).await?;

        let foreign_key = constraint_name("fk", extension);
        let create_extension = format!(
            r#"
            CREATE TABLE IF NOT EXISTS `{extension}` (
                `id` BIGINT UNSIGNED NOT NULL,
                `created_at` DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                `last_synced_at` DATETIME NOT NULL,
                PRIMARY KEY (`id`),
                CONSTRAINT `{foreign_key}` FOREIGN KEY (`id`)
                    REFERENCES `{primary}` (`id`) ON DELETE CASCADE
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
            "#
        );
        sqlx::query(&create_extension).execute(&self.pool).await?;

        debug!(primary = %primary, extension = %extension, "ensured sync tables");
        Ok(())
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<StoredColumn>, StoreError> {
        let table = checked_identifier(table)?;
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT
                CAST(COLUMN_NAME AS CHAR),
                CAST(DATA_TYPE AS CHAR),
                CAST(COLUMN_TYPE AS CHAR)
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(StoreError::UnknownTable(table.to_string()));
        }

        Ok(rows
            .into_iter()
            .map(|(name, data_type, column_type)| StoredColumn {
                column_type: ColumnType::from_sql(&data_type, &column_type),
                name,
            })
            .collect())
    }

    async fn add_column(&self, table: &str, column: &str, column_type: ColumnType) -> Result<(), StoreError> {
        let table = checked_identifier(table)?;
        let column = checked_identifier(column)?;
        let ddl = format!(
            "ALTER TABLE `{table}` ADD COLUMN `{column}` {} NULL",
            column_type.sql_definition()
        );

        match sqlx::query(&ddl).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) if mysql_error_number(&e) == Some(ER_DUP_FIELDNAME) => Err(StoreError::DuplicateColumn {
                table: table.to_string(),
                column: column.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert(
        &self,
        table: &str,
        key: &CompositeKey,
        fields: &FieldMap,
        protected: &ProtectedFields,
    ) -> Result<UpsertOutcome, StoreError> {
        let table = checked_identifier(table)?;
        let columns = column_list(fields)?;

        let column_sql: String = columns.iter().map(|c| format!(", `{c}`")).collect();
        let placeholders = ", ?".repeat(columns.len());
        let updates = update_assignments(&columns, protected);

        // LAST_INSERT_ID(id) makes the existing row's id visible on update;
        // sync_count always changes, so an update reports 2 affected rows
        let sql = format!(
            "INSERT INTO `{table}` (`sync_key`, `sync_key_version`, `last_synced_at`{column_sql}) \
             VALUES (?, ?, UTC_TIMESTAMP(){placeholders}) \
             ON DUPLICATE KEY UPDATE `id` = LAST_INSERT_ID(`id`), \
             `sync_count` = `sync_count` + 1, \
             `last_synced_at` = UTC_TIMESTAMP(){updates}"
        );

        let mut query = sqlx::query(&sql).bind(key.as_str()).bind(key.version());
        for value in fields.values() {
            query = bind_value(query, value);
        }

        let result = query.execute(&self.pool).await?;
        let id = result.last_insert_id();
        match result.rows_affected() {
            1 => Ok(UpsertOutcome::inserted(id)),
            2 => Ok(UpsertOutcome::updated(id)),
            n => Err(StoreError::Rejected(format!(
                "upsert into `{table}` affected {n} rows"
            ))),
        }
    }

    async fn upsert_extension(
        &self,
        table: &str,
        id: u64,
        fields: &FieldMap,
        protected: &ProtectedFields,
    ) -> Result<UpsertStatus, StoreError> {
        let table = checked_identifier(table)?;
        let columns = column_list(fields)?;

        let column_sql: String = columns.iter().map(|c| format!(", `{c}`")).collect();
        let placeholders = ", ?".repeat(columns.len());
        let updates = update_assignments(&columns, protected);

        let sql = format!(
            "INSERT INTO `{table}` (`id`, `last_synced_at`{column_sql}) \
             VALUES (?, UTC_TIMESTAMP(){placeholders}) \
             ON DUPLICATE KEY UPDATE `last_synced_at` = UTC_TIMESTAMP(){updates}"
        );

        let mut query = sqlx::query(&sql).bind(id);
        for value in fields.values() {
            query = bind_value(query, value);
        }

        match query.execute(&self.pool).await {
            Ok(result) if result.rows_affected() == 1 => Ok(UpsertStatus::Inserted),
            Ok(_) => Ok(UpsertStatus::Updated),
            Err(e) if mysql_error_number(&e) == Some(ER_NO_REFERENCED_ROW) => {
                Err(StoreError::MissingParent {
                    table: table.to_string(),
                    id,
                })
            },
            Err(e) => Err(e.into()),
        }
    }
}
