//! Shared helpers for schoolsync-ingest integration tests
//!
//! - Tracing setup that writes through the test harness
//! - Record and profile builders
//! - A MySQL container wrapper for the Docker-backed tests

#![allow(dead_code)]

use anyhow::{Context, Result};
use chrono::NaiveDate;
use schoolsync_ingest::key::KeySpec;
use schoolsync_ingest::store::StoreOp;
use schoolsync_ingest::{DateRange, RawRecord, SyncProfile};
use serde_json::Value;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::mysql::Mysql;
use tracing::{debug, info};

/// Initialize tracing for tests
///
/// Call this at the start of your test to enable logging.
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,schoolsync_ingest=debug,sqlx=warn,testcontainers=info")),
        )
        .with_test_writer()
        .try_init();
}

/// A one-day range; sources under test ignore it
pub fn range() -> DateRange {
    let day = NaiveDate::from_ymd_opt(2025, 9, 5).unwrap();
    DateRange::new(day, day).unwrap()
}

/// Build a raw record from a JSON object literal
pub fn record(value: Value) -> RawRecord {
    value.as_object().cloned().expect("record fixture must be an object")
}

/// The payments profile keyed on the source's own id
pub fn id_keyed_payments() -> SyncProfile {
    SyncProfile {
        key: KeySpec::new(["id"]),
        ..SyncProfile::payments()
    }
}

/// Number of add-column calls for `column` on any table
pub fn add_column_calls(ops: &[StoreOp], column: &str) -> usize {
    ops.iter()
        .filter(|op| matches!(op, StoreOp::AddColumn { column: c, .. } if c == column))
        .count()
}

// ============================================================================
// MySQL Test Container
// ============================================================================

/// MySQL test container wrapper
///
/// The container is stopped when this value is dropped.
pub struct TestMySql {
    container: ContainerAsync<Mysql>,
    pool: MySqlPool,
    connection_string: String,
}

impl TestMySql {
    /// Start a MySQL container and connect a small pool to it
    pub async fn start() -> Result<Self> {
        info!("Starting MySQL test container...");

        let container = Mysql::default()
            .start()
            .await
            .context("Failed to start MySQL container")?;

        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(3306.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string = format!("mysql://root@{}:{}/test", host, port);
        debug!("MySQL connection: {}", connection_string);

        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
            .context("Failed to connect to MySQL")?;

        Ok(Self {
            container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}
