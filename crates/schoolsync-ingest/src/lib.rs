//! Schoolsync Ingest Library
//!
//! Pulls booking and payment records from the Fidelo school management API
//! and keeps a pair of MySQL tables in step with them, adding columns as new
//! fields show up.
//!
//! # Pipeline
//!
//! - **Source**: [`source::FideloClient`] (or a local JSON file) returns one
//!   of three payload shapes, flattened into raw records
//! - **Normalize**: text cleanup, date and money parsing, identifier
//!   sanitization
//! - **Schema**: type inference and additive `ADD COLUMN` evolution
//! - **Key**: versioned composite keys that identify a record across runs
//! - **Upsert**: primary plus extension table writes that never overwrite
//!   protected fields
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use schoolsync_ingest::{DateRange, JsonFileSource, MemoryStore, SyncOrchestrator, SyncProfile};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut orchestrator = SyncOrchestrator::new(
//!         SyncProfile::bookings(),
//!         Arc::new(JsonFileSource::new("bookings.json")),
//!         Arc::new(MemoryStore::new()),
//!     )?;
//!     let range = DateRange::ending_at(chrono::Utc::now().date_naive(), 30);
//!     let report = orchestrator.run(&range).await?;
//!     println!("{} new, {} updated", report.inserted, report.updated);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod error;
pub mod key;
pub mod normalize;
pub mod orchestrator;
pub mod profile;
pub mod report;
pub mod schema;
pub mod source;
pub mod store;
pub mod types;
pub mod upsert;

pub use config::SyncConfig;
pub use error::{RecordError, RecordErrorKind, SyncError};
pub use key::{CompositeKey, KeyKind, KeySpec};
pub use normalize::{FieldRules, Normalizer};
pub use orchestrator::{SyncOrchestrator, SyncState};
pub use profile::SyncProfile;
pub use report::{SyncIssue, SyncReport};
pub use schema::SchemaManager;
pub use source::{DateRange, FideloClient, FideloConfig, JsonFileSource, RecordSource, SourceError, StaticSource};
pub use store::{MemoryStore, MySqlStore, RecordStore, StoreError};
pub use types::{ColumnType, FieldMap, RawRecord, TargetTable, UpsertOutcome, UpsertStatus};
