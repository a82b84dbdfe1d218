//! Sync orchestrator
//!
//! Drives one sync cycle:
//!
//! ```text
//! IDLE → FETCHING → PROCESSING → REPORTING → IDLE
//! ```
//!
//! Records are processed strictly one at a time so `ADD COLUMN` never races
//! with itself or with the write that needs the new column. Only a source
//! or storage failure before processing ends the run with an error; problems
//! with single records are collected in the [`SyncReport`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{RecordError, SyncError};
use crate::key::KeySpec;
use crate::normalize::Normalizer;
use crate::profile::SyncProfile;
use crate::report::SyncReport;
use crate::schema::{fallback_column_name, storage_fields, SchemaManager, TypeInference};
use crate::source::{DateRange, RecordSource};
use crate::store::RecordStore;
use crate::types::{ColumnDescriptor, FieldMap, RawRecord};
use crate::upsert::{PreparedRecord, UpsertCoordinator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Fetching,
    Processing,
    Reporting,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "idle",
            SyncState::Fetching => "fetching",
            SyncState::Processing => "processing",
            SyncState::Reporting => "reporting",
        };
        f.write_str(name)
    }
}

/// Runs sync cycles for one profile against injected source and store
pub struct SyncOrchestrator {
    profile: SyncProfile,
    source: Arc<dyn RecordSource>,
    store: Arc<dyn RecordStore>,
    normalizer: Normalizer,
    key_spec: KeySpec,
    schema: SchemaManager,
    coordinator: UpsertCoordinator,
    state: SyncState,
}

/// Per-run bookkeeping for key collision detection
#[derive(Default)]
struct SeenKeys {
    fingerprints: HashMap<String, String>,
}

impl SeenKeys {
    /// Whether a different record was already written under `key` this run
    fn collides(&mut self, key: &str, fields: &FieldMap) -> bool {
        let fingerprint = fingerprint(fields);
        match self.fingerprints.insert(key.to_string(), fingerprint.clone()) {
            Some(previous) => previous != fingerprint,
            None => false,
        }
    }
}

fn fingerprint(fields: &FieldMap) -> String {
    let mut hasher = Sha256::new();
    for (name, value) in fields {
        hasher.update(name.as_bytes());
        hasher.update([0x1f]);
        hasher.update(value.to_string().as_bytes());
        hasher.update([0x1e]);
    }
    hex::encode(hasher.finalize())
}

impl SyncOrchestrator {
    pub fn new(
        profile: SyncProfile,
        source: Arc<dyn RecordSource>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self, SyncError> {
        let profile = profile.validated()?;
        let normalizer = Normalizer::new(profile.fields.clone())?;
        let inference = TypeInference::new(profile.inference, profile.fields.clone());
        let schema = SchemaManager::new(profile.tables(), profile.extension.clone(), inference);
        let coordinator = UpsertCoordinator::new(profile.tables(), profile.protected());

        Ok(Self {
            key_spec: profile.key.clone(),
            profile,
            source,
            store,
            normalizer,
            schema,
            coordinator,
            state: SyncState::Idle,
        })
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn profile(&self) -> &SyncProfile {
        &self.profile
    }

    pub fn schema(&self) -> &SchemaManager {
        &self.schema
    }

    fn transition(&mut self, next: SyncState) {
        debug!(profile = %self.profile.name, from = %self.state, state = %next, "sync state");
        self.state = next;
    }

    async fn ensure_schema(&mut self) -> Result<(), SyncError> {
        if self.schema.is_loaded() {
            return Ok(());
        }
        self.schema.load(self.store.as_ref()).await.map_err(|e| {
            error!(store = self.store.name(), error = %e, "cannot load table schema");
            SyncError::StorageUnavailable(e)
        })
    }

    /// Run one full sync cycle for `range`.
    ///
    /// Returns `Err` only when the store or source cannot be reached; the
    /// orchestrator is back in [`SyncState::Idle`] either way.
    pub async fn run(&mut self, range: &DateRange) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(self.profile.name.clone(), self.source.name());
        report.range_from = Some(range.from);
        report.range_until = Some(range.until);

        info!(
            profile = %self.profile.name,
            source = self.source.name(),
            store = self.store.name(),
            range = %range,
            "Starting sync"
        );

        self.ensure_schema().await?;

        self.transition(SyncState::Fetching);
        let records = match self.fetch(range).await {
            Ok(records) => records,
            Err(e) => {
                error!(source = self.source.name(), error = %e, "Fetch failed, nothing processed");
                self.transition(SyncState::Idle);
                return Err(e);
            },
        };
        report.fetched = records.len() as u64;
        info!(records = records.len(), "Fetched records");

        self.transition(SyncState::Processing);
        let mut seen = SeenKeys::default();
        for (index, raw) in records.iter().enumerate() {
            self.process_record(index, raw, &mut seen, &mut report).await;
        }

        self.transition(SyncState::Reporting);
        report.complete();
        info!(
            profile = %self.profile.name,
            fetched = report.fetched,
            inserted = report.inserted,
            updated = report.updated,
            failed = report.failed,
            skipped = report.skipped,
            columns_added = report.columns_added,
            duration_secs = report.duration_secs,
            "Sync completed: {} new, {} updated, {} failed",
            report.inserted,
            report.updated,
            report.failed
        );
        self.transition(SyncState::Idle);

        Ok(report)
    }

    async fn fetch(&self, range: &DateRange) -> Result<Vec<RawRecord>, SyncError> {
        let payload = self.source.fetch(range).await?;
        Ok(payload.into_records()?)
    }

    async fn process_record(&mut self, index: usize, raw: &RawRecord, seen: &mut SeenKeys, report: &mut SyncReport) {
        let normalized = self.normalizer.normalize_record(raw);
        for issue in &normalized.issues {
            report.record_error(index, None, RecordError::normalization(issue));
        }

        if normalized.fields.values().all(Value::is_null) {
            debug!(record = index, "record has no usable fields, skipping");
            report.inc_skipped();
            return;
        }

        let key = self.key_spec.key_for(&normalized.fields);
        let fields = storage_fields(normalized.fields);

        let evolution = match self.schema.evolve(self.store.as_ref(), &fields).await {
            Ok(evolution) => evolution,
            Err(e) => {
                warn!(record = index, key = %key, error = %e, "schema unavailable for record");
                report.record_error(index, Some(key.as_str()), RecordError::upsert(&e));
                return;
            },
        };
        report.columns_added += evolution.added.len() as u64;
        for dropped in &evolution.dropped {
            report.record_error(
                index,
                Some(key.as_str()),
                RecordError::schema_evolution(&dropped.column.name, &dropped.error),
            );
        }

        if key.is_unkeyed() {
            warn!(record = index, key = %key, "no key fields present, writing as unkeyed");
            report.inc_unkeyed();
        } else if seen.collides(key.as_str(), &fields) {
            warn!(record = index, key = %key, "key collision, later record overwrites earlier one");
            report.record_error(index, Some(key.as_str()), RecordError::key_collision(key.as_str()));
        }

        let mut prepared = self.coordinator.prepare(key, fields, &self.schema);
        self.place_fallbacks(index, &mut prepared, report).await;

        match self.coordinator.write(self.store.as_ref(), &prepared).await {
            Ok(written) => {
                debug!(
                    record = index,
                    key = %prepared.key,
                    id = written.primary.id,
                    inserted = written.primary.is_new(),
                    "record written"
                );
                report.record_outcome(&written.primary);
                if let Some(e) = written.extension_error {
                    let table = &self.coordinator.tables().extension;
                    report.record_error(
                        index,
                        Some(prepared.key.as_str()),
                        RecordError::extension_upsert(table, &e),
                    );
                }
            },
            Err(e) => {
                warn!(record = index, key = %prepared.key, error = %e, "record write failed");
                report.record_error(index, Some(prepared.key.as_str()), RecordError::upsert(&e));
            },
        }
    }

    /// Move values that did not fit their column into its TEXT fallback
    async fn place_fallbacks(&mut self, index: usize, prepared: &mut PreparedRecord, report: &mut SyncReport) {
        for fallback in std::mem::take(&mut prepared.fallbacks) {
            let columns_before = self.schema.column_count();
            match self.schema.ensure_fallback(self.store.as_ref(), &fallback.column).await {
                Ok(text_column) => {
                    report.columns_added += (self.schema.column_count() - columns_before) as u64;
                    warn!(
                        record = index,
                        key = %prepared.key,
                        field = %fallback.column.name,
                        column = %text_column.name,
                        column_type = %fallback.column.column_type,
                        "value does not fit column type, kept as text"
                    );
                    report.record_error(
                        index,
                        Some(prepared.key.as_str()),
                        RecordError::text_fallback(&fallback, &text_column.name),
                    );
                    prepared.place(&text_column, Value::String(fallback.text));
                },
                Err(e) => {
                    let column = fallback_column_name(&fallback.column.name);
                    warn!(
                        record = index,
                        key = %prepared.key,
                        field = %fallback.column.name,
                        column = %column,
                        error = %e,
                        "no text fallback column, value not stored"
                    );
                    report.record_error(
                        index,
                        Some(prepared.key.as_str()),
                        RecordError::schema_evolution(&column, &e),
                    );
                },
            }
        }
    }

    /// Columns the given records would add, without writing anything.
    ///
    /// Reads the current schema from the store first; the orchestrator's own
    /// cache is not changed.
    pub async fn plan(&mut self, records: &[RawRecord]) -> Result<Vec<ColumnDescriptor>, SyncError> {
        self.ensure_schema().await?;

        let mut preview = self.schema.clone();
        let mut planned = Vec::new();
        for raw in records {
            let normalized = self.normalizer.normalize_record(raw);
            let key = self.key_spec.key_for(&normalized.fields);
            let fields = storage_fields(normalized.fields);

            let columns = preview.plan_record(&fields);
            preview.apply_planned(&columns);
            planned.extend(columns);

            let prepared = self.coordinator.prepare(key, fields, &preview);
            for fallback in &prepared.fallbacks {
                if let Some(text_column) = preview.plan_fallback(&fallback.column) {
                    preview.apply_planned(std::slice::from_ref(&text_column));
                    planned.push(text_column);
                }
            }
        }
        Ok(planned)
    }
}
