//! End-to-end sync runs against the in-memory store
//!
//! Each test drives a full `SyncOrchestrator::run` and then inspects the
//! stored rows, the recorded store calls and the report.

mod common;

use common::{add_column_calls, id_keyed_payments, init_test_tracing, range};
use schoolsync_ingest::store::StoreOp;
use schoolsync_ingest::{
    ColumnType, MemoryStore, RecordErrorKind, SourceError, StaticSource, SyncError, SyncOrchestrator, SyncProfile,
    SyncState,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn orchestrator(profile: SyncProfile, store: &Arc<MemoryStore>, payload: Value) -> SyncOrchestrator {
    SyncOrchestrator::new(profile, Arc::new(StaticSource::new(payload)), store.clone()).unwrap()
}

fn booking(level: &str) -> Value {
    json!({
        "customer_name": "Doe, Jane",
        "period": "Week 1, 01/01/2025 – 07/01/2025",
        "class_name": "B2 AM",
        "days": "Monday",
        "level": level,
    })
}

// ============================================================================
// End-to-end
// ============================================================================

#[tokio::test]
async fn test_payment_round_trip_through_store() {
    init_test_tracing();
    let store = Arc::new(MemoryStore::new());
    let payload = json!({
        "hits": 1,
        "entries": {
            "42": {
                "amount": "€1,234.56",
                "payment_date": "05/09/2025",
                "email": "a<br>b@x.com"
            }
        }
    });
    let mut sync = orchestrator(id_keyed_payments(), &store, payload);

    let first = sync.run(&range()).await.unwrap();
    assert_eq!(first.fetched, 1);
    assert_eq!(first.inserted, 1);
    assert_eq!(first.updated, 0);
    assert!(first.issues.is_empty(), "unexpected issues: {:?}", first.issues);

    let row = store.row_by_key("fidelo_payments", "v1:42").unwrap();
    assert_eq!(row.fields.get("source_id"), Some(&json!(42)));
    assert_eq!(row.fields.get("amount"), Some(&json!("1234.56")));
    assert_eq!(row.fields.get("payment_date"), Some(&json!("2025-09-05")));
    assert_eq!(row.fields.get("email"), Some(&json!("a, b@x.com")));
    assert_eq!(row.sync_count, 1);

    let second = sync.run(&range()).await.unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 1);

    let again = store.row_by_key("fidelo_payments", "v1:42").unwrap();
    assert_eq!(again.id, row.id);
    assert_eq!(again.fields, row.fields);
    assert_eq!(again.sync_count, 2);
    assert_eq!(store.row_count("fidelo_payments"), 1);
}

#[tokio::test]
async fn test_new_field_adds_one_column_before_upsert() {
    init_test_tracing();
    let store = Arc::new(MemoryStore::new());
    let mut with_field = orchestrator(
        id_keyed_payments(),
        &store,
        json!([{"id": 1, "payer": "Doe", "referral_source": "open_day"}]),
    );
    with_field.run(&range()).await.unwrap();

    let ops = store.operations();
    assert_eq!(add_column_calls(&ops, "referral_source"), 1);

    let add_at = ops
        .iter()
        .position(|op| {
            matches!(
                op,
                StoreOp::AddColumn { column, column_type: ColumnType::Text, .. } if column == "referral_source"
            )
        })
        .unwrap();
    let upsert_at = ops
        .iter()
        .position(|op| matches!(op, StoreOp::Upsert { .. }))
        .unwrap();
    assert!(add_at < upsert_at);

    // A later run without the field leaves the column and the stored value alone
    let mut without_field = orchestrator(id_keyed_payments(), &store, json!([{"id": 1, "payer": "Doe"}]));
    let report = without_field.run(&range()).await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.columns_added, 0);

    assert!(store
        .columns("fidelo_payments")
        .iter()
        .any(|c| c.name == "referral_source"));
    assert_eq!(add_column_calls(&store.operations(), "referral_source"), 1);
    let row = store.row_by_key("fidelo_payments", "v1:1").unwrap();
    assert_eq!(row.fields.get("referral_source"), Some(&json!("open_day")));
}

// ============================================================================
// Protection and routing
// ============================================================================

#[tokio::test]
async fn test_operator_value_survives_resync() {
    init_test_tracing();
    let store = Arc::new(MemoryStore::new());

    let mut first = booking("B2");
    first["manual_hours"] = json!("auto");
    orchestrator(SyncProfile::bookings(), &store, json!([first]))
        .run(&range())
        .await
        .unwrap();

    let row = store.rows("fidelo_bookings").pop().unwrap();
    store
        .set_field("fidelo_bookings", row.id, "manual_hours", json!("X"))
        .unwrap();

    let mut second = booking("C1");
    second["manual_hours"] = json!("auto");
    let report = orchestrator(SyncProfile::bookings(), &store, json!([second]))
        .run(&range())
        .await
        .unwrap();
    assert_eq!(report.updated, 1);

    let row = store.row("fidelo_bookings", row.id).unwrap();
    assert_eq!(row.fields.get("manual_hours"), Some(&json!("X")));
    assert_eq!(row.fields.get("level"), Some(&json!("C1")));
}

#[tokio::test]
async fn test_extension_fields_land_only_in_extension_table() {
    init_test_tracing();
    let store = Arc::new(MemoryStore::new());

    let mut record = booking("B2");
    record["accommodation_room"] = json!("12B");
    let report = orchestrator(SyncProfile::bookings(), &store, json!([record]))
        .run(&range())
        .await
        .unwrap();
    assert_eq!(report.inserted, 1);

    let primary = store.rows("fidelo_bookings").pop().unwrap();
    assert!(!primary.fields.contains_key("accommodation_room"));
    assert!(store
        .columns("fidelo_bookings")
        .iter()
        .all(|c| c.name != "accommodation_room"));

    let extension = store.row("fidelo_bookings_ext", primary.id).unwrap();
    assert_eq!(extension.fields.get("accommodation_room"), Some(&json!("12B")));
    assert!(!extension.fields.contains_key("level"));
}

#[tokio::test]
async fn test_schema_only_grows() {
    init_test_tracing();
    let store = Arc::new(MemoryStore::new());
    let batches = [
        json!([{"id": 1, "payer": "Doe"}]),
        json!([{"id": 2, "payer": "Roe", "invoice_number": "INV-2"}]),
        json!([{"id": 3, "invoice_number": "INV-3"}]),
        json!([{"id": 4, "payer": "Poe", "invoice_number": "INV-4", "notes": "late"}]),
    ];

    let mut previous: Vec<String> = Vec::new();
    for batch in batches {
        orchestrator(id_keyed_payments(), &store, batch)
            .run(&range())
            .await
            .unwrap();

        let current: Vec<String> = store
            .columns("fidelo_payments")
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert!(previous.iter().all(|c| current.contains(c)), "lost a column: {previous:?} -> {current:?}");
        assert!(current.len() >= previous.len());
        previous = current;
    }
    assert!(previous.contains(&"notes".to_string()));
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test]
async fn test_failed_column_add_drops_only_that_field() {
    init_test_tracing();
    let store = Arc::new(MemoryStore::new());
    store.fail_add_column("notes");

    let report = orchestrator(
        id_keyed_payments(),
        &store,
        json!([{"id": 1, "payer": "Doe", "notes": "call back"}]),
    )
    .run(&range())
    .await
    .unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.fields_dropped, 1);
    let issue = report.issues_of(RecordErrorKind::SchemaEvolution).next().unwrap();
    assert_eq!(issue.field.as_deref(), Some("notes"));

    let row = store.row_by_key("fidelo_payments", "v1:1").unwrap();
    assert!(!row.fields.contains_key("notes"));
    assert_eq!(row.fields.get("payer"), Some(&json!("Doe")));
}

#[tokio::test]
async fn test_failed_upsert_does_not_stop_the_run() {
    init_test_tracing();
    let store = Arc::new(MemoryStore::new());
    store.fail_upsert_for_key("v1:2");

    let report = orchestrator(
        id_keyed_payments(),
        &store,
        json!([{"id": 1, "payer": "A"}, {"id": 2, "payer": "B"}, {"id": 3, "payer": "C"}]),
    )
    .run(&range())
    .await
    .unwrap();

    assert_eq!(report.inserted, 2);
    assert_eq!(report.failed, 1);
    let issue = report.issues_of(RecordErrorKind::Upsert).next().unwrap();
    assert_eq!(issue.record_index, 1);
    assert_eq!(issue.key.as_deref(), Some("v1:2"));
    assert!(store.row_by_key("fidelo_payments", "v1:3").is_some());
    assert!((report.success_rate() - 66.666).abs() < 0.01);
}

#[tokio::test]
async fn test_unparseable_value_is_stored_as_null() {
    init_test_tracing();
    let store = Arc::new(MemoryStore::new());

    let report = orchestrator(
        id_keyed_payments(),
        &store,
        json!([{"id": 5, "payment_date": "someday", "amount": "€3"}]),
    )
    .run(&range())
    .await
    .unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.values_nulled, 1);
    let row = store.row_by_key("fidelo_payments", "v1:5").unwrap();
    assert_eq!(row.fields.get("payment_date"), Some(&Value::Null));
    assert_eq!(row.fields.get("amount"), Some(&json!("3.00")));
}

#[tokio::test]
async fn test_text_with_a_leading_date_stays_text() {
    init_test_tracing();
    let store = Arc::new(MemoryStore::new());

    let report = orchestrator(
        id_keyed_payments(),
        &store,
        json!([{"id": 1, "notes": "05/09/2025 student called"}, {"id": 2, "notes": "call back"}]),
    )
    .run(&range())
    .await
    .unwrap();

    assert_eq!(report.inserted, 2);
    assert_eq!(report.values_as_text, 0);
    let notes = store
        .columns("fidelo_payments")
        .into_iter()
        .find(|c| c.name == "notes")
        .unwrap();
    assert_eq!(notes.column_type, ColumnType::Text);

    let first = store.row_by_key("fidelo_payments", "v1:1").unwrap();
    assert_eq!(first.fields.get("notes"), Some(&json!("05/09/2025 student called")));
    let second = store.row_by_key("fidelo_payments", "v1:2").unwrap();
    assert_eq!(second.fields.get("notes"), Some(&json!("call back")));
}

#[tokio::test]
async fn test_misfit_value_is_kept_in_text_column() {
    init_test_tracing();
    let store = Arc::new(MemoryStore::new());

    let report = orchestrator(
        id_keyed_payments(),
        &store,
        json!([{"id": 1, "follow_up": "05/09/2025"}, {"id": 2, "follow_up": "call back"}]),
    )
    .run(&range())
    .await
    .unwrap();

    assert_eq!(report.inserted, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(report.values_as_text, 1);
    assert_eq!(report.values_nulled, 0);
    assert_eq!(report.issues_of(RecordErrorKind::TextFallback).count(), 1);

    let ops = store.operations();
    assert_eq!(add_column_calls(&ops, "follow_up_text"), 1);
    assert!(ops.iter().any(|op| {
        matches!(op, StoreOp::AddColumn { column, column_type: ColumnType::Text, .. } if column == "follow_up_text")
    }));

    let dated = store.row_by_key("fidelo_payments", "v1:1").unwrap();
    assert_eq!(dated.fields.get("follow_up"), Some(&json!("2025-09-05 00:00:00")));
    let kept = store.row_by_key("fidelo_payments", "v1:2").unwrap();
    assert_eq!(kept.fields.get("follow_up"), Some(&Value::Null));
    assert_eq!(kept.fields.get("follow_up_text"), Some(&json!("call back")));

    // Once the value fits again the stale text is cleared
    let report = orchestrator(id_keyed_payments(), &store, json!([{"id": 2, "follow_up": "06/09/2025"}]))
        .run(&range())
        .await
        .unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.values_as_text, 0);
    assert_eq!(add_column_calls(&store.operations(), "follow_up_text"), 1);

    let fixed = store.row_by_key("fidelo_payments", "v1:2").unwrap();
    assert_eq!(fixed.fields.get("follow_up"), Some(&json!("2025-09-06 00:00:00")));
    assert_eq!(fixed.fields.get("follow_up_text"), Some(&Value::Null));
}

#[tokio::test]
async fn test_failed_extension_write_keeps_primary_outcome() {
    init_test_tracing();
    let store = Arc::new(MemoryStore::new());
    store.fail_upsert_extension("fidelo_bookings_ext");

    let mut record = booking("B2");
    record["accommodation_room"] = json!("12B");
    let report = orchestrator(SyncProfile::bookings(), &store, json!([record]))
        .run(&range())
        .await
        .unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.extension_failures, 1);
    let issue = report.issues_of(RecordErrorKind::ExtensionUpsert).next().unwrap();
    assert_eq!(issue.record_index, 0);
    assert_eq!(report.issues_of(RecordErrorKind::Upsert).count(), 0);

    let primary = store.rows("fidelo_bookings").pop().unwrap();
    assert_eq!(primary.fields.get("level"), Some(&json!("B2")));
    assert!(store.row("fidelo_bookings_ext", primary.id).is_none());
}

#[tokio::test]
async fn test_source_failure_is_fatal() {
    init_test_tracing();
    let store = Arc::new(MemoryStore::new());
    let mut sync = SyncOrchestrator::new(
        SyncProfile::payments(),
        Arc::new(StaticSource::failing(503, "maintenance")),
        store.clone(),
    )
    .unwrap();

    let err = sync.run(&range()).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::SourceUnavailable(SourceError::Status { status: 503, .. })
    ));
    assert_eq!(sync.state(), SyncState::Idle);
    assert!(!store
        .operations()
        .iter()
        .any(|op| matches!(op, StoreOp::Upsert { .. })));

    let mut denied = SyncOrchestrator::new(
        SyncProfile::payments(),
        Arc::new(StaticSource::failing(401, "")),
        store.clone(),
    )
    .unwrap();
    let err = denied.run(&range()).await.unwrap_err();
    assert!(matches!(err, SyncError::SourceUnavailable(SourceError::Unauthorized(401))));
}

// ============================================================================
// Payload shapes and keys
// ============================================================================

#[tokio::test]
async fn test_tabular_payload() {
    init_test_tracing();
    let store = Arc::new(MemoryStore::new());
    let payload = json!({
        "data": {
            "head": ["Customer Name", "Period", {"title": "Class Name"}, "Days", {"title": "Course Fee"}],
            "body": [
                {"items": ["Doe, Jane", "Week 1", "B2 AM", "Monday", {"value": "€450"}]},
                {"items": ["Roe, Rick", "Week 1", "C1 PM", "Tuesday", "€1.234,50"]}
            ]
        }
    });

    let report = orchestrator(SyncProfile::bookings(), &store, payload)
        .run(&range())
        .await
        .unwrap();
    assert_eq!(report.inserted, 2);

    let row = store
        .row_by_key("fidelo_bookings", "v1:doe_jane_week_1_b2_am_monday")
        .unwrap();
    assert_eq!(row.fields.get("course_fee"), Some(&json!("450.00")));
    assert_eq!(row.fields.get("customer_name"), Some(&json!("Doe, Jane")));
}

#[tokio::test]
async fn test_key_collision_is_counted() {
    init_test_tracing();
    let store = Arc::new(MemoryStore::new());

    let report = orchestrator(
        id_keyed_payments(),
        &store,
        json!([
            {"id": 7, "payer": "B1"},
            {"id": 7, "payer": "B2"},
            {"id": 7, "payer": "B2"}
        ]),
    )
    .run(&range())
    .await
    .unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.updated, 2);
    assert_eq!(report.key_collisions, 1);
    let row = store.row_by_key("fidelo_payments", "v1:7").unwrap();
    assert_eq!(row.fields.get("payer"), Some(&json!("B2")));
}

#[tokio::test]
async fn test_unkeyed_and_empty_records() {
    init_test_tracing();
    let store = Arc::new(MemoryStore::new());

    let report = orchestrator(
        id_keyed_payments(),
        &store,
        json!([{"payer": "Doe"}, {"payer": "Doe"}, {}, {"notes": null}]),
    )
    .run(&range())
    .await
    .unwrap();

    assert_eq!(report.fetched, 4);
    assert_eq!(report.unkeyed, 2);
    assert_eq!(report.inserted, 2);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.processed(), 4);
    assert_eq!(store.row_count("fidelo_payments"), 2);
    assert!(store
        .rows("fidelo_payments")
        .iter()
        .all(|r| r.sync_key.as_deref().is_some_and(|k| k.starts_with("unkeyed:"))));
}
