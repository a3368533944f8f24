use tristore_sync::{
    ChangeCursor, ErrorKind, FailureMode, MemoryStore, Operation, RemoteStore,
};
use tristore_types::{
    EntityType, ExternalRef, FieldValue, Fields, Record, RecordId, StorePairId, Timestamp,
};

fn product() -> EntityType {
    EntityType::new("product")
}

fn cursor_at(ms: u64) -> ChangeCursor {
    ChangeCursor::at(StorePairId::between("a", "b"), Timestamp::from_millis(ms))
}

fn named(name: &str) -> Fields {
    Fields::from([("name".to_string(), FieldValue::text(name))])
}

// ── Listing ─────────────────────────────────────────────────────

#[tokio::test]
async fn lists_records_strictly_after_watermark() {
    let store = MemoryStore::new("mem", "ref");
    store.put("product", Record::new("r1", Timestamp::from_millis(10)));
    store.put("product", Record::new("r2", Timestamp::from_millis(20)));
    store.put("product", Record::new("r3", Timestamp::from_millis(30)));

    let listed = store
        .list_changed_since(&product(), &cursor_at(20))
        .await
        .unwrap();
    let ids: Vec<&str> = listed.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["r3"]);
}

#[tokio::test]
async fn beginning_cursor_lists_epoch_records() {
    let store = MemoryStore::new("mem", "ref");
    store.put("product", Record::new("epoch", Timestamp::BEGINNING));

    let listed = store
        .list_changed_since(&product(), &ChangeCursor::beginning(StorePairId::between("a", "b")))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, RecordId::new("epoch"));
}

#[tokio::test]
async fn beginning_cursor_lists_everything_in_time_order() {
    let store = MemoryStore::new("mem", "ref");
    store.put("product", Record::new("late", Timestamp::from_millis(30)));
    store.put("product", Record::new("early", Timestamp::from_millis(10)));

    let listed = store
        .list_changed_since(&product(), &ChangeCursor::beginning(StorePairId::between("a", "b")))
        .await
        .unwrap();
    let ids: Vec<&str> = listed.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["early", "late"]);
}

#[tokio::test]
async fn other_entity_types_are_not_listed() {
    let store = MemoryStore::new("mem", "ref");
    store.put("invoice", Record::new("i1", Timestamp::from_millis(10)));
    let listed = store
        .list_changed_since(&product(), &cursor_at(0))
        .await
        .unwrap();
    assert!(listed.is_empty());
}

// ── Writes and clock ────────────────────────────────────────────

#[tokio::test]
async fn create_assigns_sequential_ids_and_advancing_times() {
    let store = MemoryStore::new("mem", "ref");
    store.put("product", Record::new("seed", Timestamp::from_millis(100)));

    let a = store.create(&product(), named("a")).await.unwrap();
    let b = store.create(&product(), named("b")).await.unwrap();

    assert_eq!(a.id, RecordId::new("mem-1"));
    assert_eq!(b.id, RecordId::new("mem-2"));
    assert!(a.last_modified > Timestamp::from_millis(100));
    assert!(b.last_modified > a.last_modified);
    assert_eq!(store.now(), b.last_modified);
}

#[tokio::test]
async fn update_merges_fields_and_bumps_time() {
    let store = MemoryStore::new("mem", "ref");
    let created = store.create(&product(), named("a")).await.unwrap();

    let updated = store
        .update(
            &product(),
            &created.id,
            Fields::from([("price".to_string(), FieldValue::Number(3.0))]),
        )
        .await
        .unwrap();

    assert_eq!(updated.field("name"), Some(&FieldValue::text("a")));
    assert_eq!(updated.field("price"), Some(&FieldValue::Number(3.0)));
    assert!(updated.last_modified > created.last_modified);
}

#[tokio::test]
async fn update_of_missing_record_is_rejected() {
    let store = MemoryStore::new("mem", "ref");
    let err = store
        .update(&product(), &RecordId::new("nope"), Fields::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Rejected);
}

#[tokio::test]
async fn find_matches_on_external_ref_field() {
    let store = MemoryStore::new("mem", "ref");
    let mut fields = named("a");
    fields.insert("ref".to_string(), FieldValue::text("src:rec1"));
    store.create(&product(), fields).await.unwrap();
    store.create(&product(), named("b")).await.unwrap();

    let found = store
        .find_by_external_ref(&product(), &ExternalRef::new("src", "rec1").unwrap())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].field("name"), Some(&FieldValue::text("a")));
}

// ── Failure injection and counters ──────────────────────────────

#[tokio::test]
async fn injected_failure_fails_every_call() {
    let store = MemoryStore::new("mem", "ref");
    store.fail(Operation::Authenticate, FailureMode::Auth);
    for _ in 0..3 {
        let err = store.authenticate().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
    }
    assert_eq!(store.calls().authenticate, 3);
}

#[tokio::test]
async fn limited_failure_recovers() {
    let store = MemoryStore::new("mem", "ref");
    store.fail_times(Operation::List, FailureMode::Network, 1);
    assert!(store.list_changed_since(&product(), &cursor_at(0)).await.is_err());
    assert!(store.list_changed_since(&product(), &cursor_at(0)).await.is_ok());
}

#[tokio::test]
async fn targeted_failure_only_hits_its_ref() {
    let store = MemoryStore::new("mem", "ref");
    let bad = ExternalRef::new("src", "bad").unwrap();
    store.fail_for(Operation::Create, FailureMode::Rejected { status: 400 }, &bad);

    let mut bad_fields = named("bad");
    bad_fields.insert("ref".to_string(), FieldValue::text(bad.to_string()));
    let mut good_fields = named("good");
    good_fields.insert("ref".to_string(), FieldValue::text("src:good"));

    assert!(store.create(&product(), bad_fields).await.is_err());
    assert!(store.create(&product(), good_fields).await.is_ok());
    assert_eq!(store.records(&product()).len(), 1);
}

#[tokio::test]
async fn clear_failures_removes_injections() {
    let store = MemoryStore::new("mem", "ref");
    store.fail(Operation::Authenticate, FailureMode::Protocol);
    store.clear_failures();
    store.authenticate().await.unwrap();
}

#[tokio::test]
async fn rate_limit_failure_carries_retry_after() {
    let store = MemoryStore::new("mem", "ref");
    store.fail(
        Operation::Find,
        FailureMode::RateLimited {
            retry_after_secs: 7,
        },
    );
    let err = store
        .find_by_external_ref(&product(), &ExternalRef::new("src", "x").unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(7)));
}

#[tokio::test]
async fn call_counts_total() {
    let store = MemoryStore::new("mem", "ref");
    store.authenticate().await.unwrap();
    store.list_changed_since(&product(), &cursor_at(0)).await.unwrap();
    store.create(&product(), named("a")).await.unwrap();
    let calls = store.calls();
    assert_eq!(calls.total(), 3);
    assert_eq!(calls.writes(), 1);
}
