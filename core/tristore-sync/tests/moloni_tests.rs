use serde_json::json;
use tristore_sync::adapters::{MoloniConfig, MoloniStore};
use tristore_sync::{ChangeCursor, ErrorKind, RemoteStore, RetryPolicy};
use tristore_types::{EntityType, ExternalRef, FieldValue, Fields, RecordId, StorePairId, Timestamp};
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> MoloniConfig {
    MoloniConfig {
        client_id: "cid".to_string(),
        client_secret: "csecret".to_string(),
        api_base_url: server.uri(),
        retry: RetryPolicy::none(),
        ..Default::default()
    }
}

fn product() -> EntityType {
    EntityType::new("product")
}

async fn mount_grant(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/v1/grant"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=cid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok",
            "expires_in": 3600
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

// ── Config and auth ─────────────────────────────────────────────

#[test]
fn config_defaults() {
    let cfg = MoloniConfig::default();
    assert_eq!(cfg.api_base_url, "https://api.moloni.com");
    assert_eq!(cfg.reference_field, "reference");
    assert_eq!(cfg.entities.get("product").map(String::as_str), Some("products"));
}

#[test]
fn credentials_are_not_serialized() {
    let cfg = MoloniConfig {
        client_id: "the-id".into(),
        client_secret: "the-secret".into(),
        ..Default::default()
    };
    let json = serde_json::to_string(&cfg).unwrap();
    assert!(!json.contains("the-id"));
    assert!(!json.contains("the-secret"));
}

#[tokio::test]
async fn missing_credentials_fail_without_request() {
    let server = MockServer::start().await;
    let store = MoloniStore::new(MoloniConfig {
        api_base_url: server.uri(),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(store.authenticate().await.unwrap_err().kind(), ErrorKind::Auth);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn token_is_cached_across_calls() {
    let server = MockServer::start().await;
    mount_grant(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v1/products/getAll"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&server)
        .await;

    let store = MoloniStore::new(config(&server)).unwrap();
    store.authenticate().await.unwrap();
    let r = ExternalRef::new("notion", "page-1").unwrap();
    store.find_by_external_ref(&product(), &r).await.unwrap();
    store.find_by_external_ref(&product(), &r).await.unwrap();
}

#[tokio::test]
async fn rejected_grant_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/grant"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
        .mount(&server)
        .await;

    let store = MoloniStore::new(config(&server)).unwrap();
    assert_eq!(store.authenticate().await.unwrap_err().kind(), ErrorKind::Auth);
}

// ── Lookup and listing ──────────────────────────────────────────

#[tokio::test]
async fn finds_by_reference_where_clause() {
    let server = MockServer::start().await;
    mount_grant(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v1/products/getAll"))
        .and(body_partial_json(json!({
            "where": [{ "field": "reference", "operator": "=", "value": "notion:page-1" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 42, "name": "Widget", "price": 10, "reference": "notion:page-1" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let store = MoloniStore::new(config(&server)).unwrap();
    let found = store
        .find_by_external_ref(&product(), &ExternalRef::new("notion", "page-1").unwrap())
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, RecordId::new("42"));
    assert_eq!(found[0].field("name"), Some(&FieldValue::text("Widget")));
}

#[tokio::test]
async fn listing_filters_on_modification_field() {
    let server = MockServer::start().await;
    mount_grant(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v1/products/getAll"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 1, "updated_at": "2024-03-20T00:00:00.000Z" },
            { "id": 2, "updated_at": "2024-03-22T00:00:00.000Z" },
            { "id": 3 }
        ])))
        .mount(&server)
        .await;

    let store = MoloniStore::new(config(&server)).unwrap();
    let cursor = ChangeCursor::at(
        StorePairId::between("target", "elsewhere"),
        Timestamp::parse_rfc3339("2024-03-21T00:00:00.000Z").unwrap(),
    );
    let records = store.list_changed_since(&product(), &cursor).await.unwrap();

    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["2"]);
}

#[tokio::test]
async fn beginning_cursor_lists_records_without_usable_modification_time() {
    let server = MockServer::start().await;
    mount_grant(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v1/products/getAll"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 1, "updated_at": "2024-03-20T00:00:00.000Z" },
            { "id": 2 },
            { "id": 3, "updated_at": 18_446_744_073_709_551_615u64 }
        ])))
        .mount(&server)
        .await;

    let store = MoloniStore::new(config(&server)).unwrap();
    let records = store
        .list_changed_since(
            &product(),
            &ChangeCursor::beginning(StorePairId::between("target", "elsewhere")),
        )
        .await
        .unwrap();

    assert_eq!(records.len(), 3);
    // An out-of-range epoch is treated as missing, not as a panic.
    let huge = records.iter().find(|r| r.id == RecordId::new("3")).unwrap();
    assert!(huge.last_modified.is_beginning());
}

// ── Writes ──────────────────────────────────────────────────────

#[tokio::test]
async fn insert_fills_record_from_sent_fields() {
    let server = MockServer::start().await;
    mount_grant(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v1/products/insert"))
        .and(body_partial_json(json!({
            "name": "Widget",
            "price": 10.0,
            "reference": "notion:page-1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 42 })))
        .expect(1)
        .mount(&server)
        .await;

    let store = MoloniStore::new(config(&server)).unwrap();
    let fields = Fields::from([
        ("name".to_string(), FieldValue::text("Widget")),
        ("price".to_string(), FieldValue::Number(10.0)),
        ("reference".to_string(), FieldValue::text("notion:page-1")),
    ]);
    let record = store.create(&product(), fields).await.unwrap();

    assert_eq!(record.id, RecordId::new("42"));
    assert_eq!(record.field("name"), Some(&FieldValue::text("Widget")));
}

#[tokio::test]
async fn update_sends_numeric_id() {
    let server = MockServer::start().await;
    mount_grant(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v1/products/update"))
        .and(body_partial_json(json!({ "id": 42, "price": 15.0 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "valid": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    let store = MoloniStore::new(config(&server)).unwrap();
    let fields = Fields::from([("price".to_string(), FieldValue::Number(15.0))]);
    let record = store
        .update(&product(), &RecordId::new("42"), fields)
        .await
        .unwrap();
    assert_eq!(record.id, RecordId::new("42"));
    assert_eq!(record.field("price"), Some(&FieldValue::Number(15.0)));
}

#[tokio::test]
async fn insert_without_id_is_protocol_error() {
    let server = MockServer::start().await;
    mount_grant(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v1/products/insert"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "valid": 1 })))
        .mount(&server)
        .await;

    let store = MoloniStore::new(config(&server)).unwrap();
    let err = store.create(&product(), Fields::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[tokio::test]
async fn server_error_on_insert_is_transient() {
    let server = MockServer::start().await;
    mount_grant(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v1/products/insert"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let store = MoloniStore::new(config(&server)).unwrap();
    let err = store.create(&product(), Fields::new()).await.unwrap_err();
    assert!(err.is_transient());
}
