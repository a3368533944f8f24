use pretty_assertions::assert_eq;
use std::io::Write;
use tristore_cli::{build_pipeline, PipelineConfig, ReadOnlyCursors, Secrets};
use tristore_sync::{ChangeCursor, CursorStore, MemoryCursorStore, DEFAULT_CONCURRENCY};
use tristore_types::{StorePairId, Timestamp};

fn runnable_config() -> PipelineConfig {
    PipelineConfig::from_json(r#"{ "airtable": { "base_id": "app1" } }"#).unwrap()
}

// ── Parsing ─────────────────────────────────────────────────────

#[test]
fn empty_object_uses_defaults() {
    let config = PipelineConfig::from_json("{}").unwrap();
    assert_eq!(config.orchestrator.concurrency, DEFAULT_CONCURRENCY);
    assert_eq!(config.orchestrator.entity_type.as_str(), "product");
    assert_eq!(config.notion.external_ref_property, "AirtableID");
    assert_eq!(config.moloni.reference_field, "reference");
}

#[test]
fn partial_sections_keep_other_defaults() {
    let config = PipelineConfig::from_json(
        r#"{
            "orchestrator": { "concurrency": 8 },
            "airtable": { "base_id": "appXYZ", "tables": { "product": "Catalog" } },
            "notion": { "databases": { "product": "db-42" } }
        }"#,
    )
    .unwrap();

    assert_eq!(config.orchestrator.concurrency, 8);
    assert_eq!(
        config.orchestrator.source_to_intermediate.store_pair,
        StorePairId::between("source", "intermediate")
    );
    assert_eq!(config.airtable.base_id, "appXYZ");
    assert_eq!(
        config.airtable.tables.get("product").map(String::as_str),
        Some("Catalog")
    );
    assert_eq!(config.airtable.modified_field, "Last Modified");
    assert_eq!(
        config.notion.databases.get("product").map(String::as_str),
        Some("db-42")
    );
}

#[test]
fn zero_concurrency_is_rejected() {
    let err = PipelineConfig::from_json(r#"{ "orchestrator": { "concurrency": 0 } }"#)
        .unwrap_err();
    assert!(err.to_string().contains("concurrency"));
}

#[test]
fn invalid_retry_policy_is_rejected() {
    let result = PipelineConfig::from_json(r#"{ "notion": { "retry": { "max_attempts": 0 } } }"#);
    assert!(result.is_err());
}

#[test]
fn malformed_json_is_rejected() {
    assert!(PipelineConfig::from_json("{ not json").is_err());
}

// ── Loading ─────────────────────────────────────────────────────

#[test]
fn loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{ "orchestrator": {{ "concurrency": 2 }} }}"#).unwrap();

    let config = PipelineConfig::load(file.path()).unwrap();
    assert_eq!(config.orchestrator.concurrency, 2);
}

#[test]
fn missing_file_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");

    let err = PipelineConfig::load(&path).unwrap_err();
    assert!(format!("{err:#}").contains("absent.json"));
}

// ── Secrets ─────────────────────────────────────────────────────

#[test]
fn secrets_fill_credentials() {
    let config = PipelineConfig::default().with_secrets(Secrets {
        airtable_api_key: Some("key".into()),
        notion_secret: Some("secret_n".into()),
        moloni_client_id: Some("cid".into()),
        moloni_client_secret: Some("csec".into()),
    });
    assert_eq!(config.airtable.api_key, "key");
    assert_eq!(config.notion.secret, "secret_n");
    assert_eq!(config.moloni.client_id, "cid");
    assert_eq!(config.moloni.client_secret, "csec");
}

#[test]
fn absent_secrets_leave_existing_values() {
    let mut config = PipelineConfig::default();
    config.notion.secret = "from-before".into();
    let config = config.with_secrets(Secrets::default());
    assert_eq!(config.notion.secret, "from-before");
}

#[test]
fn secrets_never_serialize() {
    let config = PipelineConfig::default().with_secrets(Secrets {
        airtable_api_key: Some("key-abc".into()),
        notion_secret: Some("secret-def".into()),
        moloni_client_id: Some("id-ghi".into()),
        moloni_client_secret: Some("sec-jkl".into()),
    });
    let json = serde_json::to_string(&config).unwrap();
    for secret in ["key-abc", "secret-def", "id-ghi", "sec-jkl"] {
        assert!(!json.contains(secret), "{secret} leaked");
    }
}

// ── Wiring ──────────────────────────────────────────────────────

#[test]
fn dry_run_swaps_in_memory_target() {
    let pipeline = build_pipeline(runnable_config(), true).unwrap();
    let target = pipeline.dry_run_target.expect("dry run target");
    assert_eq!(target.calls().total(), 0);
}

#[test]
fn live_run_has_no_memory_target() {
    let pipeline = build_pipeline(runnable_config(), false).unwrap();
    assert!(pipeline.dry_run_target.is_none());
    assert_eq!(pipeline.orchestrator.config().concurrency, DEFAULT_CONCURRENCY);
}

#[test]
fn missing_base_id_fails_to_build() {
    let err = build_pipeline(PipelineConfig::default(), true)
        .err()
        .expect("should fail");
    assert!(format!("{err:#}").contains("airtable"));
}

#[test]
fn read_only_cursors_discard_saves() {
    let pair = StorePairId::between("source", "intermediate");
    let inner = MemoryCursorStore::new();
    inner
        .save(&ChangeCursor::at(pair.clone(), Timestamp::from_millis(100)))
        .unwrap();

    let read_only = ReadOnlyCursors::new(&inner);
    read_only
        .save(&ChangeCursor::at(pair.clone(), Timestamp::from_millis(500)))
        .unwrap();

    assert_eq!(read_only.load(&pair).unwrap().watermark, Timestamp::from_millis(100));
    assert_eq!(inner.load(&pair).unwrap().watermark, Timestamp::from_millis(100));
}
