use std::time::Duration;
use tristore_sync::adapters::classify_status;
use tristore_sync::{ErrorKind, SyncError};
use tristore_types::FieldKind;

// ── Classification ──────────────────────────────────────────────

#[test]
fn transient_errors() {
    assert!(SyncError::Network("reset".into()).is_transient());
    assert!(SyncError::RateLimited { retry_after_secs: 1 }.is_transient());
    assert!(!SyncError::Auth("nope".into()).is_transient());
    assert!(!SyncError::Rejected {
        status: 400,
        message: String::new()
    }
    .is_transient());
}

#[test]
fn data_errors_are_not_fatal() {
    assert!(!SyncError::unexpected_kind("Price", "number", FieldKind::Text).is_fatal());
    assert!(!SyncError::DuplicateExternalRef {
        entity_type: "product".into(),
        external_ref: "src:rec1".into(),
        matches: 2,
    }
    .is_fatal());
    assert!(!SyncError::Rejected {
        status: 422,
        message: "bad".into()
    }
    .is_fatal());
}

#[test]
fn infrastructure_errors_are_fatal() {
    assert!(SyncError::Auth("expired".into()).is_fatal());
    assert!(SyncError::Network("down".into()).is_fatal());
    assert!(SyncError::MappingConfig("missing".into()).is_fatal());
    assert!(SyncError::Protocol("garbage".into()).is_fatal());
    assert!(SyncError::Storage("locked".into()).is_fatal());
    assert!(SyncError::Cancelled.is_fatal());
}

#[test]
fn retry_after_only_for_rate_limit() {
    assert_eq!(
        SyncError::RateLimited { retry_after_secs: 30 }.retry_after(),
        Some(Duration::from_secs(30))
    );
    assert_eq!(SyncError::Network("x".into()).retry_after(), None);
}

#[test]
fn kinds() {
    assert_eq!(
        SyncError::RateLimited { retry_after_secs: 1 }.kind(),
        ErrorKind::TransientNetwork
    );
    assert_eq!(SyncError::Auth("x".into()).kind(), ErrorKind::Auth);
    assert_eq!(
        SyncError::MappingConfig("x".into()).kind(),
        ErrorKind::MappingConfig
    );
    assert_eq!(SyncError::Cancelled.kind(), ErrorKind::Cancelled);
}

#[test]
fn kind_display_matches_serde() {
    for kind in [
        ErrorKind::TransientNetwork,
        ErrorKind::DuplicateExternalRef,
        ErrorKind::MappingConfig,
    ] {
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, format!("\"{kind}\""));
    }
}

#[test]
fn error_messages() {
    let err = SyncError::unexpected_kind("Price", "number", FieldKind::Text);
    assert_eq!(
        err.to_string(),
        "cannot map field 'Price': expected number, found text"
    );

    let err = SyncError::DuplicateExternalRef {
        entity_type: "product".into(),
        external_ref: "src:rec1".into(),
        matches: 2,
    };
    assert_eq!(
        err.to_string(),
        "2 records in 'product' carry external ref 'src:rec1'"
    );
}

#[test]
fn from_types_error() {
    let err: SyncError = tristore_types::Error::InvalidTimestamp("yesterday".into()).into();
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

// ── HTTP status mapping ─────────────────────────────────────────

#[test]
fn status_401_and_403_are_auth() {
    assert_eq!(classify_status(401, None, "").kind(), ErrorKind::Auth);
    assert_eq!(classify_status(403, None, "").kind(), ErrorKind::Auth);
}

#[test]
fn status_429_is_rate_limited() {
    let err = classify_status(429, Some(12), "");
    assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
    let err = classify_status(429, None, "");
    assert_eq!(err.retry_after(), Some(Duration::from_secs(1)));
}

#[test]
fn status_5xx_is_network() {
    assert!(classify_status(500, None, "").is_transient());
    assert!(classify_status(503, None, "").is_transient());
}

#[test]
fn other_4xx_is_rejected() {
    match classify_status(422, None, "invalid price") {
        SyncError::Rejected { status, message } => {
            assert_eq!(status, 422);
            assert_eq!(message, "invalid price");
        }
        other => panic!("unexpected {other:?}"),
    }
}
