//! Error types for the sync layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tristore_types::FieldKind;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network error (connection failure, timeout, 5xx). Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// The remote asked us to slow down. Retryable.
    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Authentication error.
    #[error("authentication error: {0}")]
    Auth(String),

    /// A mapping table is missing or invalid.
    #[error("mapping configuration error: {0}")]
    MappingConfig(String),

    /// One record's field could not be mapped.
    #[error("cannot map field '{field}': {reason}")]
    Mapping { field: String, reason: String },

    /// More than one downstream record carries the same external reference.
    #[error("{matches} records in '{entity_type}' carry external ref '{external_ref}'")]
    DuplicateExternalRef {
        entity_type: String,
        external_ref: String,
        matches: usize,
    },

    /// The remote refused this record's payload.
    #[error("rejected by remote ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The remote answered with something we could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Cursor storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid adapter or pipeline configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a mapping error for a field whose value has the wrong kind.
    pub fn unexpected_kind(field: &str, expected: &str, found: FieldKind) -> Self {
        SyncError::Mapping {
            field: field.to_string(),
            reason: format!("expected {expected}, found {found}"),
        }
    }

    /// Returns true if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::RateLimited { .. })
    }

    /// Returns true if this error must abort the current stage.
    ///
    /// Infrastructure failures are fatal; anything tied to a single
    /// record's data is not.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SyncError::Mapping { .. }
                | SyncError::DuplicateExternalRef { .. }
                | SyncError::Rejected { .. }
        )
    }

    /// Returns the retry-after duration if this is a rate-limit error.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            SyncError::RateLimited { retry_after_secs } => {
                Some(std::time::Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }

    /// Classifies the error for run summaries.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Network(_) | SyncError::RateLimited { .. } => ErrorKind::TransientNetwork,
            SyncError::Auth(_) => ErrorKind::Auth,
            SyncError::MappingConfig(_) => ErrorKind::MappingConfig,
            SyncError::Mapping { .. } => ErrorKind::Mapping,
            SyncError::DuplicateExternalRef { .. } => ErrorKind::DuplicateExternalRef,
            SyncError::Rejected { .. } => ErrorKind::Rejected,
            SyncError::Protocol(_) => ErrorKind::Protocol,
            SyncError::Storage(_) => ErrorKind::Storage,
            SyncError::Config(_) | SyncError::Serialization(_) => ErrorKind::Config,
            SyncError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Error category reported in a `SyncSummary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientNetwork,
    Auth,
    MappingConfig,
    Mapping,
    DuplicateExternalRef,
    Rejected,
    Protocol,
    Storage,
    Config,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::Auth => "auth",
            ErrorKind::MappingConfig => "mapping_config",
            ErrorKind::Mapping => "mapping",
            ErrorKind::DuplicateExternalRef => "duplicate_external_ref",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Storage => "storage",
            ErrorKind::Config => "config",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl From<tristore_types::Error> for SyncError {
    fn from(e: tristore_types::Error) -> Self {
        match e {
            tristore_types::Error::Serialization(e) => SyncError::Serialization(e),
            other => SyncError::Protocol(other.to_string()),
        }
    }
}
