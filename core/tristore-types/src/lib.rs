//! Core type definitions for tristore.
//!
//! This crate defines the store-agnostic types shared by the sync core and
//! every adapter:
//! - Record identifiers, entity type labels and store-pair identifiers
//! - External references (the cross-store idempotency key)
//! - Millisecond timestamps used as change watermarks
//! - Records and their tagged field values
//!
//! Store-specific wire shapes (Airtable cells, Notion properties, Moloni
//! payloads) belong in the adapters, not here.

mod ids;
mod record;
mod timestamp;

pub use ids::{EntityType, ExternalRef, RecordId, StorePairId};
pub use record::{FieldKind, FieldValue, Fields, Record};
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid external reference: {0}")]
    InvalidExternalRef(String),
}
