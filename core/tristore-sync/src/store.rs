//! Remote store abstraction trait.
//!
//! Defines the capability interface every record store in the pipeline
//! implements: change listing, external-reference lookup, create, update.

use crate::cursor::ChangeCursor;
use crate::error::SyncResult;
use async_trait::async_trait;
use tristore_types::{EntityType, ExternalRef, Fields, Record, RecordId};

/// Abstract remote record store.
///
/// Implementations own their wire format, credentials and retry behaviour.
/// The sync core only sees typed `Record`s.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short system label, used as the `system` half of external references
    /// minted from this store's records (e.g. `airtable`).
    fn system(&self) -> &str;

    /// Name of the field on this store's records that holds the external
    /// reference of the upstream record they were synced from.
    fn external_ref_field(&self) -> &str;

    /// Acquires or refreshes credentials. Called once per stage before any
    /// other operation.
    async fn authenticate(&self) -> SyncResult<()>;

    /// Lists every record of `entity_type` modified strictly after the
    /// cursor's watermark. The beginning sentinel lists everything.
    async fn list_changed_since(
        &self,
        entity_type: &EntityType,
        cursor: &ChangeCursor,
    ) -> SyncResult<Vec<Record>>;

    /// Returns all records of `entity_type` whose external-reference field
    /// equals `external_ref`. More than one match is an invariant violation
    /// the caller decides how to handle.
    async fn find_by_external_ref(
        &self,
        entity_type: &EntityType,
        external_ref: &ExternalRef,
    ) -> SyncResult<Vec<Record>>;

    /// Creates a record.
    async fn create(&self, entity_type: &EntityType, fields: Fields) -> SyncResult<Record>;

    /// Overwrites the given fields of an existing record.
    async fn update(
        &self,
        entity_type: &EntityType,
        id: &RecordId,
        fields: Fields,
    ) -> SyncResult<Record>;
}
