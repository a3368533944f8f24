//! Idempotent create-or-update keyed by external reference.
//!
//! The existence check and the write are two separate remote calls. Calls
//! for the same (target, entity type, external ref) are serialized within
//! one engine so parallel workers never race each other into a duplicate.
//! Two separate processes can still race; that is not guarded here.

use crate::error::{SyncError, SyncResult};
use crate::store::RemoteStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;
use tristore_types::{EntityType, ExternalRef, FieldValue, Fields, Record};

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    Created,
    Updated,
}

/// Result of a successful upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub action: UpsertAction,
    pub record: Record,
}

/// Decides create vs. update by looking the external reference up first.
#[derive(Debug, Default)]
pub struct UpsertEngine {
    locks: RefLocks,
}

impl UpsertEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or updates the downstream record carrying `external_ref`.
    ///
    /// On create, the external reference is written into the target's
    /// external-ref field alongside `fields`. On update only `fields` are
    /// sent. More than one existing match is reported as
    /// `DuplicateExternalRef` and nothing is written.
    pub async fn upsert(
        &self,
        target: &dyn RemoteStore,
        entity_type: &EntityType,
        mut fields: Fields,
        external_ref: &ExternalRef,
    ) -> SyncResult<UpsertOutcome> {
        let key = format!("{}/{}/{}", target.system(), entity_type, external_ref);
        let _guard = self.locks.acquire(&key).await;

        let mut matches = target.find_by_external_ref(entity_type, external_ref).await?;
        match matches.len() {
            0 => {
                fields.insert(
                    target.external_ref_field().to_string(),
                    FieldValue::Text(external_ref.to_string()),
                );
                let record = target.create(entity_type, fields).await?;
                debug!(
                    "Created {} {} for {} in {}",
                    entity_type,
                    record.id,
                    external_ref,
                    target.system()
                );
                Ok(UpsertOutcome {
                    action: UpsertAction::Created,
                    record,
                })
            }
            1 => {
                let existing = matches.remove(0);
                let record = target.update(entity_type, &existing.id, fields).await?;
                debug!(
                    "Updated {} {} for {} in {}",
                    entity_type,
                    record.id,
                    external_ref,
                    target.system()
                );
                Ok(UpsertOutcome {
                    action: UpsertAction::Updated,
                    record,
                })
            }
            n => Err(SyncError::DuplicateExternalRef {
                entity_type: entity_type.to_string(),
                external_ref: external_ref.to_string(),
                matches: n,
            }),
        }
    }

    /// Number of keys currently locked or waited on.
    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }
}

/// Per-key async locks. Entries are dropped once nobody holds or awaits them.
#[derive(Debug, Default)]
struct RefLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl RefLocks {
    async fn acquire(&self, key: &str) -> RefGuard<'_> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(key.to_string()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        RefGuard {
            locks: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

struct RefGuard<'a> {
    locks: &'a RefLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RefGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.locks.inner.lock().unwrap_or_else(|e| e.into_inner());
        if map
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.key);
        }
    }
}
