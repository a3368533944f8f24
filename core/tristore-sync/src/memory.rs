//! In-process record store.
//!
//! Backs tests and dry runs. Timestamps come from a logical clock that only
//! moves forward, ids are sequential, and every call is counted. Failures can
//! be injected per operation, optionally only for one external reference.

use crate::cursor::ChangeCursor;
use crate::error::{SyncError, SyncResult};
use crate::store::RemoteStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;
use tristore_types::{EntityType, ExternalRef, FieldValue, Fields, Record, RecordId, Timestamp};

/// Store operations that can be counted or made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Authenticate,
    List,
    Find,
    Create,
    Update,
}

/// Error an injected failure produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Network,
    RateLimited { retry_after_secs: u64 },
    Auth,
    Rejected { status: u16 },
    Protocol,
}

impl FailureMode {
    fn to_error(self, op: Operation) -> SyncError {
        match self {
            FailureMode::Network => SyncError::Network(format!("simulated failure in {op:?}")),
            FailureMode::RateLimited { retry_after_secs } => {
                SyncError::RateLimited { retry_after_secs }
            }
            FailureMode::Auth => SyncError::Auth(format!("simulated failure in {op:?}")),
            FailureMode::Rejected { status } => SyncError::Rejected {
                status,
                message: format!("simulated rejection in {op:?}"),
            },
            FailureMode::Protocol => SyncError::Protocol(format!("simulated failure in {op:?}")),
        }
    }
}

#[derive(Debug)]
struct Failure {
    op: Operation,
    mode: FailureMode,
    /// Only calls touching this external reference fail.
    external_ref: Option<String>,
    /// `None` fails forever.
    remaining: Option<usize>,
}

/// Per-operation call counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub authenticate: usize,
    pub list: usize,
    pub find: usize,
    pub create: usize,
    pub update: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.authenticate + self.list + self.find + self.create + self.update
    }

    /// Calls that wrote data.
    pub fn writes(&self) -> usize {
        self.create + self.update
    }
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<EntityType, Vec<Record>>,
    clock: u64,
    next_id: u64,
    calls: CallCounts,
    failures: Vec<Failure>,
}

impl Inner {
    fn tick(&mut self) -> Timestamp {
        self.clock += 1;
        Timestamp::from_millis(self.clock)
    }

    fn count(&mut self, op: Operation) {
        let calls = &mut self.calls;
        match op {
            Operation::Authenticate => calls.authenticate += 1,
            Operation::List => calls.list += 1,
            Operation::Find => calls.find += 1,
            Operation::Create => calls.create += 1,
            Operation::Update => calls.update += 1,
        }
    }

    /// Returns the injected error for this call, consuming one use.
    fn take_failure(&mut self, op: Operation, external_ref: Option<&str>) -> Option<SyncError> {
        let index = self.failures.iter().position(|f| {
            f.op == op
                && f.remaining != Some(0)
                && match (&f.external_ref, external_ref) {
                    (None, _) => true,
                    (Some(want), Some(got)) => want == got,
                    (Some(_), None) => false,
                }
        })?;
        let failure = &mut self.failures[index];
        if let Some(n) = failure.remaining.as_mut() {
            *n -= 1;
        }
        Some(failure.mode.to_error(op))
    }
}

/// In-memory `RemoteStore`.
#[derive(Debug)]
pub struct MemoryStore {
    system: String,
    external_ref_field: String,
    id_prefix: String,
    latency: Option<Duration>,
    inner: Mutex<Inner>,
    active_writes: AtomicUsize,
    peak_writes: AtomicUsize,
}

impl MemoryStore {
    /// Creates an empty store. `system` also prefixes generated ids.
    pub fn new(system: impl Into<String>, external_ref_field: impl Into<String>) -> Self {
        let system = system.into();
        Self {
            id_prefix: format!("{system}-"),
            system,
            external_ref_field: external_ref_field.into(),
            latency: None,
            inner: Mutex::new(Inner::default()),
            active_writes: AtomicUsize::new(0),
            peak_writes: AtomicUsize::new(0),
        }
    }

    /// Delays every remote call by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Inserts or replaces a record as-is, keeping its timestamp. The clock
    /// is moved up to the record's timestamp if it is behind.
    pub fn put(&self, entity_type: impl Into<EntityType>, record: Record) {
        let mut inner = self.lock();
        inner.clock = inner.clock.max(record.last_modified.as_millis());
        let records = inner.records.entry(entity_type.into()).or_default();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    /// Returns a copy of every record of `entity_type`, in insertion order.
    pub fn records(&self, entity_type: &EntityType) -> Vec<Record> {
        self.lock()
            .records
            .get(entity_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns a copy of one record.
    pub fn get(&self, entity_type: &EntityType, id: &RecordId) -> Option<Record> {
        self.lock()
            .records
            .get(entity_type)?
            .iter()
            .find(|r| &r.id == id)
            .cloned()
    }

    /// Current logical time.
    pub fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.lock().clock)
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// Highest number of creates and updates observed running at once.
    pub fn peak_concurrent_writes(&self) -> usize {
        self.peak_writes.load(Ordering::SeqCst)
    }

    /// Makes every call of `op` fail.
    pub fn fail(&self, op: Operation, mode: FailureMode) {
        self.push_failure(op, mode, None, None);
    }

    /// Makes the next `times` calls of `op` fail.
    pub fn fail_times(&self, op: Operation, mode: FailureMode, times: usize) {
        self.push_failure(op, mode, None, Some(times));
    }

    /// Makes calls of `op` fail when they concern `external_ref`.
    pub fn fail_for(&self, op: Operation, mode: FailureMode, external_ref: &ExternalRef) {
        self.push_failure(op, mode, Some(external_ref.to_string()), None);
    }

    /// Removes every injected failure.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    fn push_failure(
        &self,
        op: Operation,
        mode: FailureMode,
        external_ref: Option<String>,
        remaining: Option<usize>,
    ) {
        self.lock().failures.push(Failure {
            op,
            mode,
            external_ref,
            remaining,
        });
    }

    /// Counts the call and returns an injected error, if any.
    fn enter(&self, op: Operation, external_ref: Option<&str>) -> SyncResult<()> {
        let mut inner = self.lock();
        inner.count(op);
        match inner.take_failure(op, external_ref) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn ref_of(&self, fields: &Fields) -> Option<String> {
        fields
            .get(&self.external_ref_field)
            .and_then(FieldValue::as_text)
            .map(str::to_string)
    }

    async fn write<T>(&self, f: impl FnOnce(&mut Inner) -> SyncResult<T>) -> SyncResult<T> {
        let active = self.active_writes.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_writes.fetch_max(active, Ordering::SeqCst);
        self.delay().await;
        let result = f(&mut self.lock());
        self.active_writes.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn system(&self) -> &str {
        &self.system
    }

    fn external_ref_field(&self) -> &str {
        &self.external_ref_field
    }

    async fn authenticate(&self) -> SyncResult<()> {
        self.enter(Operation::Authenticate, None)
    }

    async fn list_changed_since(
        &self,
        entity_type: &EntityType,
        cursor: &ChangeCursor,
    ) -> SyncResult<Vec<Record>> {
        self.enter(Operation::List, None)?;
        self.delay().await;
        let mut changed: Vec<Record> = self
            .records(entity_type)
            .into_iter()
            .filter(|r| cursor.is_beginning() || r.last_modified > cursor.watermark)
            .collect();
        changed.sort_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.id.cmp(&b.id))
        });
        debug!(
            "{}: {} {} changed since {}",
            self.system,
            changed.len(),
            entity_type,
            cursor.watermark
        );
        Ok(changed)
    }

    async fn find_by_external_ref(
        &self,
        entity_type: &EntityType,
        external_ref: &ExternalRef,
    ) -> SyncResult<Vec<Record>> {
        let wanted = external_ref.to_string();
        self.enter(Operation::Find, Some(&wanted))?;
        self.delay().await;
        Ok(self
            .records(entity_type)
            .into_iter()
            .filter(|r| self.ref_of(&r.fields).as_deref() == Some(wanted.as_str()))
            .collect())
    }

    async fn create(&self, entity_type: &EntityType, fields: Fields) -> SyncResult<Record> {
        let external_ref = self.ref_of(&fields);
        self.enter(Operation::Create, external_ref.as_deref())?;
        self.write(|inner| {
            inner.next_id += 1;
            let id = RecordId::new(format!("{}{}", self.id_prefix, inner.next_id));
            let record = Record {
                id,
                fields,
                last_modified: inner.tick(),
            };
            inner
                .records
                .entry(entity_type.clone())
                .or_default()
                .push(record.clone());
            Ok(record)
        })
        .await
    }

    async fn update(
        &self,
        entity_type: &EntityType,
        id: &RecordId,
        fields: Fields,
    ) -> SyncResult<Record> {
        let external_ref = self
            .get(entity_type, id)
            .and_then(|r| self.ref_of(&r.fields));
        self.enter(Operation::Update, external_ref.as_deref())?;
        self.write(|inner| {
            let now = inner.tick();
            let record = inner
                .records
                .get_mut(entity_type)
                .and_then(|records| records.iter_mut().find(|r| &r.id == id))
                .ok_or_else(|| SyncError::Rejected {
                    status: 404,
                    message: format!("{entity_type} {id} not found"),
                })?;
            record.fields.extend(fields);
            record.last_modified = now;
            Ok(record.clone())
        })
        .await
    }
}
