//! Change cursors.
//!
//! A cursor bounds what one pipeline stage has already synced. Stores list
//! records modified strictly after the watermark; the orchestrator moves the
//! watermark forward only over records it actually finished.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tristore_types::{StorePairId, Timestamp};

/// Per-store-pair watermark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCursor {
    pub store_pair: StorePairId,
    pub watermark: Timestamp,
}

impl ChangeCursor {
    /// A cursor that has never synced anything.
    pub fn beginning(store_pair: StorePairId) -> Self {
        Self {
            store_pair,
            watermark: Timestamp::BEGINNING,
        }
    }

    /// A cursor at an explicit watermark.
    pub fn at(store_pair: StorePairId, watermark: Timestamp) -> Self {
        Self {
            store_pair,
            watermark,
        }
    }

    /// Returns true for the never-synced sentinel.
    pub fn is_beginning(&self) -> bool {
        self.watermark.is_beginning()
    }

    /// Moves the watermark to `to` if that is later. Returns whether it moved.
    pub fn advance_to(&mut self, to: Timestamp) -> bool {
        if to > self.watermark {
            self.watermark = to;
            true
        } else {
            false
        }
    }
}

/// Computes how far a stage may move its cursor.
///
/// Records that failed or were never processed pin the watermark below
/// their own modification time, so the next listing returns them again.
#[derive(Debug, Clone, Default)]
pub struct WatermarkTracker {
    succeeded: Vec<Timestamp>,
    oldest_pending: Option<Timestamp>,
}

impl WatermarkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a record that was fully synced.
    pub fn record_success(&mut self, last_modified: Timestamp) {
        self.succeeded.push(last_modified);
    }

    /// Records a record that failed or was left unprocessed.
    pub fn record_pending(&mut self, last_modified: Timestamp) {
        self.oldest_pending = Some(match self.oldest_pending {
            Some(ts) => ts.min(last_modified),
            None => last_modified,
        });
    }

    /// Highest safe watermark from this batch, if any record qualifies.
    pub fn candidate(&self) -> Option<Timestamp> {
        self.succeeded
            .iter()
            .copied()
            .filter(|ts| self.oldest_pending.is_none_or(|pending| *ts < pending))
            .max()
    }

    /// Returns `cursor` advanced to the candidate watermark. Never moves back.
    pub fn advance(&self, cursor: &ChangeCursor) -> ChangeCursor {
        let mut next = cursor.clone();
        if let Some(candidate) = self.candidate() {
            next.advance_to(candidate);
        }
        next
    }
}

/// Cursor persistence seam.
///
/// The orchestrator's caller loads cursors before a run and saves the ones
/// returned in the summary afterwards.
pub trait CursorStore: Send + Sync {
    /// Loads the cursor for a store pair, or the beginning sentinel.
    fn load(&self, store_pair: &StorePairId) -> SyncResult<ChangeCursor>;

    /// Persists a cursor. Implementations never lower a stored watermark.
    fn save(&self, cursor: &ChangeCursor) -> SyncResult<()>;
}

/// Process-local cursor store.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: RwLock<HashMap<StorePairId, Timestamp>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self, store_pair: &StorePairId) -> SyncResult<ChangeCursor> {
        let cursors = self
            .cursors
            .read()
            .map_err(|_| SyncError::Storage("cursor map lock poisoned".to_string()))?;
        Ok(match cursors.get(store_pair) {
            Some(ts) => ChangeCursor::at(store_pair.clone(), *ts),
            None => ChangeCursor::beginning(store_pair.clone()),
        })
    }

    fn save(&self, cursor: &ChangeCursor) -> SyncResult<()> {
        let mut cursors = self
            .cursors
            .write()
            .map_err(|_| SyncError::Storage("cursor map lock poisoned".to_string()))?;
        let entry = cursors
            .entry(cursor.store_pair.clone())
            .or_insert(Timestamp::BEGINNING);
        *entry = (*entry).max(cursor.watermark);
        Ok(())
    }
}
