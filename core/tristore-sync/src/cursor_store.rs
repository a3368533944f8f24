//! Persistent cursor storage backed by SQLite.
//!
//! One row per store pair. Writes keep the larger of the stored and the
//! incoming watermark, so a stale save can never move a cursor backwards.

use crate::cursor::{ChangeCursor, CursorStore};
use crate::error::{SyncError, SyncResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use tristore_types::{StorePairId, Timestamp};

/// Cursor store persisted in a SQLite file.
pub struct SqliteCursorStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCursorStore {
    /// Opens (or creates) a cursor store at the given path.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| SyncError::Storage(format!("failed to open cursor store: {e}")))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Opens an in-memory cursor store (for testing).
    pub fn open_in_memory() -> SyncResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            SyncError::Storage(format!("failed to open in-memory cursor store: {e}"))
        })?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> SyncResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SyncError::Storage("cursor store lock poisoned".to_string()))
    }

    fn init_schema(&self) -> SyncResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sync_cursors (
                store_pair TEXT PRIMARY KEY,
                watermark INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| SyncError::Storage(format!("failed to init cursor schema: {e}")))?;
        Ok(())
    }

    /// Lists every stored cursor, ordered by store pair.
    pub fn list(&self) -> SyncResult<Vec<ChangeCursor>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT store_pair, watermark FROM sync_cursors ORDER BY store_pair")
            .map_err(|e| SyncError::Storage(format!("failed to prepare cursor query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                let pair: String = row.get(0)?;
                let watermark: i64 = row.get(1)?;
                Ok((pair, watermark))
            })
            .map_err(|e| SyncError::Storage(format!("failed to query cursors: {e}")))?;

        let mut result = Vec::new();
        for row in rows {
            let (pair, watermark) =
                row.map_err(|e| SyncError::Storage(format!("failed to read cursor row: {e}")))?;
            result.push(ChangeCursor::at(
                StorePairId::new(pair),
                Timestamp::from_millis(watermark.max(0) as u64),
            ));
        }
        Ok(result)
    }
}

impl CursorStore for SqliteCursorStore {
    fn load(&self, store_pair: &StorePairId) -> SyncResult<ChangeCursor> {
        let conn = self.lock()?;
        let watermark: Option<i64> = conn
            .query_row(
                "SELECT watermark FROM sync_cursors WHERE store_pair = ?1",
                params![store_pair.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| SyncError::Storage(format!("failed to load cursor: {e}")))?;

        Ok(match watermark {
            Some(ms) => ChangeCursor::at(store_pair.clone(), Timestamp::from_millis(ms.max(0) as u64)),
            None => ChangeCursor::beginning(store_pair.clone()),
        })
    }

    fn save(&self, cursor: &ChangeCursor) -> SyncResult<()> {
        let watermark = i64::try_from(cursor.watermark.as_millis())
            .map_err(|_| SyncError::Storage("watermark out of range".to_string()))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_cursors (store_pair, watermark, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(store_pair) DO UPDATE SET
                watermark = MAX(watermark, excluded.watermark),
                updated_at = excluded.updated_at",
            params![
                cursor.store_pair.as_str(),
                watermark,
                Timestamp::now().to_rfc3339(),
            ],
        )
        .map_err(|e| SyncError::Storage(format!("failed to save cursor: {e}")))?;
        debug!("Saved cursor {} at {}", cursor.store_pair, cursor.watermark);
        Ok(())
    }
}
