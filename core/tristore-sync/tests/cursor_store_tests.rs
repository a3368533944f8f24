use tempfile::TempDir;
use tristore_sync::{ChangeCursor, CursorStore, SqliteCursorStore};
use tristore_types::{StorePairId, Timestamp};

fn pair_a() -> StorePairId {
    StorePairId::between("source", "intermediate")
}

fn pair_b() -> StorePairId {
    StorePairId::between("intermediate", "target")
}

#[test]
fn unknown_pair_loads_beginning() {
    let store = SqliteCursorStore::open_in_memory().unwrap();
    let cursor = store.load(&pair_a()).unwrap();
    assert!(cursor.is_beginning());
}

#[test]
fn save_and_load() {
    let store = SqliteCursorStore::open_in_memory().unwrap();
    let cursor = ChangeCursor::at(pair_a(), Timestamp::from_millis(1_710_979_200_250));
    store.save(&cursor).unwrap();
    assert_eq!(store.load(&pair_a()).unwrap(), cursor);
}

#[test]
fn stale_save_does_not_lower_watermark() {
    let store = SqliteCursorStore::open_in_memory().unwrap();
    store
        .save(&ChangeCursor::at(pair_a(), Timestamp::from_millis(500)))
        .unwrap();
    store
        .save(&ChangeCursor::at(pair_a(), Timestamp::from_millis(100)))
        .unwrap();
    assert_eq!(
        store.load(&pair_a()).unwrap().watermark,
        Timestamp::from_millis(500)
    );
}

#[test]
fn later_save_advances_watermark() {
    let store = SqliteCursorStore::open_in_memory().unwrap();
    store
        .save(&ChangeCursor::at(pair_a(), Timestamp::from_millis(100)))
        .unwrap();
    store
        .save(&ChangeCursor::at(pair_a(), Timestamp::from_millis(900)))
        .unwrap();
    assert_eq!(
        store.load(&pair_a()).unwrap().watermark,
        Timestamp::from_millis(900)
    );
}

#[test]
fn list_returns_all_pairs_sorted() {
    let store = SqliteCursorStore::open_in_memory().unwrap();
    store
        .save(&ChangeCursor::at(pair_a(), Timestamp::from_millis(1)))
        .unwrap();
    store
        .save(&ChangeCursor::at(pair_b(), Timestamp::from_millis(2)))
        .unwrap();

    let all = store.list().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].store_pair, pair_b());
    assert_eq!(all[1].store_pair, pair_a());
}

#[test]
fn cursors_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cursors.db");

    {
        let store = SqliteCursorStore::open(&path).unwrap();
        store
            .save(&ChangeCursor::at(pair_b(), Timestamp::from_millis(77)))
            .unwrap();
    }

    let store = SqliteCursorStore::open(&path).unwrap();
    assert_eq!(
        store.load(&pair_b()).unwrap().watermark,
        Timestamp::from_millis(77)
    );
}

#[test]
fn open_in_missing_directory_is_storage_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing").join("cursors.db");
    let err = SqliteCursorStore::open(&path).err().unwrap();
    assert_eq!(err.kind(), tristore_sync::ErrorKind::Storage);
}
