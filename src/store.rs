//! Where harvested entries end up.
//!
//! Two backends share the `EntrySink` contract:
//! - `SqliteSink` appends every batch to a per-query collection, no dedup.
//! - `FileSink` keeps a single JSON array and only appends ids it hasn't seen.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use tokio::task::spawn_blocking;

use crate::extract::TimelineEntry;
use crate::{info_time, Error, Result};

const SCHEMA_SQL: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS collections (
    key TEXT PRIMARY KEY,
    search_query TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entries (
    rowid INTEGER PRIMARY KEY,
    collection_key TEXT NOT NULL REFERENCES collections(key),
    entry_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    saved_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entries_collection ON entries(collection_key);
";

/// Storage-safe name for a query: every whitespace run becomes a single `_`.
pub fn collection_key(query: &str) -> String {
    let mut key = String::with_capacity(query.len());
    let mut in_whitespace = false;
    for c in query.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                key.push('_');
            }
            in_whitespace = true;
        } else {
            key.push(c);
            in_whitespace = false;
        }
    }
    key
}

/// Receives every batch extracted from one accepted response.
#[async_trait]
pub trait EntrySink: Send {
    /// Stores `batch` for `query` and returns how many entries were actually written.
    async fn persist(&mut self, query: &str, batch: &[TimelineEntry]) -> Result<usize>;
}

/// Per-query collections in a single SQLite file.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates the collection if it isn't there yet, then appends all `entries` to it.
    pub fn upsert_entries(
        &self,
        collection_key: &str,
        search_query: &str,
        entries: &[TimelineEntry],
    ) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT OR IGNORE INTO collections (key, search_query, created_at) VALUES (?1, ?2, ?3)",
            params![collection_key, search_query, now],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO entries (collection_key, entry_id, payload, saved_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for entry in entries {
                let payload = serde_json::to_string(entry)?;
                stmt.execute(params![collection_key, entry.entry_id, payload, now])?;
            }
        }
        tx.commit()?;
        Ok(entries.len())
    }

    /// All entries of a collection in the order they were saved.
    pub fn load_collection(&self, collection_key: &str) -> Result<Vec<TimelineEntry>> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let mut stmt = conn.prepare(
            "SELECT payload FROM entries WHERE collection_key = ?1 ORDER BY rowid",
        )?;
        let payloads = stmt
            .query_map(params![collection_key], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(Error::from))
            .collect()
    }

    pub fn collection_exists(&self, collection_key: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM collections WHERE key = ?1",
            params![collection_key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

/// Appends batches to the collection named after the query.
pub struct SqliteSink {
    store: SqliteStore,
}

impl SqliteSink {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EntrySink for SqliteSink {
    async fn persist(&mut self, query: &str, batch: &[TimelineEntry]) -> Result<usize> {
        let key = collection_key(query);
        let saved = spawn_blocking({
            let store = self.store.clone();
            let key = key.clone();
            let query = query.to_string();
            let batch = batch.to_vec();
            move || store.upsert_entries(&key, &query, &batch)
        })
        .await??;
        info_time!("{} entries saved to collection: {}", saved, key);
        Ok(saved)
    }
}

/// A pretty printed JSON array of entries.
pub struct JsonFileStore;

impl JsonFileStore {
    /// A missing file reads as no entries.
    pub async fn read_all(path: &Path) -> Result<Vec<TimelineEntry>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces the file, through a temporary file next to it.
    pub async fn write_all(path: &Path, entries: &[TimelineEntry]) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// Re-reads the file on every batch and only appends entry ids it doesn't hold yet.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EntrySink for FileSink {
    async fn persist(&mut self, _query: &str, batch: &[TimelineEntry]) -> Result<usize> {
        let mut entries = JsonFileStore::read_all(&self.path).await?;
        let mut seen: HashSet<String> = entries.iter().map(|e| e.entry_id.clone()).collect();

        let before = entries.len();
        for entry in batch {
            if seen.insert(entry.entry_id.clone()) {
                entries.push(entry.clone());
            }
        }
        let added = entries.len() - before;

        JsonFileStore::write_all(&self.path, &entries).await?;
        info_time!(
            "{} new entries saved to {}",
            added,
            self.path.display()
        );
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str) -> TimelineEntry {
        TimelineEntry::from_value(&json!({ "entryId": id, "sortIndex": "5" })).unwrap()
    }

    fn ids(entries: &[TimelineEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.entry_id.as_str()).collect()
    }

    #[test]
    fn collection_key_replaces_whitespace_runs() {
        assert_eq!(collection_key("alice smith"), "alice_smith");
        assert_eq!(collection_key("a  b\tc"), "a_b_c");
        assert_eq!(collection_key(" x "), "_x_");
        assert_eq!(collection_key("bob"), "bob");
    }

    #[test]
    fn sqlite_creates_then_appends_without_dedup() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&tmp.path().join("harvest.db")).unwrap();
        assert!(!store.collection_exists("alice_smith").unwrap());

        store
            .upsert_entries("alice_smith", "alice smith", &[entry("user-1"), entry("user-2")])
            .unwrap();
        assert!(store.collection_exists("alice_smith").unwrap());
        store
            .upsert_entries("alice_smith", "alice smith", &[entry("user-2")])
            .unwrap();

        let loaded = store.load_collection("alice_smith").unwrap();
        assert_eq!(ids(&loaded), ["user-1", "user-2", "user-2"]);
        assert_eq!(loaded[0], entry("user-1"));
        assert!(store.load_collection("other").unwrap().is_empty());
    }

    #[tokio::test]
    async fn sqlite_sink_uses_collection_key() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&tmp.path().join("harvest.db")).unwrap();
        let mut sink = SqliteSink::new(store.clone());
        let saved = sink.persist("bob  jones", &[entry("user-1")]).await.unwrap();
        assert_eq!(saved, 1);
        assert_eq!(store.load_collection("bob_jones").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_sink_dedups_against_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("usersEntries.json");
        JsonFileStore::write_all(&path, &[entry("A"), entry("B")])
            .await
            .unwrap();

        let mut sink = FileSink::new(&path);
        let added = sink.persist("q", &[entry("B"), entry("C")]).await.unwrap();
        assert_eq!(added, 1);

        let stored = JsonFileStore::read_all(&path).await.unwrap();
        assert_eq!(ids(&stored), ["A", "B", "C"]);
    }

    #[tokio::test]
    async fn file_sink_starts_missing_file_and_dedups_within_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("usersEntries.json");
        let mut sink = FileSink::new(&path);

        let added = sink
            .persist("q", &[entry("A"), entry("A"), entry("B")])
            .await
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(ids(&JsonFileStore::read_all(&path).await.unwrap()), ["A", "B"]);
    }

    #[tokio::test]
    async fn file_store_rejects_corrupt_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("usersEntries.json");
        tokio::fs::write(&path, "not json").await.unwrap();
        assert!(matches!(
            JsonFileStore::read_all(&path).await,
            Err(Error::Json(_))
        ));
    }
}
