//! SQLite-backed local store.
//!
//! Persists cached resources and pending requests so the offline queue
//! survives restarts.

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use hyperoffline_common::{
    is_offline_only, CacheEntry, Error, Headers, Links, Method, PendingRequest,
    RequestDescriptor, Result,
};

use crate::store::{LocalStore, ScanAction, ScanVisitor, WriteBatch, WriteOp};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS resources (
        uri TEXT PRIMARY KEY,
        data TEXT NOT NULL,
        links TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS requests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        method TEXT NOT NULL,
        url TEXT NOT NULL,
        data TEXT,
        headers TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_requests_url_method ON requests(url, method);
"#;

const SELECT_REQUESTS: &str = "SELECT id, method, url, data, headers FROM requests";

/// Raw request row before JSON decoding.
type RequestRow = (i64, String, String, Option<String>, Option<String>);

/// Local store using SQLite.
///
/// Every operation runs on the calling task while holding the connection
/// lock, so transactions are serialized.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Create or open a store database.
    ///
    /// # Errors
    /// - Database creation or schema initialization failure
    pub fn open(db_path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path).map_err(store_err)?;
        conn.busy_timeout(busy_timeout).map_err(store_err)?;
        conn.execute_batch(SCHEMA).map_err(store_err)?;

        info!("Offline store opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        conn.execute_batch(SCHEMA).map_err(store_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Location of the database file, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Store("Connection lock poisoned".to_string()))
    }
}

/// Map a SQLite error onto the store fault taxonomy.
fn store_err(err: rusqlite::Error) -> Error {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            Error::StoreBlocked(err.to_string())
        }
        _ => Error::Store(err.to_string()),
    }
}

/// Rows that no longer decode are store faults, not caller errors.
fn corrupt(table: &str, key: impl std::fmt::Display, err: impl std::fmt::Display) -> Error {
    Error::Store(format!("Corrupt row {} in {}: {}", key, table, err))
}

fn decode_request((id, method, url, data, headers): RequestRow) -> Result<PendingRequest> {
    let method: Method = method.parse().map_err(|e| corrupt("requests", id, e))?;
    let data = data
        .map(|d| serde_json::from_str(&d))
        .transpose()
        .map_err(|e| corrupt("requests", id, e))?;
    let headers: Headers = match headers {
        Some(h) => serde_json::from_str(&h).map_err(|e| corrupt("requests", id, e))?,
        None => Headers::new(),
    };

    Ok(PendingRequest {
        id,
        request: RequestDescriptor {
            method,
            url,
            data,
            headers,
        },
    })
}

fn decode_entry(uri: String, data: &str, links: &str) -> Result<CacheEntry> {
    let data = serde_json::from_str(data).map_err(|e| corrupt("resources", &uri, e))?;
    let links: Links = serde_json::from_str(links).map_err(|e| corrupt("resources", &uri, e))?;
    Ok(CacheEntry { uri, data, links })
}

fn query_requests(
    tx: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<PendingRequest>> {
    let mut stmt = tx.prepare(sql).map_err(store_err)?;
    let rows = stmt
        .query_map(params, |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
            ))
        })
        .map_err(store_err)?
        .collect::<rusqlite::Result<Vec<RequestRow>>>()
        .map_err(store_err)?;

    rows.into_iter().map(decode_request).collect()
}

fn apply_op(tx: &Transaction<'_>, op: WriteOp, ids: &mut Vec<i64>) -> Result<()> {
    match op {
        WriteOp::PutEntry(entry) => {
            debug!("Caching entry: {}", entry.uri);
            let data = serde_json::to_string(&entry.data)?;
            let links = serde_json::to_string(&entry.links)?;
            tx.execute(
                "INSERT OR REPLACE INTO resources (uri, data, links) VALUES (?1, ?2, ?3)",
                params![entry.uri, data, links],
            )
            .map_err(store_err)?;
        }
        WriteOp::DeleteEntry(uri) => {
            debug!("Deleting entry: {}", uri);
            tx.execute("DELETE FROM resources WHERE uri = ?1", params![uri])
                .map_err(store_err)?;
        }
        WriteOp::Enqueue(request) => {
            let data = request
                .data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let headers = if request.headers.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&request.headers)?)
            };
            tx.execute(
                "INSERT INTO requests (method, url, data, headers) VALUES (?1, ?2, ?3, ?4)",
                params![request.method.as_str(), request.url, data, headers],
            )
            .map_err(store_err)?;
            let id = tx.last_insert_rowid();
            debug!("Queued {} {} as request {}", request.method, request.url, id);
            ids.push(id);
        }
    }
    Ok(())
}

#[async_trait]
impl LocalStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, uri: &str) -> Result<Option<CacheEntry>> {
        let conn = self.lock()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT data, links FROM resources WHERE uri = ?1",
                params![uri],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(store_err)?;

        row.map(|(data, links)| decode_entry(uri.to_string(), &data, &links))
            .transpose()
    }

    async fn apply(&self, batch: WriteBatch) -> Result<Vec<i64>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err)?;
        let mut ids = Vec::with_capacity(batch.enqueued());

        for op in batch.into_ops() {
            // Dropping `tx` on error rolls the whole batch back.
            apply_op(&tx, op, &mut ids)?;
        }

        tx.commit().map_err(store_err)?;
        Ok(ids)
    }

    async fn drain_all(&self) -> Result<Vec<PendingRequest>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err)?;

        let requests = query_requests(&tx, &format!("{} ORDER BY id", SELECT_REQUESTS), [])?;
        tx.execute("DELETE FROM requests", []).map_err(store_err)?;
        tx.commit().map_err(store_err)?;

        debug!("Drained {} pending requests", requests.len());
        Ok(requests)
    }

    async fn pending(&self) -> Result<Vec<PendingRequest>> {
        let conn = self.lock()?;
        query_requests(&conn, &format!("{} ORDER BY id", SELECT_REQUESTS), [])
    }

    async fn pending_for(&self, url: &str, method: Method) -> Result<Vec<PendingRequest>> {
        let conn = self.lock()?;
        query_requests(
            &conn,
            &format!("{} WHERE url = ?1 AND method = ?2 ORDER BY id", SELECT_REQUESTS),
            params![url, method.as_str()],
        )
    }

    async fn count_pending(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM requests", [], |row| row.get(0))
            .map_err(store_err)?;
        Ok(count as usize)
    }

    async fn entry_uris(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT uri FROM resources ORDER BY uri")
            .map_err(store_err)?;
        let uris = stmt
            .query_map([], |row| row.get(0))
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(store_err)?;
        Ok(uris)
    }

    async fn scan_offline_only(&self, visitor: &mut ScanVisitor<'_>) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err)?;

        let rows: Vec<(String, String, String)> = {
            let mut stmt = tx
                .prepare("SELECT uri, data, links FROM resources ORDER BY uri")
                .map_err(store_err)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
                .map_err(store_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(store_err)?;
            rows
        };

        let mut removed = 0;
        for (uri, data, links) in rows {
            if !is_offline_only(&uri) {
                continue;
            }
            let entry = decode_entry(uri, &data, &links)?;
            if visitor(&entry) == ScanAction::Delete {
                tx.execute("DELETE FROM resources WHERE uri = ?1", params![entry.uri])
                    .map_err(store_err)?;
                removed += 1;
            }
        }

        tx.commit().map_err(store_err)?;
        Ok(removed)
    }

    async fn reset(&self) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err)?;
        tx.execute_batch("DROP TABLE IF EXISTS requests; DROP TABLE IF EXISTS resources;")
            .map_err(store_err)?;
        tx.execute_batch(SCHEMA).map_err(store_err)?;
        tx.commit().map_err(store_err)?;

        info!("Offline store reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn entry(uri: &str, data: serde_json::Value) -> CacheEntry {
        let mut links = Links::new();
        links.insert("self".to_string(), json!({"href": uri}));
        CacheEntry::new(uri, data, links)
    }

    #[tokio::test]
    async fn test_entry_operations() {
        let store = SqliteStore::in_memory().unwrap();

        store.put(entry("http://x/1", json!({"a": 1}))).await.unwrap();
        let retrieved = store.get("http://x/1").await.unwrap().unwrap();
        assert_eq!(retrieved.data, json!({"a": 1}));
        assert_eq!(retrieved.links["self"]["href"], "http://x/1");

        store.put(entry("http://x/1", json!({"a": 2}))).await.unwrap();
        assert_eq!(store.get("http://x/1").await.unwrap().unwrap().data, json!({"a": 2}));

        store.delete("http://x/1").await.unwrap();
        assert!(store.get("http://x/1").await.unwrap().is_none());

        // Deleting a missing entry is a no-op
        store.delete("http://x/1").await.unwrap();
    }

    #[tokio::test]
    async fn test_queue_order_and_drain() {
        let store = SqliteStore::in_memory().unwrap();

        let first = store
            .enqueue(RequestDescriptor::new(Method::Put, "http://x/1").with_data(json!({"a": 1})))
            .await
            .unwrap();
        let second = store
            .enqueue(RequestDescriptor::new(Method::Delete, "http://x/2"))
            .await
            .unwrap();
        assert!(second > first);
        assert_eq!(store.count_pending().await.unwrap(), 2);

        let drained = store.drain_all().await.unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].id, first);
        assert_eq!(drained[0].request.data, Some(json!({"a": 1})));
        assert_eq!(drained[1].method(), Method::Delete);
        assert!(drained[1].request.headers.is_empty());
        assert_eq!(store.count_pending().await.unwrap(), 0);

        // Ids are never reused after a drain
        let third = store
            .enqueue(RequestDescriptor::new(Method::Post, "http://x/3"))
            .await
            .unwrap();
        assert!(third > second);
    }

    #[tokio::test]
    async fn test_pending_for_uses_url_and_method() {
        let store = SqliteStore::in_memory().unwrap();
        let post = RequestDescriptor::new(Method::Post, "http://x/list")
            .with_data(json!({"name": "John"}))
            .with_header("X-Test", "yes");

        store.enqueue(post.clone()).await.unwrap();
        store
            .enqueue(RequestDescriptor::new(Method::Put, "http://x/list"))
            .await
            .unwrap();
        store
            .enqueue(RequestDescriptor::new(Method::Post, "http://x/other"))
            .await
            .unwrap();

        let posts = store.pending_for("http://x/list", Method::Post).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].request, post);
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_nothing_behind() {
        let store = SqliteStore::in_memory().unwrap();
        store.put(entry("http://x/1", json!({"a": 1}))).await.unwrap();

        // Break the queue table so the second half of the batch fails.
        store
            .lock()
            .unwrap()
            .execute_batch("DROP TABLE requests;")
            .unwrap();

        let mut batch = WriteBatch::new();
        batch
            .delete_entry("http://x/1")
            .enqueue(RequestDescriptor::new(Method::Delete, "http://x/1"));
        assert!(store.apply(batch).await.is_err());

        assert!(store.get("http://x/1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_store_fault() {
        let store = SqliteStore::in_memory().unwrap();
        store.put(entry("http://x/1", json!({"good": true}))).await.unwrap();
        store
            .lock()
            .unwrap()
            .execute("UPDATE resources SET data = '{not json'", [])
            .unwrap();

        let err = store.get("http://x/1").await.unwrap_err();
        assert!(matches!(err, Error::Store(ref msg) if msg.contains("http://x/1")));
        assert!(err.is_store_fault());
    }

    #[tokio::test]
    async fn test_corrupt_request_fails_drain_without_losing_queue() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .enqueue(RequestDescriptor::new(Method::Put, "http://x/1"))
            .await
            .unwrap();
        store
            .lock()
            .unwrap()
            .execute("UPDATE requests SET method = 'patch'", [])
            .unwrap();

        assert!(matches!(store.drain_all().await, Err(Error::Store(_))));
        assert_eq!(store.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_locked_database_reports_blocked() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("offline.sqlite3");
        let store = SqliteStore::open(&path, Duration::from_millis(50)).unwrap();

        let holder = Connection::open(&path).unwrap();
        holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

        let err = store
            .enqueue(RequestDescriptor::new(Method::Delete, "http://x/1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreBlocked(_)));

        holder.execute_batch("ROLLBACK;").unwrap();
        store
            .enqueue(RequestDescriptor::new(Method::Delete, "http://x/1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_scan_offline_only_deletes_in_place() {
        let store = SqliteStore::in_memory().unwrap();
        store.put(entry("local:draft-1", json!({"t": 1}))).await.unwrap();
        store.put(entry("local:draft-2", json!({"t": 2}))).await.unwrap();
        store.put(entry("http://x/1", json!({"a": 1}))).await.unwrap();

        let mut seen = Vec::new();
        let removed = store
            .scan_offline_only(&mut |entry: &CacheEntry| {
                seen.push(entry.uri.clone());
                if entry.uri == "local:draft-1" {
                    ScanAction::Delete
                } else {
                    ScanAction::Keep
                }
            })
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert_eq!(seen, vec!["local:draft-1", "local:draft-2"]);
        assert_eq!(
            store.entry_uris().await.unwrap(),
            vec!["http://x/1", "local:draft-2"]
        );
    }

    #[tokio::test]
    async fn test_reset_discards_everything() {
        let store = SqliteStore::in_memory().unwrap();
        store.put(entry("http://x/1", json!({}))).await.unwrap();
        store
            .enqueue(RequestDescriptor::new(Method::Delete, "http://x/1"))
            .await
            .unwrap();

        store.reset().await.unwrap();

        assert!(store.entry_uris().await.unwrap().is_empty());
        assert_eq!(store.count_pending().await.unwrap(), 0);
        let id = store
            .enqueue(RequestDescriptor::new(Method::Delete, "http://x/1"))
            .await
            .unwrap();
        assert_eq!(id, 1);
    }

    #[tokio::test]
    async fn test_persistence() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache").join("offline.sqlite3");

        {
            let store = SqliteStore::open(&path, Duration::from_secs(1)).unwrap();
            store
                .enqueue(RequestDescriptor::new(Method::Put, "http://x/1"))
                .await
                .unwrap();
            store.put(entry("local:draft-1", json!({"t": 1}))).await.unwrap();
        }

        {
            let store = SqliteStore::open(&path, Duration::from_secs(1)).unwrap();
            assert_eq!(store.path(), Some(path.as_path()));
            assert_eq!(store.count_pending().await.unwrap(), 1);
            assert!(store.get("local:draft-1").await.unwrap().is_some());
        }
    }
}
