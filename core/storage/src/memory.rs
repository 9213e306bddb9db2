//! In-memory local store for testing.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use hyperoffline_common::{
    is_offline_only, CacheEntry, Error, Method, PendingRequest, RequestDescriptor, Result,
};

use crate::store::{LocalStore, ScanAction, ScanVisitor, WriteBatch, WriteOp};

#[derive(Debug, Clone)]
struct Tables {
    resources: BTreeMap<String, CacheEntry>,
    requests: BTreeMap<i64, RequestDescriptor>,
    next_id: i64,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            resources: BTreeMap::new(),
            requests: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl Tables {
    fn pending(&self) -> Vec<PendingRequest> {
        self.requests
            .iter()
            .map(|(id, request)| PendingRequest {
                id: *id,
                request: request.clone(),
            })
            .collect()
    }
}

/// In-memory local store.
///
/// Useful for testing and development. Transactions are applied to a copy
/// of the tables and swapped in on success. All data is lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail until switched off again.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| Error::Store("Memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Store("Simulated write failure".to_string()));
        }
        self.tables
            .write()
            .map_err(|_| Error::Store("Memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, uri: &str) -> Result<Option<CacheEntry>> {
        Ok(self.read()?.resources.get(uri).cloned())
    }

    async fn apply(&self, batch: WriteBatch) -> Result<Vec<i64>> {
        let mut tables = self.write()?;
        let mut staged = tables.clone();
        let mut ids = Vec::with_capacity(batch.enqueued());

        for op in batch.into_ops() {
            match op {
                WriteOp::PutEntry(entry) => {
                    staged.resources.insert(entry.uri.clone(), entry);
                }
                WriteOp::DeleteEntry(uri) => {
                    staged.resources.remove(&uri);
                }
                WriteOp::Enqueue(request) => {
                    let id = staged.next_id;
                    staged.next_id += 1;
                    staged.requests.insert(id, request);
                    ids.push(id);
                }
            }
        }

        *tables = staged;
        Ok(ids)
    }

    async fn drain_all(&self) -> Result<Vec<PendingRequest>> {
        let mut tables = self.write()?;
        let drained = tables.pending();
        tables.requests.clear();
        Ok(drained)
    }

    async fn pending(&self) -> Result<Vec<PendingRequest>> {
        Ok(self.read()?.pending())
    }

    async fn pending_for(&self, url: &str, method: Method) -> Result<Vec<PendingRequest>> {
        Ok(self
            .read()?
            .pending()
            .into_iter()
            .filter(|p| p.url() == url && p.method() == method)
            .collect())
    }

    async fn count_pending(&self) -> Result<usize> {
        Ok(self.read()?.requests.len())
    }

    async fn entry_uris(&self) -> Result<Vec<String>> {
        Ok(self.read()?.resources.keys().cloned().collect())
    }

    async fn scan_offline_only(&self, visitor: &mut ScanVisitor<'_>) -> Result<usize> {
        let mut tables = self.write()?;

        let doomed: Vec<String> = tables
            .resources
            .values()
            .filter(|entry| is_offline_only(&entry.uri))
            .filter(|entry| visitor(*entry) == ScanAction::Delete)
            .map(|entry| entry.uri.clone())
            .collect();

        for uri in &doomed {
            tables.resources.remove(uri);
        }
        Ok(doomed.len())
    }

    async fn reset(&self) -> Result<()> {
        *self.write()? = Tables::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperoffline_common::Links;
    use serde_json::json;

    #[tokio::test]
    async fn test_batch_applies_atomically() {
        let store = MemoryStore::new();
        store
            .put(CacheEntry::new("http://x/1", json!({"a": 1}), Links::new()))
            .await
            .unwrap();

        store.fail_writes(true);
        let mut batch = WriteBatch::new();
        batch
            .delete_entry("http://x/1")
            .enqueue(RequestDescriptor::new(Method::Delete, "http://x/1"));
        assert!(store.apply(batch).await.is_err());

        assert!(store.get("http://x/1").await.unwrap().is_some());
        assert_eq!(store.count_pending().await.unwrap(), 0);

        store.fail_writes(false);
        let mut batch = WriteBatch::new();
        batch
            .delete_entry("http://x/1")
            .enqueue(RequestDescriptor::new(Method::Delete, "http://x/1"));
        assert_eq!(store.apply(batch).await.unwrap(), vec![1]);
        assert!(store.get("http://x/1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_drain_failure_keeps_queue() {
        let store = MemoryStore::new();
        store
            .enqueue(RequestDescriptor::new(Method::Post, "http://x/list"))
            .await
            .unwrap();

        store.fail_writes(true);
        assert!(store.drain_all().await.is_err());
        assert_eq!(store.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_scan_removes_only_deleted_offline_entries() {
        let store = MemoryStore::new();
        for uri in ["local:a", "local:b", "http://x/1"] {
            store
                .put(CacheEntry::new(uri, json!({}), Links::new()))
                .await
                .unwrap();
        }

        let removed = store
            .scan_offline_only(&mut |entry: &CacheEntry| {
                if entry.uri == "local:b" {
                    ScanAction::Delete
                } else {
                    ScanAction::Keep
                }
            })
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert_eq!(
            store.entry_uris().await.unwrap(),
            vec!["http://x/1", "local:a"]
        );
    }

    #[tokio::test]
    async fn test_reset_restarts_sequence() {
        let store = MemoryStore::new();
        store
            .enqueue(RequestDescriptor::new(Method::Post, "http://x/list"))
            .await
            .unwrap();
        store.reset().await.unwrap();

        assert_eq!(store.count_pending().await.unwrap(), 0);
        let id = store
            .enqueue(RequestDescriptor::new(Method::Post, "http://x/list"))
            .await
            .unwrap();
        assert_eq!(id, 1);
    }
}
