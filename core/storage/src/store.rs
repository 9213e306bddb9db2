//! Local store trait definition.

use async_trait::async_trait;

use hyperoffline_common::{CacheEntry, Method, PendingRequest, RequestDescriptor, Result};

/// A single write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert or replace the cache entry keyed by its URI.
    PutEntry(CacheEntry),
    /// Remove the cache entry for a URI. Missing entries are ignored.
    DeleteEntry(String),
    /// Append a request to the pending queue.
    Enqueue(RequestDescriptor),
}

/// An ordered set of writes committed as one transaction.
///
/// Either every operation becomes visible or none does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_entry(&mut self, entry: CacheEntry) -> &mut Self {
        self.ops.push(WriteOp::PutEntry(entry));
        self
    }

    pub fn delete_entry(&mut self, uri: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::DeleteEntry(uri.into()));
        self
    }

    pub fn enqueue(&mut self, request: RequestDescriptor) -> &mut Self {
        self.ops.push(WriteOp::Enqueue(request));
        self
    }

    /// Number of queue rows this batch will add.
    pub fn enqueued(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, WriteOp::Enqueue(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// What to do with the row just visited by [`LocalStore::scan_offline_only`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanAction {
    Keep,
    Delete,
}

/// Visitor called for every offline-only cache entry.
pub type ScanVisitor<'a> = dyn FnMut(&CacheEntry) -> ScanAction + Send + 'a;

/// Durable storage for cached resources and pending requests.
///
/// Implementations serialize their transactions: two batches touching the
/// same tables never interleave.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Backend name (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    /// Look up the cached snapshot for a URI.
    async fn get(&self, uri: &str) -> Result<Option<CacheEntry>>;

    /// Commit a batch atomically.
    ///
    /// # Returns
    /// The ids assigned to the batch's `Enqueue` operations, in batch order.
    ///
    /// # Errors
    /// - Any backend failure; nothing from the batch is visible afterwards
    async fn apply(&self, batch: WriteBatch) -> Result<Vec<i64>>;

    /// Read every pending request in id order and clear the queue.
    ///
    /// Either the full contents are returned and the queue is empty, or on
    /// failure the queue is left untouched.
    async fn drain_all(&self) -> Result<Vec<PendingRequest>>;

    /// Read every pending request in id order without removing it.
    async fn pending(&self) -> Result<Vec<PendingRequest>>;

    /// Pending requests for one `(url, method)` pair, in id order.
    async fn pending_for(&self, url: &str, method: Method) -> Result<Vec<PendingRequest>>;

    /// Number of rows in the pending queue.
    async fn count_pending(&self) -> Result<usize>;

    /// URIs of all cached entries, sorted.
    async fn entry_uris(&self) -> Result<Vec<String>>;

    /// Visit every offline-only cache entry inside one transaction.
    ///
    /// Rows for which the visitor returns [`ScanAction::Delete`] are removed
    /// when the transaction commits. Returns the number of removed rows.
    async fn scan_offline_only(&self, visitor: &mut ScanVisitor<'_>) -> Result<usize>;

    /// Destroy and recreate both tables, discarding all data.
    async fn reset(&self) -> Result<()>;

    /// Insert or replace a cache entry.
    async fn put(&self, entry: CacheEntry) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put_entry(entry);
        self.apply(batch).await.map(|_| ())
    }

    /// Remove a cache entry.
    async fn delete(&self, uri: &str) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete_entry(uri);
        self.apply(batch).await.map(|_| ())
    }

    /// Append a request to the queue and return its id.
    async fn enqueue(&self, request: RequestDescriptor) -> Result<i64> {
        let mut batch = WriteBatch::new();
        batch.enqueue(request);
        let ids = self.apply(batch).await?;
        ids.first().copied().ok_or_else(|| {
            hyperoffline_common::Error::Store("Enqueue did not return an id".to_string())
        })
    }
}
