//! Core sync engine that owns the offline queue and the resource cache.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use hyperoffline_common::{CacheEntry, Error, Method, PendingRequest, RequestDescriptor, Result};
use hyperoffline_storage::{LocalStore, ScanAction, WriteBatch};

use crate::config::OfflineConfig;
use crate::context::Transport;
use crate::replay::{ReplayReport, ReplayStrategy, SequentialReplay};
use crate::resource::Resource;

/// Events broadcast to background observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfflineEvent {
    /// The local store reported a fault.
    StoreError(String),
    /// The local store is locked by another connection.
    StoreBlocked,
    /// A drained queue is about to be replayed.
    ReplayStarted { pending: usize },
    /// Every drained request was replayed.
    ReplayCompleted { replayed: usize },
    /// Replay stopped at a failing request.
    ReplayFailed { error: String },
    /// The store was destroyed and recreated.
    Reinitialized,
}

/// Replay state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    Idle,
    Draining,
    Replaying,
    Failed,
}

/// Offline synchronization engine.
///
/// All writes to the cache table and the request queue go through here.
/// The in-memory `offline_requests` counter only changes after the matching
/// store write has committed, and both happen under the same queue lock so
/// observers never see the counter disagree with a finished operation.
pub struct SyncEngine {
    /// Durable cache and queue.
    store: Arc<dyn LocalStore>,
    /// Number of rows in the pending queue.
    offline_requests: watch::Sender<usize>,
    /// Current replay state.
    replay_state: watch::Sender<ReplayState>,
    /// Replaceable replay policy.
    strategy: RwLock<Arc<dyn ReplayStrategy>>,
    /// Serializes queue writes with their counter updates.
    queue_lock: Mutex<()>,
    /// Serializes replays.
    replay_lock: Mutex<()>,
    /// Store faults and replay outcomes.
    events: broadcast::Sender<OfflineEvent>,
}

impl SyncEngine {
    /// Create an engine over an opened store.
    ///
    /// Counts the persisted queue once to seed `offline_requests`. A store
    /// fault here is logged and broadcast, and the counter starts at zero.
    pub async fn new(store: Arc<dyn LocalStore>, config: &OfflineConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (offline_requests, _) = watch::channel(0);
        let (replay_state, _) = watch::channel(ReplayState::Idle);

        let engine = Self {
            store,
            offline_requests,
            replay_state,
            strategy: RwLock::new(Arc::new(SequentialReplay)),
            queue_lock: Mutex::new(()),
            replay_lock: Mutex::new(()),
            events,
        };

        match engine.store.count_pending().await {
            Ok(count) => {
                debug!("Offline queue holds {} requests", count);
                engine.offline_requests.send_replace(count);
            }
            Err(e) => engine.report(&e),
        }

        engine
    }

    /// Open the configured store and create an engine over it.
    ///
    /// No engine exists yet to broadcast on, so an open failure is only
    /// logged and returned.
    pub async fn open(config: &OfflineConfig) -> Result<Self> {
        let store = config
            .open_store()
            .inspect_err(|e| error!("Failed to open offline store: {}", e))?;
        Ok(Self::new(store, config).await)
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    /// Number of queued requests.
    pub fn offline_requests(&self) -> usize {
        *self.offline_requests.borrow()
    }

    /// Subscribe to changes of the queued request count.
    pub fn watch_offline_requests(&self) -> watch::Receiver<usize> {
        self.offline_requests.subscribe()
    }

    pub fn replay_state(&self) -> ReplayState {
        *self.replay_state.borrow()
    }

    pub fn watch_replay_state(&self) -> watch::Receiver<ReplayState> {
        self.replay_state.subscribe()
    }

    /// Subscribe to store faults and replay outcomes.
    pub fn subscribe(&self) -> broadcast::Receiver<OfflineEvent> {
        self.events.subscribe()
    }

    /// Replace the replay policy.
    pub async fn set_replay_strategy(&self, strategy: Arc<dyn ReplayStrategy>) {
        *self.strategy.write().await = strategy;
    }

    /// Look up the cached snapshot for a URI.
    pub async fn cached(&self, uri: &str) -> Result<Option<CacheEntry>> {
        self.store.get(uri).await.inspect_err(|e| self.report(e))
    }

    /// Record an offline PUT.
    ///
    /// Queues the request unless the resource is offline-only, and always
    /// caches the resource state, in one transaction.
    pub async fn queue_put(&self, resource: &Resource) -> Result<()> {
        let mut batch = WriteBatch::new();
        if !resource.is_offline_only() {
            batch.enqueue(resource.put_request());
        }
        batch.put_entry(resource.to_cache_entry());

        self.commit("put", batch).await.map(|_| ())
    }

    /// Record an offline DELETE.
    ///
    /// Queues the request unless the resource is offline-only, and always
    /// removes the cache entry, in one transaction.
    pub async fn queue_delete(&self, resource: &Resource) -> Result<()> {
        let mut batch = WriteBatch::new();
        if !resource.is_offline_only() {
            batch.enqueue(resource.delete_request());
        }
        batch.delete_entry(resource.uri());

        self.commit("delete", batch).await.map(|_| ())
    }

    /// Record an offline POST. Returns the queue id.
    pub async fn queue_post(&self, request: RequestDescriptor) -> Result<i64> {
        let mut batch = WriteBatch::new();
        batch.enqueue(request);

        let ids = self.commit("post", batch).await?;
        ids.first()
            .copied()
            .ok_or_else(|| Error::Store("Enqueue did not return an id".to_string()))
    }

    /// Cache or uncache resources according to `at`.
    ///
    /// A timestamp stores each resource's snapshot; `None` removes it.
    /// Removing an entry that does not exist is not an error.
    pub async fn persist_sync_state(
        &self,
        resources: &[Resource],
        at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        for resource in resources {
            match at {
                Some(_) => batch.put_entry(resource.to_cache_entry()),
                None => batch.delete_entry(resource.uri()),
            };
        }

        if batch.is_empty() {
            return Ok(());
        }
        self.commit("mark_synced", batch).await.map(|_| ())
    }

    /// Queued POST requests for a resource URI, in queue order.
    pub async fn offline_posts(&self, uri: &str) -> Result<Vec<PendingRequest>> {
        self.store
            .pending_for(uri, Method::Post)
            .await
            .inspect_err(|e| self.report(e))
    }

    /// Queued requests, in queue order, without removing them.
    pub async fn pending_requests(&self) -> Result<Vec<PendingRequest>> {
        self.store.pending().await.inspect_err(|e| self.report(e))
    }

    /// Remove and return every offline-only cache entry in one transaction.
    pub async fn take_offline_entries(&self) -> Result<Vec<CacheEntry>> {
        let mut taken = Vec::new();
        let mut visitor = |entry: &CacheEntry| {
            taken.push(entry.clone());
            ScanAction::Delete
        };

        let removed = self
            .store
            .scan_offline_only(&mut visitor)
            .await
            .inspect_err(|e| self.report(e))?;

        debug!("Extracted {} offline-only resources", removed);
        Ok(taken)
    }

    /// Atomically read and clear the queue, resetting the counter.
    pub async fn drain(&self) -> Result<Vec<PendingRequest>> {
        let _queue = self.queue_lock.lock().await;
        let requests = self.store.drain_all().await.inspect_err(|e| self.report(e))?;
        self.offline_requests.send_replace(0);
        Ok(requests)
    }

    /// Drain the queue and replay it through `transport`.
    ///
    /// Drained requests are never restored: on failure the requests before
    /// the failing one have been applied and the rest are dropped.
    pub async fn replay_pending(&self, transport: &dyn Transport) -> Result<ReplayReport> {
        let _replay = self.replay_lock.lock().await;

        self.replay_state.send_replace(ReplayState::Draining);
        let requests = match self.drain().await {
            Ok(requests) => requests,
            Err(e) => {
                self.replay_state.send_replace(ReplayState::Failed);
                return Err(e);
            }
        };

        if requests.is_empty() {
            self.replay_state.send_replace(ReplayState::Idle);
            return Ok(ReplayReport::default());
        }

        let pending = requests.len();
        info!("Replaying {} offline requests", pending);
        self.replay_state.send_replace(ReplayState::Replaying);
        self.emit(OfflineEvent::ReplayStarted { pending });

        let strategy = self.strategy.read().await.clone();
        match strategy.replay(transport, requests).await {
            Ok(report) => {
                info!(
                    "Replay completed: {} replayed, {} skipped",
                    report.replayed, report.skipped
                );
                self.replay_state.send_replace(ReplayState::Idle);
                self.emit(OfflineEvent::ReplayCompleted {
                    replayed: report.replayed,
                });
                Ok(report)
            }
            Err(e) => {
                error!("Replay failed: {}", e);
                self.replay_state.send_replace(ReplayState::Failed);
                self.emit(OfflineEvent::ReplayFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Destroy and recreate the store, discarding all cached entries and
    /// queued requests.
    pub async fn reinitialize(&self) -> Result<()> {
        let _queue = self.queue_lock.lock().await;
        self.store.reset().await.inspect_err(|e| self.report(e))?;
        self.offline_requests.send_replace(0);

        info!("Offline cache reinitialized");
        self.emit(OfflineEvent::Reinitialized);
        Ok(())
    }

    /// Commit a batch and account for the rows it queued.
    async fn commit(&self, operation: &'static str, batch: WriteBatch) -> Result<Vec<i64>> {
        let _queue = self.queue_lock.lock().await;

        let ids = self.store.apply(batch).await.map_err(|e| {
            self.report(&e);
            Error::TransactionAbort {
                operation,
                reason: e.to_string(),
            }
        })?;

        if !ids.is_empty() {
            self.offline_requests.send_modify(|count| *count += ids.len());
            debug!("{} queued request(s) {:?}", operation, ids);
        }
        Ok(ids)
    }

    /// Log a store fault and broadcast it.
    fn report(&self, err: &Error) {
        match err {
            Error::StoreBlocked(msg) => {
                warn!("Offline store is blocked: {}", msg);
                self.emit(OfflineEvent::StoreBlocked);
            }
            Error::Store(msg) => {
                error!("Offline store error: {}", msg);
                self.emit(OfflineEvent::StoreError(msg.clone()));
            }
            _ => {}
        }
    }

    fn emit(&self, event: OfflineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
