//! Offline-capable resource context.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::slice;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::debug;

use hyperoffline_common::{Headers, PendingRequest, Result};

use crate::connectivity::Connectivity;
use crate::context::ResourceContext;
use crate::decision::{route, Route};
use crate::engine::SyncEngine;
use crate::replay::ReplayReport;
use crate::resource::{ConfigureRequest, Resource, ResourceGraph};

/// Wraps a [`ResourceContext`] and serves operations from the local store
/// while offline or for offline-only resources.
///
/// The route for each operation is decided when it starts and kept until
/// it completes.
pub struct OfflineContext<C: ResourceContext> {
    inner: Arc<C>,
    engine: Arc<SyncEngine>,
    connectivity: watch::Receiver<Connectivity>,
    resources: RwLock<ResourceGraph>,
}

impl<C: ResourceContext> OfflineContext<C> {
    pub fn new(
        inner: Arc<C>,
        engine: Arc<SyncEngine>,
        connectivity: watch::Receiver<Connectivity>,
    ) -> Self {
        Self::with_resources(inner, engine, connectivity, ResourceGraph::new())
    }

    fn with_resources(
        inner: Arc<C>,
        engine: Arc<SyncEngine>,
        connectivity: watch::Receiver<Connectivity>,
        resources: ResourceGraph,
    ) -> Self {
        Self {
            inner,
            engine,
            connectivity,
            resources: RwLock::new(resources),
        }
    }

    pub fn inner(&self) -> &Arc<C> {
        &self.inner
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Connectivity as currently reported.
    pub fn connectivity(&self) -> Connectivity {
        *self.connectivity.borrow()
    }

    fn route_for(&self, resource: &Resource) -> Route {
        route(self.connectivity(), resource.uri())
    }

    /// Get the resource for `uri`, creating an unresolved one if unknown.
    pub async fn get(&self, uri: &str) -> Resource {
        self.resources.write().await.get(uri).clone()
    }

    /// Look up a known resource.
    pub async fn resource(&self, uri: &str) -> Option<Resource> {
        self.resources.read().await.find(uri).cloned()
    }

    /// All known resources, ordered by URI.
    pub async fn resources(&self) -> Vec<Resource> {
        self.resources.read().await.iter().cloned().collect()
    }

    async fn remember(&self, resource: &Resource) {
        self.resources.write().await.insert(resource.clone());
    }

    async fn forget(&self, uri: &str) {
        self.resources.write().await.remove(uri);
    }

    /// Fetch a resource.
    ///
    /// Offline, the cached snapshot is applied if there is one and the
    /// resource is stamped with the local time. Without a snapshot the
    /// resource is left unresolved.
    pub async fn http_get(&self, resource: &mut Resource) -> Result<()> {
        match self.route_for(resource) {
            Route::Network => {
                self.inner.http_get(resource).await?;
                let at = resource.synced_at().unwrap_or_else(Utc::now);
                self.mark_synced(slice::from_mut(resource), Some(at)).await?;
            }
            Route::LocalStore => {
                if let Some(entry) = self.engine.cached(resource.uri()).await? {
                    resource.update(entry.data, entry.links);
                    self.inner
                        .mark_synced(slice::from_mut(resource), Some(Utc::now()));
                } else {
                    debug!("No cached state for {}", resource.uri());
                }
            }
        }
        self.remember(resource).await;
        Ok(())
    }

    /// Write a resource.
    pub async fn http_put(&self, resource: &mut Resource) -> Result<()> {
        match self.route_for(resource) {
            Route::Network => {
                self.inner.http_put(resource).await?;
                let at = resource.synced_at().unwrap_or_else(Utc::now);
                self.mark_synced(slice::from_mut(resource), Some(at)).await?;
            }
            Route::LocalStore => self.engine.queue_put(resource).await?,
        }
        self.remember(resource).await;
        Ok(())
    }

    /// Delete a resource and mark it unsynchronized.
    pub async fn http_delete(&self, resource: &mut Resource) -> Result<()> {
        match self.route_for(resource) {
            Route::Network => self.inner.http_delete(resource).await?,
            Route::LocalStore => self.engine.queue_delete(resource).await?,
        }
        self.forget(resource.uri()).await;
        self.mark_synced(slice::from_mut(resource), None).await
    }

    /// Post `data` to a resource.
    ///
    /// Offline, the request is queued whatever the resource URI.
    pub async fn http_post(
        &self,
        resource: &Resource,
        data: Value,
        headers: Headers,
        configure: Option<ConfigureRequest<'_>>,
    ) -> Result<()> {
        match self.route_for(resource) {
            Route::Network => {
                self.inner
                    .http_post(resource, data, headers, configure)
                    .await
            }
            Route::LocalStore => {
                let request = resource.post_request(data, headers, configure);
                self.engine.queue_post(request).await.map(|_| ())
            }
        }
    }

    /// Record resources as synchronized at `at` and cache them, or with
    /// `None` unmark them and drop their cache entries.
    pub async fn mark_synced(
        &self,
        resources: &mut [Resource],
        at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.engine.persist_sync_state(resources, at).await?;
        self.inner.mark_synced(resources, at);
        Ok(())
    }

    /// Network calls in flight in the wrapped context.
    pub fn busy_requests(&self) -> usize {
        self.inner.busy_requests()
    }

    /// Requests waiting in the offline queue.
    pub fn offline_requests(&self) -> usize {
        self.engine.offline_requests()
    }

    /// Queued POSTs for a resource, e.g. to show pending creations.
    pub async fn get_offline_posts(&self, resource: &Resource) -> Result<Vec<PendingRequest>> {
        self.engine.offline_posts(resource.uri()).await
    }

    /// Move all offline-only resources out of the store into a new context.
    ///
    /// The returned context shares this context's engine, inner context and
    /// connectivity source.
    pub async fn get_and_clear_offline_resources(&self) -> Result<Self> {
        let mut graph = ResourceGraph::new();
        for entry in self.engine.take_offline_entries().await? {
            graph.insert(Resource::from_cache_entry(entry));
        }

        Ok(Self::with_resources(
            self.inner.clone(),
            self.engine.clone(),
            self.connectivity.clone(),
            graph,
        ))
    }

    /// Drain the queue and replay it through the wrapped context now.
    pub async fn replay_pending(&self) -> Result<ReplayReport> {
        self.engine.replay_pending(self.inner.as_ref()).await
    }

    /// Wipe the offline store.
    pub async fn reinitialize(&self) -> Result<()> {
        self.engine.reinitialize().await
    }
}
