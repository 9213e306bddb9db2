//! Interfaces consumed from the underlying resource context.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use hyperoffline_common::{Headers, RequestDescriptor, Result};

use crate::resource::{ConfigureRequest, Resource};

/// Raw transport used to replay queued requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and wait for its completion.
    ///
    /// # Errors
    /// - Network failure or a non-success response
    async fn send(&self, request: &RequestDescriptor) -> Result<()>;
}

/// Network-backed resource operations.
///
/// The offline layer wraps an implementation of this trait and calls
/// through to it whenever a request can go to the network.
#[async_trait]
pub trait ResourceContext: Transport {
    /// Fetch the resource state from the server and apply it.
    async fn http_get(&self, resource: &mut Resource) -> Result<()>;

    /// Write the resource state to the server.
    async fn http_put(&self, resource: &mut Resource) -> Result<()>;

    /// Delete the resource on the server.
    async fn http_delete(&self, resource: &mut Resource) -> Result<()>;

    /// Post `data` to the resource.
    async fn http_post(
        &self,
        resource: &Resource,
        data: Value,
        headers: Headers,
        configure: Option<ConfigureRequest<'_>>,
    ) -> Result<()>;

    /// Number of network calls currently in flight.
    fn busy_requests(&self) -> usize;

    /// Record the synchronization state of in-memory resources.
    fn mark_synced(&self, resources: &mut [Resource], at: Option<DateTime<Utc>>) {
        for resource in resources.iter_mut() {
            resource.mark_synced(at);
        }
    }
}
