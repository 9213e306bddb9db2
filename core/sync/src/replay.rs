//! Strategies for replaying queued requests after reconnecting.

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, error};

use hyperoffline_common::{Error, PendingRequest, Result};

use crate::context::Transport;

/// Outcome of a successful replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Requests sent and acknowledged.
    pub replayed: usize,
    /// Requests a strategy chose not to send.
    pub skipped: usize,
}

/// Policy turning an ordered batch of drained requests into network calls.
///
/// Drained requests are not returned to the queue, whatever the outcome.
#[async_trait]
pub trait ReplayStrategy: Send + Sync {
    async fn replay(
        &self,
        transport: &dyn Transport,
        requests: Vec<PendingRequest>,
    ) -> Result<ReplayReport>;
}

/// Send requests one at a time in ascending id order.
///
/// Each request is awaited before the next is issued. The first failure
/// stops the replay and is returned as [`Error::Replay`].
pub async fn replay_sequentially(
    transport: &dyn Transport,
    mut requests: Vec<PendingRequest>,
) -> Result<ReplayReport> {
    requests.sort_by_key(|r| r.id);
    let mut report = ReplayReport::default();

    for pending in &requests {
        debug!("Replaying request {}: {} {}", pending.id, pending.method(), pending.url());
        if let Err(e) = transport.send(&pending.request).await {
            error!(
                "Replay stopped at request {} ({} {}): {}",
                pending.id,
                pending.method(),
                pending.url(),
                e
            );
            return Err(Error::Replay {
                id: pending.id,
                method: pending.method().to_string(),
                url: pending.url().to_string(),
                reason: e.to_string(),
            });
        }
        report.replayed += 1;
    }

    Ok(report)
}

/// Default strategy: strict sequential replay.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialReplay;

#[async_trait]
impl ReplayStrategy for SequentialReplay {
    async fn replay(
        &self,
        transport: &dyn Transport,
        requests: Vec<PendingRequest>,
    ) -> Result<ReplayReport> {
        replay_sequentially(transport, requests).await
    }
}

/// Adapts a plain function into a [`ReplayStrategy`].
///
/// ```ignore
/// let posts_only = FnReplay::new(|transport, requests| {
///     async move {
///         let total = requests.len();
///         let posts: Vec<_> = requests.into_iter().filter(|r| r.method() == Method::Post).collect();
///         let mut report = replay_sequentially(transport, posts).await?;
///         report.skipped = total - report.replayed;
///         Ok(report)
///     }
///     .boxed()
/// });
/// ```
pub struct FnReplay<F> {
    func: F,
}

impl<F> FnReplay<F>
where
    F: for<'a> Fn(&'a dyn Transport, Vec<PendingRequest>) -> BoxFuture<'a, Result<ReplayReport>>
        + Send
        + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> ReplayStrategy for FnReplay<F>
where
    F: for<'a> Fn(&'a dyn Transport, Vec<PendingRequest>) -> BoxFuture<'a, Result<ReplayReport>>
        + Send
        + Sync,
{
    async fn replay(
        &self,
        transport: &dyn Transport,
        requests: Vec<PendingRequest>,
    ) -> Result<ReplayReport> {
        (self.func)(transport, requests).await
    }
}
