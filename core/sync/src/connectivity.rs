//! Connectivity state and the listener that replays on reconnect.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::Transport;
use crate::engine::SyncEngine;

/// Network reachability as reported by the connectivity source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn is_online(&self) -> bool {
        matches!(self, Connectivity::Online)
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Connectivity::Offline)
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Online => f.write_str("online"),
            Connectivity::Offline => f.write_str("offline"),
        }
    }
}

/// Publishes connectivity transitions.
///
/// Receivers are only woken when the state actually changes.
pub struct ConnectivityMonitor {
    tx: watch::Sender<Connectivity>,
}

impl ConnectivityMonitor {
    pub fn new(initial: Connectivity) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Report the current state. Returns whether it changed.
    pub fn set(&self, status: Connectivity) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            info!("Connectivity changed to {}", status);
        }
        changed
    }

    pub fn current(&self) -> Connectivity {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(Connectivity::Online)
    }
}

/// Background task replaying the offline queue on every transition to online.
pub struct ReplayListener {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReplayListener {
    /// Spawn the listener.
    ///
    /// When `replay_on_startup` is set and the source already reports online,
    /// the queue is replayed once right away. The task ends when the
    /// connectivity source is dropped or [`ReplayListener::shutdown`] is called.
    pub fn spawn(
        engine: Arc<SyncEngine>,
        transport: Arc<dyn Transport>,
        mut connectivity: watch::Receiver<Connectivity>,
        replay_on_startup: bool,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        // Taken before spawning so a transition racing the first poll of
        // the task still wakes it.
        let initial = *connectivity.borrow_and_update();

        let task = tokio::spawn(async move {
            debug!("Replay listener started");

            if replay_on_startup && initial.is_online() && engine.offline_requests() > 0 {
                Self::replay(&engine, transport.as_ref()).await;
            }

            loop {
                tokio::select! {
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            debug!("Connectivity source closed");
                            break;
                        }
                        // Only the latest state matters if several
                        // transitions arrived before this wake-up.
                        let status = *connectivity.borrow_and_update();
                        if status.is_online() {
                            Self::replay(&engine, transport.as_ref()).await;
                        }
                    }
                    _ = &mut shutdown_rx => {
                        debug!("Replay listener shutting down");
                        break;
                    }
                }
            }
        });

        Self {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    async fn replay(engine: &SyncEngine, transport: &dyn Transport) {
        match engine.replay_pending(transport).await {
            Ok(report) if report.replayed > 0 => {
                info!("Replayed {} offline requests after reconnecting", report.replayed)
            }
            Ok(_) => debug!("Nothing to replay"),
            // Already broadcast by the engine; retried on the next transition.
            Err(e) => warn!("Replay after reconnecting failed: {}", e),
        }
    }

    /// Whether the background task has stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the listener and wait for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!("Replay listener task failed: {}", e);
        }
    }
}
