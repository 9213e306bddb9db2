//! Hyperoffline Sync Engine
//!
//! This module lets a client keep working against a hypermedia resource
//! graph while disconnected, including:
//! - Per-operation routing between the network and the local store
//! - A durable queue of mutating requests made while offline
//! - Ordered replay of the queue once connectivity returns
//! - Extraction of offline-only resources that never touch the network

pub mod config;
pub mod connectivity;
pub mod context;
pub mod decision;
pub mod engine;
pub mod http;
pub mod offline;
pub mod replay;
pub mod resource;

// Re-export main types
pub use config::OfflineConfig;
pub use connectivity::{Connectivity, ConnectivityMonitor, ReplayListener};
pub use context::{ResourceContext, Transport};
pub use decision::{route, Route};
pub use engine::{OfflineEvent, ReplayState, SyncEngine};
pub use http::HttpContext;
pub use offline::OfflineContext;
pub use replay::{replay_sequentially, FnReplay, ReplayReport, ReplayStrategy, SequentialReplay};
pub use resource::{ConfigureRequest, Resource, ResourceGraph};
