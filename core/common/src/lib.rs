//! Common utilities and types shared across the hyperoffline crates.
//!
//! This module provides the error taxonomy and the persisted data types
//! (cache entries and queued requests) that the store and the sync engine
//! exchange.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    is_offline_only, CacheEntry, Headers, Links, Method, PendingRequest, RequestDescriptor,
    JSON_CONTENT_TYPE,
};
