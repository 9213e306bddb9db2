//! In-memory resources and the identity map that holds them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use hyperoffline_common::{
    is_offline_only, CacheEntry, Headers, Links, Method, RequestDescriptor, JSON_CONTENT_TYPE,
};

/// Callback that adjusts a POST request descriptor before it is sent or queued.
pub type ConfigureRequest<'a> = &'a (dyn Fn(&mut RequestDescriptor) + Send + Sync);

/// An addressable unit of hypermedia state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    uri: String,
    /// Application-defined payload.
    pub data: Value,
    /// Link relations, keyed by relation name.
    pub links: Links,
    /// Time of the last successful synchronization. `None` means never
    /// synced or locally dirty.
    synced_at: Option<DateTime<Utc>>,
}

impl Resource {
    /// Create an unresolved resource.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            data: Value::Null,
            links: Links::new(),
            synced_at: None,
        }
    }

    /// Create a resource with initial state.
    pub fn with_state(uri: impl Into<String>, data: Value, links: Links) -> Self {
        Self {
            uri: uri.into(),
            data,
            links,
            synced_at: None,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn synced_at(&self) -> Option<DateTime<Utc>> {
        self.synced_at
    }

    pub fn is_synced(&self) -> bool {
        self.synced_at.is_some()
    }

    /// Whether this resource is purely local state.
    pub fn is_offline_only(&self) -> bool {
        is_offline_only(&self.uri)
    }

    /// Replace data and links.
    pub fn update(&mut self, data: Value, links: Links) {
        self.data = data;
        self.links = links;
    }

    /// Stamp the resource as synchronized at `at`, or unmark it with `None`.
    pub fn mark_synced(&mut self, at: Option<DateTime<Utc>>) {
        self.synced_at = at;
    }

    /// Snapshot of data and links for the cache.
    pub fn to_cache_entry(&self) -> CacheEntry {
        CacheEntry::new(self.uri.clone(), self.data.clone(), self.links.clone())
    }

    /// Rebuild a resource from its cached snapshot.
    pub fn from_cache_entry(entry: CacheEntry) -> Self {
        Self::with_state(entry.uri, entry.data, entry.links)
    }

    /// Descriptor for writing this resource's state back to the server.
    pub fn put_request(&self) -> RequestDescriptor {
        RequestDescriptor::new(Method::Put, self.uri.clone())
            .with_data(self.data.clone())
            .with_header("Content-Type", JSON_CONTENT_TYPE)
    }

    /// Descriptor for deleting this resource on the server.
    pub fn delete_request(&self) -> RequestDescriptor {
        RequestDescriptor::new(Method::Delete, self.uri.clone())
    }

    /// Descriptor for posting `data` to this resource.
    pub fn post_request(
        &self,
        data: Value,
        headers: Headers,
        configure: Option<ConfigureRequest<'_>>,
    ) -> RequestDescriptor {
        let mut request = RequestDescriptor::new(Method::Post, self.uri.clone())
            .with_data(data)
            .with_headers(headers);
        if let Some(configure) = configure {
            configure(&mut request);
        }
        request
    }
}

/// Identity map of resources keyed by URI.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    resources: BTreeMap<String, Resource>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the resource for `uri`, inserting an unresolved one if absent.
    pub fn get(&mut self, uri: &str) -> &mut Resource {
        self.resources
            .entry(uri.to_string())
            .or_insert_with(|| Resource::new(uri))
    }

    /// Look up a resource without inserting.
    pub fn find(&self, uri: &str) -> Option<&Resource> {
        self.resources.get(uri)
    }

    /// Insert or replace a resource.
    pub fn insert(&mut self, resource: Resource) {
        self.resources.insert(resource.uri.clone(), resource);
    }

    pub fn remove(&mut self, uri: &str) -> Option<Resource> {
        self.resources.remove(uri)
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.resources.contains_key(uri)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// All resources, ordered by URI.
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }
}
