//! Common types used throughout hyperoffline.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Link relations of a resource, keyed by relation name.
pub type Links = serde_json::Map<String, Value>;

/// Request headers, ordered by name.
pub type Headers = BTreeMap<String, String>;

/// Content type sent with serialized resource state.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Check whether a URI refers to purely local state.
///
/// Anything that is not an absolute `http://` or `https://` address never
/// touches the network and is never queued for replay.
pub fn is_offline_only(uri: &str) -> bool {
    !(uri.starts_with("http://") || uri.starts_with("https://"))
}

/// HTTP method of a mutating request that can be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Put,
    Delete,
    Post,
}

impl Method {
    /// Lowercase name, as persisted in the request queue.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Put => "put",
            Method::Delete => "delete",
            Method::Post => "post",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "put" => Ok(Method::Put),
            "delete" => Ok(Method::Delete),
            "post" => Ok(Method::Post),
            other => Err(crate::Error::InvalidInput(format!(
                "Unsupported request method: {}",
                other
            ))),
        }
    }
}

/// A replayable description of a mutating network request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
}

impl RequestDescriptor {
    /// Create a descriptor without body or headers.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            data: None,
            headers: Headers::new(),
        }
    }

    /// Attach a request body.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Add a single header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Merge a set of headers, overriding existing names.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers.extend(headers);
        self
    }
}

/// A queued request, as persisted in the pending-request table.
///
/// `id` is assigned by the store at commit time and only ever grows, so
/// sorting by it yields the original insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub id: i64,
    #[serde(flatten)]
    pub request: RequestDescriptor,
}

impl PendingRequest {
    pub fn method(&self) -> Method {
        self.request.method
    }

    pub fn url(&self) -> &str {
        &self.request.url
    }
}

/// Persisted snapshot of a resource's data and links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub uri: String,
    pub data: Value,
    #[serde(default)]
    pub links: Links,
}

impl CacheEntry {
    pub fn new(uri: impl Into<String>, data: Value, links: Links) -> Self {
        Self {
            uri: uri.into(),
            data,
            links,
        }
    }

    /// Whether this entry belongs to a resource that never touches the network.
    pub fn is_offline_only(&self) -> bool {
        is_offline_only(&self.uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_offline_only_uris() {
        assert!(!is_offline_only("http://example.com/1"));
        assert!(!is_offline_only("https://example.com"));
        assert!(is_offline_only("local:draft-1"));
        assert!(is_offline_only("/relative/path"));
        assert!(is_offline_only("ftp://example.com"));
        assert!(is_offline_only("HTTP://example.com"));
        assert!(is_offline_only(""));
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("put".parse::<Method>().unwrap(), Method::Put);
        assert_eq!("DELETE".parse::<Method>().unwrap(), Method::Delete);
        assert!("patch".parse::<Method>().is_err());
        assert_eq!(Method::Post.to_string(), "post");
    }

    #[test]
    fn test_delete_descriptor_omits_body_and_headers() {
        let request = RequestDescriptor::new(Method::Delete, "http://example.com");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, json!({"method": "delete", "url": "http://example.com"}));
    }

    #[test]
    fn test_pending_request_flattens_descriptor() {
        let pending = PendingRequest {
            id: 7,
            request: RequestDescriptor::new(Method::Post, "http://example.com")
                .with_data(json!({"name": "John"}))
                .with_header("X-Test", "yes"),
        };
        let json = serde_json::to_value(&pending).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["method"], "post");
        assert_eq!(json["headers"]["X-Test"], "yes");
    }

    proptest! {
        #[test]
        fn network_uris_are_never_offline_only(host in "[a-z]{1,12}", path in "[a-z0-9/]{0,16}", tls in any::<bool>()) {
            let scheme = if tls { "https" } else { "http" };
            let uri = format!("{}://{}.example/{}", scheme, host, path);
            prop_assert!(!is_offline_only(&uri));
        }

        #[test]
        fn other_schemes_are_offline_only(scheme in "[a-g][a-z]{0,6}", rest in "[a-z0-9:/-]{0,16}") {
            let uri = format!("{}:{}", scheme, rest);
            prop_assert!(is_offline_only(&uri));
        }
    }
}
