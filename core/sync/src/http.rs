//! HTTP resource context backed by reqwest.
//!
//! Speaks HAL-style JSON: the `_links` member of a response body is split
//! off into the resource's links.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use hyperoffline_common::{Error, Headers, Links, Method, RequestDescriptor, Result, JSON_CONTENT_TYPE};

use crate::context::{ResourceContext, Transport};
use crate::resource::{ConfigureRequest, Resource};

/// Counts a request as busy for as long as it is alive.
struct BusyGuard(Arc<AtomicUsize>);

impl BusyGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Resource context talking to a hypermedia API over HTTP.
#[derive(Clone)]
pub struct HttpContext {
    client: reqwest::Client,
    busy: Arc<AtomicUsize>,
}

impl HttpContext {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            busy: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Perform a request and return the raw response body.
    async fn execute(
        &self,
        method: reqwest::Method,
        url: &str,
        headers: &Headers,
        data: Option<&Value>,
    ) -> Result<String> {
        let url = Url::parse(url).map_err(|e| Error::InvalidInput(format!("{}: {}", url, e)))?;
        let _busy = BusyGuard::new(&self.busy);
        debug!("{} {}", method, url);

        let mut builder = self
            .client
            .request(method, url)
            .header(ACCEPT, JSON_CONTENT_TYPE);
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match data {
            Some(Value::String(text)) if !is_json(headers) => builder.body(text.clone()),
            Some(data) => builder.json(data),
            None => builder,
        };

        let response = builder
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(transport_err)?;

        response.text().await.map_err(transport_err)
    }

    /// Send a queued or mutating request. Response bodies are not used.
    async fn send_descriptor(&self, request: &RequestDescriptor) -> Result<()> {
        self.execute(
            to_http_method(request.method),
            &request.url,
            &request.headers,
            request.data.as_ref(),
        )
        .await
        .map(|_| ())
    }
}

impl Default for HttpContext {
    fn default() -> Self {
        Self::new()
    }
}

fn to_http_method(method: Method) -> reqwest::Method {
    match method {
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
        Method::Post => reqwest::Method::POST,
    }
}

fn is_json(headers: &Headers) -> bool {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()))
        .map(|(_, value)| value.contains("json"))
        .unwrap_or(true)
}

fn transport_err(err: reqwest::Error) -> Error {
    Error::Transport(err.to_string())
}

/// Decode a resource representation. Anything but JSON is rejected so a
/// stray HTML page never replaces resource state.
fn decode_body(url: &str, body: &str) -> Result<Value> {
    serde_json::from_str(body)
        .map_err(|e| Error::Serialization(format!("{} did not return JSON: {}", url, e)))
}

/// Split a HAL body into its state and its `_links`.
pub fn split_hal(body: Value) -> (Value, Links) {
    match body {
        Value::Object(mut map) => {
            let links = match map.remove("_links") {
                Some(Value::Object(links)) => links,
                _ => Links::new(),
            };
            (Value::Object(map), links)
        }
        other => (other, Links::new()),
    }
}

#[async_trait]
impl Transport for HttpContext {
    async fn send(&self, request: &RequestDescriptor) -> Result<()> {
        self.send_descriptor(request).await
    }
}

#[async_trait]
impl ResourceContext for HttpContext {
    async fn http_get(&self, resource: &mut Resource) -> Result<()> {
        let body = self
            .execute(reqwest::Method::GET, resource.uri(), &Headers::new(), None)
            .await?;
        let (data, links) = split_hal(decode_body(resource.uri(), &body)?);
        resource.update(data, links);
        resource.mark_synced(Some(Utc::now()));
        Ok(())
    }

    async fn http_put(&self, resource: &mut Resource) -> Result<()> {
        self.send_descriptor(&resource.put_request()).await?;
        resource.mark_synced(Some(Utc::now()));
        Ok(())
    }

    async fn http_delete(&self, resource: &mut Resource) -> Result<()> {
        self.send_descriptor(&resource.delete_request()).await?;
        resource.mark_synced(None);
        Ok(())
    }

    async fn http_post(
        &self,
        resource: &Resource,
        data: Value,
        headers: Headers,
        configure: Option<ConfigureRequest<'_>>,
    ) -> Result<()> {
        let request = resource.post_request(data, headers, configure);
        self.send_descriptor(&request).await
    }

    fn busy_requests(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OfflineConfig;
    use crate::connectivity::{Connectivity, ConnectivityMonitor};
    use crate::engine::SyncEngine;
    use crate::offline::OfflineContext;
    use hyperoffline_storage::{LocalStore, MemoryStore};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_split_hal() {
        let (data, links) = split_hal(json!({
            "name": "John",
            "_links": {"self": {"href": "http://x/1"}}
        }));

        assert_eq!(data, json!({"name": "John"}));
        assert_eq!(links["self"]["href"], "http://x/1");
    }

    #[test]
    fn test_split_non_object() {
        let (data, links) = split_hal(json!("plain"));
        assert_eq!(data, json!("plain"));
        assert!(links.is_empty());
    }

    #[test]
    fn test_busy_guard_counts() {
        let context = HttpContext::new();
        {
            let _a = BusyGuard::new(&context.busy);
            let _b = BusyGuard::new(&context.busy);
            assert_eq!(context.busy_requests(), 2);
        }
        assert_eq!(context.busy_requests(), 0);
    }

    #[test]
    fn test_text_bodies_skip_json_encoding() {
        let mut headers = Headers::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        assert!(!is_json(&headers));
        assert!(is_json(&Headers::new()));
    }

    #[tokio::test]
    async fn test_get_splits_hal_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/people/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "John",
                "_links": {"self": {"href": "/people/1"}}
            })))
            .mount(&server)
            .await;

        let context = HttpContext::new();
        let mut resource = Resource::new(format!("{}/people/1", server.uri()));
        context.http_get(&mut resource).await.unwrap();

        assert_eq!(resource.data, json!({"name": "John"}));
        assert_eq!(resource.links["self"]["href"], "/people/1");
        assert!(resource.is_synced());
        assert_eq!(context.busy_requests(), 0);
    }

    #[tokio::test]
    async fn test_html_response_keeps_cached_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/people/1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<html>Sign in</html>", "text/html"),
            )
            .mount(&server)
            .await;

        let uri = format!("{}/people/1", server.uri());
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(SyncEngine::new(store.clone(), &OfflineConfig::default()).await);
        let monitor = ConnectivityMonitor::new(Connectivity::Online);
        let context = OfflineContext::new(Arc::new(HttpContext::new()), engine, monitor.subscribe());

        let mut cached = Resource::with_state(uri.as_str(), json!({"good": true}), Links::new());
        context
            .mark_synced(std::slice::from_mut(&mut cached), Some(Utc::now()))
            .await
            .unwrap();

        let mut resource = Resource::new(uri.as_str());
        let err = context.http_get(&mut resource).await.unwrap_err();

        assert!(matches!(err, Error::Serialization(_)));
        assert!(!resource.is_synced());
        assert_eq!(
            store.get(&uri).await.unwrap().unwrap().data,
            json!({"good": true})
        );
    }

    #[tokio::test]
    async fn test_mutation_ignores_response_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/people/1"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("ok", "text/plain"))
            .expect(1)
            .mount(&server)
            .await;

        let context = HttpContext::new();
        let mut resource = Resource::with_state(
            format!("{}/people/1", server.uri()),
            json!({"a": 1}),
            Links::new(),
        );
        context.http_put(&mut resource).await.unwrap();

        assert!(resource.is_synced());
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_without_counting() {
        let context = HttpContext::new();
        let request = RequestDescriptor::new(Method::Delete, "not a url");

        let err = context.send(&request).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(context.busy_requests(), 0);
    }
}
