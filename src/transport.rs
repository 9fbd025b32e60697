//! Process-wide HTTP transport
//!
//! One [`reqwest::Client`] per process (HTTP/2, pooled connections), shared
//! by PostgREST, Storage and Auth. [`Transport::new_request`] returns a
//! builder pre-populated with the resolved URI and every header carried by
//! the [`Config`] snapshot it was built from.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::error::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Shared HTTP client plus the config snapshot it was built against
///
/// Cheap to clone: `Client` is internally `Arc`-backed by reqwest, and
/// `Config` is cloned in full (a `Config` rebuild is already how the
/// Gateway produces a fresh credentialed view, so this mirrors that cost).
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    config: Config,
}

impl Transport {
    /// Build a new transport from a config snapshot. Constructs a fresh
    /// `reqwest::Client` — callers that want to share a connection pool
    /// across reconfiguration should prefer `with_client`.
    pub fn new(config: Config) -> Result<Self> {
        let client = build_client()?;
        Ok(Self { client, config })
    }

    /// Build a transport that reuses an existing `reqwest::Client` (e.g.
    /// the Gateway reusing one pool across anonymous/authenticated swaps).
    pub fn with_client(client: Client, config: Config) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A request builder for `path`, pre-populated with the resolved URI
    /// and every header from the config snapshot.
    pub fn new_request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.config.resolve_url(path)?;
        Ok(self
            .client
            .request(method, url)
            .headers(self.config.headers().clone()))
    }

    /// Send and deserialize into `T`. An empty body (204, or zero-length
    /// content) deserializes as `T::default()`-like sentinel via
    /// `serde_json::from_str("null")`, matching PostgREST's `return=minimal`
    /// convention of an empty response body meaning "no representation".
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let response = Self::check_status(response).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return serde_json::from_str("null").map_err(Error::from);
        }
        serde_json::from_slice(&bytes).map_err(|e| Error::decode(e))
    }

    /// Send and return the raw response body as text (used for `csv()` and
    /// `explain()` text variants).
    pub async fn send_text(&self, request: RequestBuilder) -> Result<String> {
        let response = request.send().await?;
        let response = Self::check_status(response).await?;
        Ok(response.text().await?)
    }

    /// Send and return the raw response body as bytes (storage downloads).
    pub async fn send_bytes(&self, request: RequestBuilder) -> Result<Vec<u8>> {
        let response = request.send().await?;
        let response = Self::check_status(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Send and return the full response, unconsumed, for callers that
    /// need status/headers alongside the body (e.g. `count()` reading
    /// `Content-Range`).
    pub async fn send_response(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        Self::check_status(response).await
    }

    async fn check_status(response: Response) -> Result<Response> {
        if response.status().as_u16() >= 400 {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::http(status, text));
        }
        Ok(response)
    }
}

fn build_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> Config {
        Config::builder(base_url, "anon-key").build().unwrap()
    }

    #[tokio::test]
    async fn new_request_carries_config_headers() {
        crate::test_support::init_test_logging();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/todos"))
            .and(header("apikey", "anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let transport = Transport::new(test_config(&server.uri())).unwrap();
        let request = transport
            .new_request(Method::GET, "/rest/v1/todos")
            .unwrap();
        let result: serde_json::Value = transport.send_json(request).await.unwrap();
        assert_eq!(result, serde_json::json!([]));
    }

    #[tokio::test]
    async fn http_error_status_becomes_domain_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let transport = Transport::new(test_config(&server.uri())).unwrap();
        let request = transport
            .new_request(Method::GET, "/rest/v1/missing")
            .unwrap();
        let result: Result<serde_json::Value> = transport.send_json(request).await;
        match result {
            Err(Error::Http { status: 404, .. }) => {}
            other => panic!("expected Http(404), got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_body_decodes_as_null_sentinel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/todos"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let transport = Transport::new(test_config(&server.uri())).unwrap();
        let request = transport
            .new_request(Method::POST, "/rest/v1/todos")
            .unwrap();
        let result: serde_json::Value = transport.send_json(request).await.unwrap();
        assert!(result.is_null());
    }
}
