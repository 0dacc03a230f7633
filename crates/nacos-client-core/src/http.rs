//! HTTP plumbing shared by the config and naming clients.
//!
//! Wraps a single `reqwest::Client`, joins endpoint paths onto the server
//! base URL, classifies response statuses into the crate error taxonomy,
//! and verifies the literal acknowledgement bodies (`ok` / `true`) the
//! registry uses to signal success.

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

/// Endpoint for fetching, publishing and removing configuration content.
pub(crate) const CONFIG_ENDPOINT: &str = "/nacos/v1/cs/configs";
/// Endpoint held open by the server for configuration long-polling.
pub(crate) const CONFIG_LISTENER_ENDPOINT: &str = "/nacos/v1/cs/configs/listener";
/// Endpoint for instance registration, update and removal.
pub(crate) const INSTANCE_ENDPOINT: &str = "/nacos/v1/ns/instance";
/// Endpoint returning the instances of one service.
pub(crate) const INSTANCE_LIST_ENDPOINT: &str = "/nacos/v1/ns/instance/list";
/// Endpoint receiving instance heartbeats.
pub(crate) const INSTANCE_BEAT_ENDPOINT: &str = "/nacos/v1/ns/instance/beat";
/// Endpoint for service metadata CRUD.
pub(crate) const SERVICE_ENDPOINT: &str = "/nacos/v1/ns/service";
/// Endpoint returning a page of service names.
pub(crate) const SERVICE_LIST_ENDPOINT: &str = "/nacos/v1/ns/service/list";

/// Error taxonomy for registry HTTP calls.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Transport-level issue (DNS, TLS, socket, request timeout).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The server answered with a non-2xx status.
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code returned by the server.
        status: u16,
        /// Response body, buffered for diagnostics.
        body: String,
    },
    /// A 2xx response whose body is not the expected acknowledgement literal.
    #[error("expected response body {expected:?}, got {actual:?}")]
    UnexpectedBody {
        /// Literal the endpoint acknowledges success with.
        expected: &'static str,
        /// Body actually received.
        actual: String,
    },
    /// A 2xx response whose body could not be decoded as the expected JSON.
    #[error("failed to decode response payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// HTTP client encapsulating a reusable `reqwest::Client` and the server base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// Underlying HTTP client (shared across requests and clones).
    client: Client,
    /// Server base URL (scheme + host, no trailing slash).
    base_url: String,
}

impl ApiClient {
    /// Builds a client for the given server base URL.
    ///
    /// No global request timeout is configured: long-poll requests are held
    /// open by the server for tens of seconds and carry their own per-request
    /// deadline instead.
    pub fn new(base_url: impl Into<String>) -> Result<Self, HttpError> {
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = Client::builder().build()?;
        Ok(Self { client, base_url })
    }

    /// Returns the base URL currently configured for the client.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path))
    }

    pub(crate) fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path))
    }

    pub(crate) fn put(&self, path: &str) -> RequestBuilder {
        self.client.put(self.url(path))
    }

    pub(crate) fn delete(&self, path: &str) -> RequestBuilder {
        self.client.delete(self.url(path))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends a prepared request and classifies the response status.
    ///
    /// Non-2xx responses are buffered so the body reaches both the debug log
    /// and the returned [`HttpError::UnexpectedStatus`]; 2xx responses are
    /// handed back unread so the caller decides how to consume the body.
    pub(crate) async fn dispatch(&self, builder: RequestBuilder) -> Result<Response, HttpError> {
        let request = builder.build()?;
        let method = request.method().clone();
        let url = request.url().clone();
        debug!(method = %method, url = %url, "nacos HTTP request");

        let response = self.client.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(
                method = %method,
                url = %url,
                status = %status,
                body = %body,
                "nacos HTTP response"
            );
            return Err(HttpError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        debug!(method = %method, url = %url, status = %status, "nacos HTTP response");
        Ok(response)
    }

    /// Sends a request and verifies the acknowledgement literal in the body.
    pub(crate) async fn dispatch_expecting(
        &self,
        builder: RequestBuilder,
        expected: &'static str,
    ) -> Result<(), HttpError> {
        let response = self.dispatch(builder).await?;
        let actual = response.text().await?;
        if actual != expected {
            return Err(HttpError::UnexpectedBody { expected, actual });
        }
        Ok(())
    }

    /// Sends a request and decodes the 2xx body as JSON.
    ///
    /// Decoding goes through `serde_json` on the buffered text rather than
    /// `Response::json` so malformed payloads surface as [`HttpError::Decode`]
    /// instead of being folded into the transport variant.
    pub(crate) async fn dispatch_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, HttpError> {
        let response = self.dispatch(builder).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}
