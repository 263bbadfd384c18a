//! HTTP implementation of [`RemoteApi`].
//!
//! The actual HTTP client is abstracted behind a trait so platform
//! shells can plug in whatever stack they already ship; a loopback
//! client is provided for tests.

use crate::config::SyncConfig;
use crate::error::{EngineResult, SyncError};
use crate::transport::RemoteApi;
use fieldsync_protocol::{decode, encode, BatchUpsertRequest, BatchUpsertResponse, WireKind};
use std::time::Duration;

/// Endpoint for session batches.
pub const SESSIONS_ENDPOINT: &str = "/v1/sessions:batchUpsert";
/// Endpoint for sample batches.
pub const SAMPLES_ENDPOINT: &str = "/v1/samples:batchUpsert";

/// A raw HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

/// Network-level failure before any HTTP status was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpFailure {
    /// No response within the timeout.
    Timeout,
    /// Could not reach the host.
    Unreachable(String),
}

/// HTTP client abstraction.
///
/// Implementations send one POST with the given headers and body and
/// return the response, whatever its status.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request.
    fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &[u8],
        timeout: Duration,
    ) -> Result<HttpResponse, HttpFailure>;
}

/// [`RemoteApi`] over HTTP with CBOR bodies.
///
/// Maps HTTP statuses onto the engine's error taxonomy: 401/403 are
/// authentication failures, 429 is a rate limit, 5xx is a server
/// error, and anything else unexpected is a fatal transport error.
pub struct HttpRemote<C: HttpClient> {
    base_url: String,
    auth_token: Option<String>,
    timeout: Duration,
    client: C,
}

impl<C: HttpClient> HttpRemote<C> {
    /// Creates a remote from engine configuration.
    pub fn new(config: &SyncConfig, client: C) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            timeout: config.timeout,
            client,
        }
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![("Content-Type".to_string(), "application/cbor".to_string())];
        if let Some(token) = &self.auth_token {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        headers
    }
}

/// Returns the endpoint path for a record kind.
#[must_use]
pub fn endpoint_for(kind: WireKind) -> &'static str {
    match kind {
        WireKind::Session => SESSIONS_ENDPOINT,
        WireKind::Sample => SAMPLES_ENDPOINT,
    }
}

impl<C: HttpClient> RemoteApi for HttpRemote<C> {
    fn batch_upsert(&self, request: &BatchUpsertRequest) -> EngineResult<BatchUpsertResponse> {
        let url = format!("{}{}", self.base_url, endpoint_for(request.kind));
        let body = encode(request)?;

        let response = self
            .client
            .post(&url, &self.headers(), &body, self.timeout)
            .map_err(|failure| match failure {
                HttpFailure::Timeout => SyncError::Timeout,
                HttpFailure::Unreachable(message) => SyncError::transport_retryable(message),
            })?;

        match response.status {
            200 => Ok(decode(&response.body)?),
            401 | 403 => Err(SyncError::Authentication(body_text(&response))),
            429 => Err(SyncError::RateLimited(body_text(&response))),
            status @ 500..=599 => Err(SyncError::Server {
                status,
                message: body_text(&response),
            }),
            status => Err(SyncError::transport_fatal(format!(
                "unexpected status {status}"
            ))),
        }
    }
}

fn body_text(response: &HttpResponse) -> String {
    String::from_utf8_lossy(&response.body).into_owned()
}

/// A server that can answer loopback requests in-process.
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST to `path` and returns the response.
    fn handle(&self, path: &str, body: &[u8]) -> HttpResponse;
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for std::sync::Arc<S> {
    fn handle(&self, path: &str, body: &[u8]) -> HttpResponse {
        (**self).handle(path, body)
    }
}

/// Routes requests straight to a [`LoopbackServer`], no network.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a client wired to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn post(
        &self,
        url: &str,
        _headers: &[(String, String)],
        body: &[u8],
        _timeout: Duration,
    ) -> Result<HttpResponse, HttpFailure> {
        let path = url.find("/v1/").map_or(url, |i| &url[i..]);
        Ok(self.server.handle(path, body))
    }
}
