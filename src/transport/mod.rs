//! HTTP transport abstraction used for every pull-based request.
//!
//! The core never talks to `reqwest` directly; it sends [`HttpRequest`]s
//! through a [`Transport`] so tests and embedding applications can substitute
//! their own implementation. [`ReqwestTransport`] is the default.
//!
//! Non-2xx statuses are *not* errors at this layer: they come back as an
//! [`HttpResponse`] and the client decides how to report them.

pub mod sse;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

// ============================================================================
// Request / Response
// ============================================================================

/// HTTP methods used by the Grid API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Put => write!(f, "PUT"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// A request handed to a [`Transport`].
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// JSON body, sent with `Content-Type: application/json`.
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, url).with_body(body)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_headers<'a, I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Status and body text of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ============================================================================
// Transport Error Types
// ============================================================================

/// Failures that prevented a response from being received at all.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Connection error (DNS, refused, reset).
    #[error("Connection error: {0}")]
    Connection(String),
    /// Timeout error.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),
    /// Request could not be built (bad header, bad URL).
    #[error("Invalid request: {0}")]
    Build(String),
    /// I/O error while reading the body.
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Create a connection error from any error type.
    pub fn connection<E: fmt::Display>(err: E) -> Self {
        TransportError::Connection(err.to_string())
    }

    fn from_reqwest(err: reqwest::Error, timeout: Option<Duration>) -> Self {
        if err.is_timeout() {
            return TransportError::Timeout(timeout.unwrap_or_default());
        }
        if err.is_builder() {
            return TransportError::Build(err.to_string());
        }
        if err.is_body() || err.is_decode() {
            return TransportError::Io(err.to_string());
        }
        TransportError::connection(err)
    }
}

// ============================================================================
// Transport Trait
// ============================================================================

/// Request/response collaborator for the Grid client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one HTTP exchange.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

// ============================================================================
// Reqwest Transport
// ============================================================================

/// Default [`Transport`] backed by a pooled `reqwest::Client`.
///
/// Every request is marked non-cacheable.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl ReqwestTransport {
    /// Create a new transport with an optional per-request timeout.
    pub fn new(timeout: Option<Duration>) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Build(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: None,
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        trace!("Sending HTTP request: {} {}", request.method, request.url);

        let mut builder = self
            .client
            .request(method, &request.url)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .header(reqwest::header::PRAGMA, "no-cache");

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, self.timeout))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(e, self.timeout))?;

        trace!("Received HTTP response: status={} url={}", status, request.url);

        Ok(HttpResponse { status, body })
    }
}
