//! HTTP Client Abstraction
//!
//! Provides single-hop async HTTP requests with streaming response bodies.
//!
//! Implementations must **not** follow redirects on their own: the core
//! handles `3xx` responses itself so it can decide, per hop, whether the
//! credentials attached to the original request may travel to the new
//! location.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::Result;
use crate::platform::DynAsyncRead;

/// HTTP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
}

/// HTTP request builder
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Attach a pre-encoded `Authorization: Basic ...` value.
    pub fn basic_auth(self, encoded: impl Into<String>) -> Self {
        self.header("Authorization", format!("Basic {}", encoded.into()))
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

/// HTTP response with a streaming body.
///
/// Header names are stored lowercase.
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Box<DynAsyncRead>,
}

impl HttpResponse {
    pub fn new(status: u16, headers: HashMap<String, String>, body: Box<DynAsyncRead>) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self {
            status,
            headers,
            body,
        }
    }

    /// Look up a header value by (case-insensitive) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Declared body length, when the server sent one.
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")
            .and_then(|v| v.trim().parse::<u64>().ok())
    }

    /// Check if response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if response status is a redirect the caller has to follow
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    /// Check if response status indicates a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if response status indicates a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &"AsyncRead { ... }")
            .finish()
    }
}

/// Async HTTP client trait
///
/// Implementations should:
/// - apply fixed connect/read timeouts
/// - send `Connection: close` and a static user agent
/// - return `3xx` responses untouched (no automatic redirects)
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::{HttpClient, HttpRequest};
///
/// async fn status_of(client: &dyn HttpClient) -> Result<u16> {
///     let response = client.send(HttpRequest::get("https://example.com/a.mp3")).await?;
///     Ok(response.status)
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send a single request and return the response head plus a body reader.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Network connection fails
    /// - TLS validation fails
    /// - Request times out before headers arrive
    ///
    /// Non-2xx statuses are **not** errors at this layer.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}
