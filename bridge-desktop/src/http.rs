//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse},
};
use futures_util::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONNECTION};
use reqwest::{redirect, Client};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_USER_AGENT: &str = "mpc-sources/0.1.0";

/// Reqwest-based HTTP client implementation
///
/// - Redirects are never followed; `3xx` responses are handed back as-is
/// - Every request carries `Connection: close`
/// - Bodies are streamed, never buffered
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Create a client with the default timeouts and user agent
    pub fn new() -> Result<Self> {
        Self::with_settings(
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_READ_TIMEOUT,
            DEFAULT_USER_AGENT,
        )
    }

    /// Create a client with explicit connect/read timeouts and user agent
    pub fn with_settings(
        connect_timeout: Duration,
        read_timeout: Duration,
        user_agent: &str,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("close"));

        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .pool_max_idle_per_host(0)
            .default_headers(headers)
            .user_agent(user_agent.to_string())
            .build()
            .map_err(|e| {
                BridgeError::OperationFailed(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }

    /// Wrap an already configured reqwest client
    ///
    /// The caller is responsible for disabling automatic redirects.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Convert bridge HttpMethod to reqwest Method
    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }

    /// Build reqwest request from bridge request
    fn build_request(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let method = Self::convert_method(request.method);
        let mut req = self.client.request(method, &request.url);

        for (key, value) in request.headers {
            req = req.header(key, value);
        }

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        req
    }

    fn map_send_error(e: reqwest::Error) -> BridgeError {
        if e.is_timeout() {
            BridgeError::Timeout("Request timed out".to_string())
        } else if e.is_connect() {
            BridgeError::ConnectionFailed(e.without_url().to_string())
        } else {
            BridgeError::OperationFailed(e.without_url().to_string())
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!(method = ?request.method, "Sending HTTP request");

        let response = self
            .build_request(request)
            .send()
            .await
            .map_err(|e| {
                let e = e.without_url();
                warn!(error = %e, "HTTP request failed");
                Self::map_send_error(e)
            })?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let reader = tokio_util::io::StreamReader::new(stream);

        Ok(HttpResponse::new(status, headers, Box::new(reader)))
    }
}
