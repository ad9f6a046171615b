//! Outbound transport abstraction and the reqwest implementation

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method};
use serde_json::Value;

use crate::error::ApiError;

/// A fully prepared outbound request
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Deadline for this single attempt
    pub timeout: Duration,
}

impl OutboundRequest {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status, selected headers and body text of a received response
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    /// Parsed `Retry-After` seconds, if the server sent one
    pub retry_after: Option<u64>,
    pub body: String,
}

/// Sends one request attempt. Retries, caching and auth live above this.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<RawResponse, ApiError>;
}

/// HTTP(S) transport backed by reqwest
pub struct HttpTransport {
    http: HttpClient,
}

impl HttpTransport {
    pub fn new() -> Result<Self, ApiError> {
        let http = HttpClient::builder()
            .user_agent(concat!("pollsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> Result<RawResponse, ApiError> {
        // reqwest's per-request timeout aborts the connection itself
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(ref body) = request.body {
            builder = builder.body(body.to_string());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(request.timeout)
            } else {
                ApiError::from(e)
            }
        })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let body = response.text().await.map_err(ApiError::from)?;

        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }
}
