use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use tracing::debug;

use crate::error::ApiError;

/// Header carrying the API credential
pub const TOKEN_HEADER: &str = "X-Riot-Token";

/// Status, advisory wait and body of an HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends a single GET; knows nothing about retries or rate limits
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse, ApiError>;
}

/// Production transport over reqwest
pub struct ReqwestTransport {
    client: Client,
    api_key: String,
}

impl ReqwestTransport {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpResponse, ApiError> {
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .header(TOKEN_HEADER, &self.api_key)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| ApiError::network(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        let body = response
            .text()
            .await
            .map_err(|e| ApiError::network(format!("Failed to read body from {}: {}", url, e)))?;

        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// `Retry-After` is sent as whole seconds by the Riot API
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
