//! HTTP plumbing shared by discovery, pairing, inventory and dispatch.
//!
//! Components depend on the [`HttpTransport`] trait rather than on `reqwest`
//! directly so the state machines can be driven by scripted replies in tests.

use crate::error::{HueError, Result};
use crate::protocol::HttpMethod;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Asynchronous JSON-over-HTTP client
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request with an optional JSON body and decode the JSON reply
    async fn send_json(&self, method: HttpMethod, url: &str, body: Option<Value>) -> Result<Value>;

    /// Download raw bytes (album art)
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

/// [`HttpTransport`] backed by a shared `reqwest::Client`
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with the default request timeout
    pub fn new() -> Result<Self> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    /// Create a transport whose requests give up after `timeout`
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

fn map_send_error(e: reqwest::Error) -> HueError {
    if e.is_timeout() {
        HueError::Timeout
    } else {
        HueError::Network(e)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send_json(&self, method: HttpMethod, url: &str, body: Option<Value>) -> Result<Value> {
        let builder = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Put => self.client.put(url),
        };
        let builder = match body {
            Some(body) => {
                tracing::debug!("Sending {} {}: {}", method, url, body);
                builder.json(&body)
            }
            None => {
                tracing::debug!("Sending {} {}", method, url);
                builder
            }
        };

        let response = builder.send().await.map_err(map_send_error)?;
        let response = response.error_for_status()?;
        let text = response.text().await.map_err(map_send_error)?;
        tracing::debug!("Received from {}: {}", url, text);

        Ok(serde_json::from_str(&text)?)
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        tracing::debug!("Downloading {}", url);
        let response = self.client.get(url).send().await.map_err(map_send_error)?;
        let bytes = response.error_for_status()?.bytes().await.map_err(map_send_error)?;
        Ok(bytes.to_vec())
    }
}
