//! HTTP compute backend client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::ComputeBackend;
use crate::config::ComputeConfig;
use crate::{Error, Result};

/// Header carrying the shared API key to the compute backend
const API_KEY_HEADER: &str = "RhinoComputeKey";

/// HTTP client for the compute backend.
///
/// Two underlying clients with different timeouts: solve/describe calls may
/// legitimately run for a long time, while the health probe must fail fast
/// so an unreachable backend pivots to the wake-up path quickly.
pub struct HttpCompute {
    /// Client for solve/describe calls (long timeout)
    client: Client,
    /// Client for health probes (short timeout)
    probe_client: Client,
    /// Backend base URL without trailing slash
    base_url: String,
    /// Resolved API key, forwarded on every call
    api_key: Option<String>,
}

impl HttpCompute {
    /// Create a client from configuration
    pub fn new(config: &ComputeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build compute client: {e}")))?;

        let probe_client = Client::builder()
            .timeout(config.health_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build probe client: {e}")))?;

        Ok(Self {
            client,
            probe_client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.resolve_api_key(),
        })
    }

    /// POST a JSON body and classify the outcome: transport failure →
    /// [`Error::ComputeUnreachable`], non-2xx → [`Error::ComputeStatus`],
    /// 2xx → parsed JSON.
    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}/{path}", self.base_url);
        debug!(url = %url, "Calling compute backend");

        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::ComputeUnreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ComputeStatus {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("Compute backend returned invalid JSON: {e}")))
    }
}

#[async_trait]
impl ComputeBackend for HttpCompute {
    async fn describe(&self, body: Value) -> Result<Value> {
        self.post("io", &body).await
    }

    async fn solve(&self, body: Value) -> Result<Value> {
        self.post("grasshopper", &body).await
    }

    async fn health(&self) -> Result<String> {
        let url = format!("{}/healthcheck", self.base_url);

        let mut request = self.probe_client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::ComputeUnreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ComputeStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.text().await.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = ComputeConfig {
            url: "http://localhost:6500/".to_string(),
            ..ComputeConfig::default()
        };
        let compute = HttpCompute::new(&config).unwrap();
        assert_eq!(compute.base_url, "http://localhost:6500");
    }

    #[tokio::test]
    async fn test_unreachable_backend_classified_as_transport_failure() {
        // Reserved TEST-NET address, nothing listens there
        let config = ComputeConfig {
            url: "http://192.0.2.1:6500".to_string(),
            health_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_millis(200),
            ..ComputeConfig::default()
        };
        let compute = HttpCompute::new(&config).unwrap();

        let err = compute.health().await.unwrap_err();
        assert!(matches!(err, Error::ComputeUnreachable(_)));
    }
}
