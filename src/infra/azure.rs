//! Azure Compute REST control plane

use std::env;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::VmControlPlane;
use crate::config::InfraConfig;
use crate::{Error, Result};

/// Azure Compute REST API version
const API_VERSION: &str = "2024-07-01";
/// Default ARM endpoint
const DEFAULT_MANAGEMENT_URL: &str = "https://management.azure.com";
/// Token scope for ARM
const TOKEN_SCOPE: &str = "https://management.azure.com/.default";
/// Refresh the cached token this long before it actually expires
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(120);

/// Error codes the infra reports when the region cannot allocate the VM.
/// These surface as a distinct "try later" error rather than a generic
/// failure.
const CAPACITY_ERROR_CODES: &[&str] = &[
    "SkuNotAvailable",
    "AllocationFailed",
    "ZonalAllocationFailed",
    "OverconstrainedAllocationRequest",
    "SpotAllocationFailed",
];

/// Azure REST client for VM power management.
///
/// Authenticates with the client-credentials flow using
/// `AZURE_TENANT_ID` / `AZURE_CLIENT_ID` / `AZURE_CLIENT_SECRET` from the
/// environment; tokens are cached until shortly before expiry.
pub struct AzureRestControlPlane {
    client: Client,
    vm_url: String,
    token: RwLock<Option<CachedToken>>,
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

impl AzureRestControlPlane {
    /// Build a control plane client from configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when subscription, resource group, or
    /// VM name is missing.
    pub fn new(config: &InfraConfig) -> Result<Self> {
        let (Some(subscription), Some(resource_group), Some(vm_name)) = (
            config.subscription_id.as_ref(),
            config.resource_group.as_ref(),
            config.vm_name.as_ref(),
        ) else {
            return Err(Error::InfraNotConfigured(
                "subscription_id, resource_group and vm_name are required".to_string(),
            ));
        };

        let management_url = config
            .management_url
            .clone()
            .unwrap_or_else(|| DEFAULT_MANAGEMENT_URL.to_string());
        let vm_url = format!(
            "{}/subscriptions/{subscription}/resourceGroups/{resource_group}\
             /providers/Microsoft.Compute/virtualMachines/{vm_name}",
            management_url.trim_end_matches('/')
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build infra client: {e}")))?;

        info!(vm = %vm_name, resource_group = %resource_group, "Infra control plane configured");

        Ok(Self {
            client,
            vm_url,
            token: RwLock::new(None),
        })
    }

    /// Get a valid bearer token, fetching a fresh one when the cached token
    /// is absent or close to expiry.
    async fn bearer_token(&self) -> Result<String> {
        if let Some(cached) = self.token.read().clone() {
            if cached.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN {
                return Ok(cached.value);
            }
        }

        let tenant = require_env("AZURE_TENANT_ID")?;
        let client_id = require_env("AZURE_CLIENT_ID")?;
        let client_secret = require_env("AZURE_CLIENT_SECRET")?;

        let token_url = format!("https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token");
        debug!(tenant = %tenant, "Requesting infra access token");

        let response = self
            .client
            .post(&token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("scope", TOKEN_SCOPE),
            ])
            .send()
            .await
            .map_err(|e| Error::Infra(format!("Token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Infra(format!("Token request returned {status}: {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Infra(format!("Invalid token response: {e}")))?;

        let cached = CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        };
        *self.token.write() = Some(cached.clone());
        Ok(cached.value)
    }

    /// Issue a control plane call and classify failures, distinguishing
    /// capacity refusals from everything else.
    async fn call(&self, method: reqwest::Method, url: &str) -> Result<Option<Value>> {
        let token = self.bearer_token().await?;

        let response = self
            .client
            .request(method, url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Infra(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if CAPACITY_ERROR_CODES.iter().any(|code| body.contains(code)) {
                return Err(Error::InfraCapacity(body));
            }
            return Err(Error::Infra(format!("{url} returned {status}: {body}")));
        }

        Ok(response.json().await.ok())
    }
}

#[async_trait]
impl VmControlPlane for AzureRestControlPlane {
    async fn instance_view(&self) -> Result<Vec<String>> {
        let url = format!("{}/instanceView?api-version={API_VERSION}", self.vm_url);
        let view = self
            .call(reqwest::Method::GET, &url)
            .await?
            .ok_or_else(|| Error::Infra("Empty instance view response".to_string()))?;

        let statuses = view["statuses"]
            .as_array()
            .map(|statuses| {
                statuses
                    .iter()
                    .filter_map(|s| s["code"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        Ok(statuses)
    }

    async fn begin_start(&self) -> Result<()> {
        info!(vm_url = %self.vm_url, "Issuing VM start");
        let url = format!("{}/start?api-version={API_VERSION}", self.vm_url);
        self.call(reqwest::Method::POST, &url).await?;
        Ok(())
    }

    async fn begin_deallocate(&self) -> Result<()> {
        info!(vm_url = %self.vm_url, "Issuing VM deallocate");
        let url = format!("{}/deallocate?api-version={API_VERSION}", self.vm_url);
        self.call(reqwest::Method::POST, &url).await?;
        Ok(())
    }
}

fn require_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| {
        Error::InfraNotConfigured(format!("{name} must be set for infra control plane access"))
    })
}
