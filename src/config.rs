//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Compute backend configuration
    pub compute: ComputeConfig,
    /// Definition registry configuration
    pub registry: RegistryConfig,
    /// Idle shutdown policy configuration
    pub idle: IdleConfig,
    /// Infra control plane configuration (optional)
    pub infra: InfraConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Include error chains in client-facing error responses.
    /// Keep off in production; stacks leak internal detail.
    pub expose_error_detail: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            expose_error_detail: false,
        }
    }
}

/// Compute backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    /// Base URL of the compute backend
    pub url: String,
    /// API key forwarded in the `RhinoComputeKey` header.
    /// Supports `env:VAR_NAME` indirection.
    pub api_key: Option<String>,
    /// Timeout for solve/describe calls. Long on purpose: a slow solve must
    /// not be misread as a dead backend and trigger the wake path.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Timeout for health probes. Short on purpose: fail fast toward wake-up.
    #[serde(with = "humantime_serde")]
    pub health_timeout: Duration,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6500".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(3600),
            health_timeout: Duration::from_secs(2),
        }
    }
}

impl ComputeConfig {
    /// Resolve the API key (expand `env:VAR_NAME` references)
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.as_ref().map(|key| {
            if let Some(var_name) = key.strip_prefix("env:") {
                env::var(var_name).unwrap_or_else(|_| key.clone())
            } else {
                key.clone()
            }
        })
    }
}

/// Definition registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory scanned for definition files
    pub directory: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            directory: "definitions".to_string(),
        }
    }
}

/// Idle shutdown policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    /// Enable the periodic idle check
    pub enabled: bool,
    /// How often the background task checks for idleness
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
    /// Deallocate the backend VM after this much inactivity
    #[serde(with = "humantime_serde")]
    pub threshold: Duration,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: Duration::from_secs(60),
            threshold: Duration::from_secs(30 * 60),
        }
    }
}

/// Infra control plane configuration.
///
/// All three identifiers must be present for VM power management to be
/// available; otherwise wake-up and idle-shutdown degrade to probe-only
/// behavior and report a configuration error when asked to act.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InfraConfig {
    /// Subscription identifier
    pub subscription_id: Option<String>,
    /// Resource group containing the backend VM
    pub resource_group: Option<String>,
    /// Backend VM name
    pub vm_name: Option<String>,
    /// Management endpoint override (defaults to the public Azure endpoint)
    pub management_url: Option<String>,
}

impl InfraConfig {
    /// Whether enough configuration is present to build a control plane client
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.subscription_id.is_some() && self.resource_group.is_some() && self.vm_name.is_some()
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Environment overrides, e.g. COMPUTE_GATEWAY_COMPUTE__URL
        figment = figment.merge(Env::prefixed("COMPUTE_GATEWAY_").split("__"));

        figment.extract().map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.compute.health_timeout, Duration::from_secs(2));
        assert_eq!(config.idle.threshold, Duration::from_secs(1800));
        assert!(!config.infra.is_configured());
    }

    #[test]
    fn test_api_key_resolution() {
        let literal = ComputeConfig {
            api_key: Some("literal-key".to_string()),
            ..ComputeConfig::default()
        };
        assert_eq!(literal.resolve_api_key().as_deref(), Some("literal-key"));

        // Unset env var falls back to the raw reference
        let missing = ComputeConfig {
            api_key: Some("env:COMPUTE_GATEWAY_TEST_UNSET_KEY".to_string()),
            ..ComputeConfig::default()
        };
        assert_eq!(
            missing.resolve_api_key().as_deref(),
            Some("env:COMPUTE_GATEWAY_TEST_UNSET_KEY")
        );

        let none = ComputeConfig::default();
        assert_eq!(none.resolve_api_key(), None);
    }

    #[test]
    fn test_infra_requires_all_identifiers() {
        let partial = InfraConfig {
            subscription_id: Some("sub".to_string()),
            resource_group: Some("rg".to_string()),
            vm_name: None,
            management_url: None,
        };
        assert!(!partial.is_configured());

        let full = InfraConfig {
            subscription_id: Some("sub".to_string()),
            resource_group: Some("rg".to_string()),
            vm_name: Some("vm".to_string()),
            management_url: None,
        };
        assert!(full.is_configured());
    }
}
