//! Configuration for the onboarding manager.

use std::time::Duration;

use anyhow::{Context, Result};
use onboard_reconcile::{DEFAULT_PARALLELISM, DEFAULT_RECONCILE_TIMEOUT, DEFAULT_TICKER_PERIOD};
use onboard_tinkerbell::DEFAULT_STORE_TIMEOUT;

use crate::credentials::DEFAULT_CREDENTIALS_TIMEOUT;
use crate::profile::{ProfileDefaults, ProxySettings};
use crate::template::{DEFAULT_ACTION_REGISTRY, DEFAULT_IMAGE_VERSION};

/// Onboarding manager configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace holding Hardware, Template and Workflow resources.
    pub namespace: String,

    /// Action image version used when a profile carries none.
    pub image_version: String,

    /// Registry prefix for action images.
    pub action_registry: String,

    /// Base URL of the OS artifact file server.
    pub artifact_base_url: String,

    /// Period of the full reconciliation pass.
    pub ticker_period: Duration,

    /// Upper bound on a single reconcile call.
    pub reconcile_timeout: Duration,

    /// Workers per resource kind.
    pub parallelism: usize,

    /// Timeout for each resource store call.
    pub store_timeout: Duration,

    /// Timeout for each credential provider call.
    pub credentials_timeout: Duration,

    pub proxies: ProxySettings,

    pub name_servers: Vec<String>,

    /// Keep the create-user action in rendered templates.
    pub dev_mode: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let namespace =
            std::env::var("ONBOARD_NAMESPACE").unwrap_or_else(|_| "orch-infra".to_string());

        let image_version = std::env::var("TINKER_IMAGE_VERSION")
            .unwrap_or_else(|_| DEFAULT_IMAGE_VERSION.to_string());

        let action_registry = std::env::var("TINKER_ACTION_REGISTRY")
            .unwrap_or_else(|_| DEFAULT_ACTION_REGISTRY.to_string());

        let artifact_base_url = std::env::var("ONBOARD_ARTIFACT_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1/files-edge-orch/repository".to_string());

        let ticker_period = secs_var("ONBOARD_TICKER_PERIOD_SECS")?.unwrap_or(DEFAULT_TICKER_PERIOD);
        let reconcile_timeout =
            secs_var("ONBOARD_RECONCILE_TIMEOUT_SECS")?.unwrap_or(DEFAULT_RECONCILE_TIMEOUT);
        let store_timeout = secs_var("ONBOARD_STORE_TIMEOUT_SECS")?.unwrap_or(DEFAULT_STORE_TIMEOUT);
        let credentials_timeout = secs_var("ONBOARD_CREDENTIALS_TIMEOUT_SECS")?
            .unwrap_or(DEFAULT_CREDENTIALS_TIMEOUT);

        let parallelism = match std::env::var("ONBOARD_PARALLELISM") {
            Ok(s) => s
                .parse()
                .with_context(|| format!("invalid ONBOARD_PARALLELISM: {s}"))?,
            Err(_) => DEFAULT_PARALLELISM,
        };

        let proxies = ProxySettings {
            http_proxy: std::env::var("HTTP_PROXY").unwrap_or_default(),
            https_proxy: std::env::var("HTTPS_PROXY").unwrap_or_default(),
            no_proxy: std::env::var("NO_PROXY").unwrap_or_default(),
            ftp_proxy: std::env::var("FTP_PROXY").unwrap_or_default(),
        };

        let name_servers = std::env::var("NAME_SERVERS")
            .map(|s| parse_name_servers(&s))
            .unwrap_or_default();

        let dev_mode = match std::env::var("ONBOARD_DEV_MODE") {
            Ok(s) => s
                .parse()
                .with_context(|| format!("invalid ONBOARD_DEV_MODE: {s}"))?,
            Err(_) => false,
        };

        Ok(Self {
            namespace,
            image_version,
            action_registry,
            artifact_base_url,
            ticker_period,
            reconcile_timeout,
            parallelism,
            store_timeout,
            credentials_timeout,
            proxies,
            name_servers,
            dev_mode,
        })
    }

    /// Values every device profile inherits.
    pub fn profile_defaults(&self) -> ProfileDefaults {
        ProfileDefaults {
            tinker_version: self.image_version.clone(),
            dev_mode: self.dev_mode,
            proxies: self.proxies.clone(),
            name_servers: self.name_servers.clone(),
        }
    }
}

fn secs_var(name: &str) -> Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(s) => {
            let secs: u64 = s.parse().with_context(|| format!("invalid {name}: {s}"))?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}

fn parse_name_servers(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_servers() {
        assert_eq!(
            parse_name_servers(" 1.1.1.1  8.8.8.8 "),
            vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()]
        );
        assert!(parse_name_servers("").is_empty());
    }

    #[test]
    fn test_profile_defaults() {
        let config = Config {
            namespace: "ns".to_string(),
            image_version: "v2.0.0".to_string(),
            action_registry: DEFAULT_ACTION_REGISTRY.to_string(),
            artifact_base_url: String::new(),
            ticker_period: DEFAULT_TICKER_PERIOD,
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
            parallelism: 1,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            credentials_timeout: DEFAULT_CREDENTIALS_TIMEOUT,
            proxies: ProxySettings::default(),
            name_servers: vec!["1.1.1.1".to_string()],
            dev_mode: true,
        };

        let defaults = config.profile_defaults();
        assert_eq!(defaults.tinker_version, "v2.0.0");
        assert!(defaults.dev_mode);
        assert_eq!(defaults.name_servers, config.name_servers);
    }
}
