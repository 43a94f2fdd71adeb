//! gridpool.toml configuration parser.
//!
//! The file carries everything the daemon needs: backend endpoint and
//! project, the zone set and retryable error codes for zonal failover,
//! search bounds, provisioning defaults and the operation timing bounds.
//! Optional fields fall back to the library defaults.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use gridpool_acquire::AcquireSettings;
use gridpool_ops::ZonalRetryPolicy;
use gridpool_provision::ProvisionSettings;
use gridpool_search::SearchSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub backend: BackendConfig,
    pub pool: PoolConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub project: String,
    /// Environment variable holding the API bearer token.
    #[serde(default)]
    pub token_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Zones instance creation may land in.
    pub zones: Vec<String>,
    /// Operation error codes that justify a zonal re-attempt.
    #[serde(default = "default_retryable_codes")]
    pub zonal_retryable_codes: Vec<String>,
    /// Bounded attempts in the reuse-running strategy.
    #[serde(default = "default_reuse_attempts")]
    pub reuse_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub max_in_search: Option<u32>,
    #[serde(default)]
    pub default_image_filter: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub machine_type: Option<String>,
    #[serde(default)]
    pub service_account: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub boot_disk_size_gb: Option<u64>,
    #[serde(default)]
    pub boot_disk_type: Option<String>,
    #[serde(default)]
    pub image_private_label_keys: Option<Vec<String>>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub update_secs: Option<u64>,
    #[serde(default)]
    pub create_secs: Option<u64>,
    #[serde(default)]
    pub start_secs: Option<u64>,
    #[serde(default)]
    pub delete_secs: Option<u64>,
}

fn default_retryable_codes() -> Vec<String> {
    vec![
        "ZONE_RESOURCE_POOL_EXHAUSTED".to_string(),
        "ZONE_RESOURCE_POOL_EXHAUSTED_WITH_DETAILS".to_string(),
        "QUOTA_EXCEEDED".to_string(),
    ]
}

fn default_reuse_attempts() -> u32 {
    5
}

fn default_port() -> u16 {
    8080
}

impl Settings {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Bearer token resolved from the configured environment variable.
    pub fn backend_token(&self) -> Option<String> {
        self.backend
            .token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
    }

    pub fn retry_policy(&self) -> ZonalRetryPolicy {
        ZonalRetryPolicy {
            zones: self.pool.zones.clone(),
            retryable_codes: self
                .pool
                .zonal_retryable_codes
                .iter()
                .cloned()
                .collect::<HashSet<_>>(),
        }
    }

    pub fn search_settings(&self) -> SearchSettings {
        let mut settings = SearchSettings::default();
        if let Some(platform) = &self.search.platform {
            settings.platform = platform.clone();
        }
        if let Some(max) = self.search.max_in_search {
            settings.max_in_search = max;
        }
        if let Some(filter) = &self.search.default_image_filter
            && !filter.is_empty()
        {
            settings.default_image_filter = Some(filter.clone());
        }
        settings
    }

    pub fn provision_settings(&self) -> ProvisionSettings {
        let mut settings = ProvisionSettings::default();
        if let Some(machine_type) = &self.defaults.machine_type {
            settings.default_machine_type = machine_type.clone();
        }
        if let Some(account) = &self.defaults.service_account
            && !account.is_empty()
        {
            settings.default_service_account = Some(account.clone());
        }
        if let Some(network) = &self.defaults.network {
            settings.network = network.clone();
        }
        if let Some(size) = self.defaults.boot_disk_size_gb {
            settings.boot_disk_size_gb = size;
        }
        if let Some(disk_type) = &self.defaults.boot_disk_type {
            settings.boot_disk_type = disk_type.clone();
        }
        if let Some(keys) = &self.defaults.image_private_label_keys {
            settings.image_private_label_keys = keys.iter().cloned().collect();
        }
        settings.default_labels.extend(
            self.defaults
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        settings.default_metadata.extend(
            self.defaults
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        if let Some(secs) = self.timeouts.poll_interval_secs {
            settings.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.timeouts.update_secs {
            settings.update_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.timeouts.create_secs {
            settings.create_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.timeouts.start_secs {
            settings.start_timeout = Duration::from_secs(secs);
        }
        settings
    }

    pub fn acquire_settings(&self) -> AcquireSettings {
        let mut settings = AcquireSettings::default();
        settings.reuse_attempts = self.pool.reuse_attempts;
        if let Some(secs) = self.timeouts.poll_interval_secs {
            settings.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.timeouts.update_secs {
            settings.lock_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.timeouts.delete_secs {
            settings.delete_timeout = Duration::from_secs(secs);
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [backend]
        base_url = "https://compute.example.com/v1"
        project = "browser-grids"

        [pool]
        zones = ["zone-a", "zone-b"]
    "#;

    #[test]
    fn minimal_config_fills_defaults() {
        let settings: Settings = toml::from_str(MINIMAL).unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.pool.reuse_attempts, 5);
        assert!(
            settings
                .pool
                .zonal_retryable_codes
                .contains(&"ZONE_RESOURCE_POOL_EXHAUSTED".to_string())
        );

        let retry = settings.retry_policy();
        assert_eq!(retry.zones, vec!["zone-a", "zone-b"]);

        let provision = settings.provision_settings();
        assert_eq!(provision.default_machine_type, "n1-standard-4");
        assert_eq!(provision.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn overrides_reach_the_component_settings() {
        let full = r#"
            [backend]
            base_url = "https://compute.example.com/v1"
            project = "browser-grids"
            token_env = "GRIDPOOL_TOKEN"

            [pool]
            zones = ["zone-a", "zone-b", "zone-c"]
            zonal_retryable_codes = ["QUOTA_EXCEEDED"]
            reuse_attempts = 3

            [server]
            port = 9090

            [search]
            platform = "screenshot-grid"
            max_in_search = 25

            [defaults]
            machine_type = "n2-standard-8"
            boot_disk_size_gb = 200

            [defaults.labels]
            pool = "canary"

            [timeouts]
            poll_interval_secs = 1
            create_secs = 120
        "#;
        let settings: Settings = toml::from_str(full).unwrap();
        assert_eq!(settings.server.port, 9090);

        let search = settings.search_settings();
        assert_eq!(search.platform, "screenshot-grid");
        assert_eq!(search.max_in_search, 25);

        let provision = settings.provision_settings();
        assert_eq!(provision.default_machine_type, "n2-standard-8");
        assert_eq!(provision.boot_disk_size_gb, 200);
        assert_eq!(
            provision.default_labels.get("pool").map(String::as_str),
            Some("canary")
        );
        assert_eq!(provision.create_timeout, Duration::from_secs(120));

        let acquire = settings.acquire_settings();
        assert_eq!(acquire.reuse_attempts, 3);
        assert_eq!(acquire.poll_interval, Duration::from_secs(1));
    }
}
