use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{bail, Context, Result};
use shared::protocol::GENERAL_POOL;
use crate::store::translate::ReplicationMode;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub environment: String,
    #[serde(default = "default_pool")]
    pub pool: String,
    #[serde(default = "default_location")]
    pub location: String,
    /// Random when unset
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_true")]
    pub dynamic_enabled: bool,
    /// Expiration for announcements that don't carry their own
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
    /// Per-datacenter name standing in for the general pool
    #[serde(default = "default_pool")]
    pub map_target: String,
    #[serde(default)]
    pub replication_mode: ReplicationMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_replication_interval")]
    pub replication_interval_secs: u64,
    #[serde(default = "default_remote_timeout")]
    pub remote_timeout_ms: u64,
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// URI this node announces itself under; derived from the hostname when unset
    pub advertise_uri: Option<String>,
    /// Discovery URIs to replicate from before any peer has been announced
    #[serde(default)]
    pub seeds: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_pool() -> String {
    GENERAL_POOL.to_string()
}

fn default_location() -> String {
    "/".to_string()
}

fn default_max_age() -> u64 {
    90
}

fn default_replication_interval() -> u64 {
    60
}

fn default_remote_timeout() -> u64 {
    5000
}

fn default_maintenance_interval() -> u64 {
    60
}

fn default_update_interval() -> u64 {
    10
}

fn default_listen() -> String {
    "0.0.0.0:4111".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            dynamic_enabled: true,
            max_age_secs: default_max_age(),
            map_target: default_pool(),
            replication_mode: ReplicationMode::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            replication_interval_secs: default_replication_interval(),
            remote_timeout_ms: default_remote_timeout(),
            maintenance_interval_secs: default_maintenance_interval(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            update_interval_secs: default_update_interval(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            advertise_uri: None,
            seeds: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl StoreConfig {
    pub fn replication_interval(&self) -> Duration {
        Duration::from_secs(self.replication_interval_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

impl AuthConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.node.environment.is_empty() {
            bail!("node.environment must not be empty");
        }
        if self.discovery.map_target.is_empty() {
            bail!("discovery.map_target must not be empty");
        }
        if self.discovery.max_age_secs == 0 {
            bail!("discovery.max_age_secs must be positive");
        }
        if self.store.replication_interval_secs == 0 {
            bail!("store.replication_interval_secs must be positive");
        }
        if self.store.maintenance_interval_secs == 0 {
            bail!("store.maintenance_interval_secs must be positive");
        }
        if self.auth.update_interval_secs == 0 {
            bail!("auth.update_interval_secs must be positive");
        }
        Ok(())
    }
}
