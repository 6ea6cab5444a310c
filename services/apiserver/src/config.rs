use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_CHANGES_LIMIT: u64 = 1000;
pub const DEFAULT_CHANGE_RETENTION_MAX_ROWS: i64 = 10_000;

// API server configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    /// Storage backend name handed to the storage factory.
    pub storage_backend: String,
    /// Backend-specific YAML file; may be absent for `memory`.
    pub storage_config: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ApiServerConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    storage_backend: Option<String>,
    storage_config: Option<PathBuf>,
}

/// Connection settings for the Postgres backend.
#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl ApiServerConfig {
    pub fn from_env() -> Result<Self> {
        let metrics_bind = std::env::var("FLEETDEX_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:9090".to_string())
            .parse()
            .with_context(|| "parse FLEETDEX_METRICS_BIND")?;
        let bind_addr = std::env::var("FLEETDEX_BIND")
            .unwrap_or_else(|_| "0.0.0.0:8443".to_string())
            .parse()
            .with_context(|| "parse FLEETDEX_BIND")?;
        let storage_backend =
            std::env::var("FLEETDEX_STORAGE").unwrap_or_else(|_| "memory".to_string());
        let storage_config = std::env::var("FLEETDEX_STORAGE_CONFIG")
            .ok()
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);
        Ok(Self {
            bind_addr,
            metrics_bind,
            storage_backend,
            storage_config,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("FLEETDEX_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read FLEETDEX_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: ApiServerConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse api server config yaml")?;
        if let Some(value) = override_cfg.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.storage_backend {
            self.storage_backend = value;
        }
        if let Some(value) = override_cfg.storage_config {
            self.storage_config = Some(value);
        }
        Ok(())
    }
}
