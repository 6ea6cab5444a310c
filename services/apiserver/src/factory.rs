//! Storage factory.
//!
//! # Purpose
//! Resolves the storage backend exactly once per process from a backend name
//! and an optional YAML file, and hands every caller the same [`Storage`].
//!
//! # Key invariants
//! - The first successful call fixes the backend for the process lifetime.
//! - Asking for a different backend afterwards is a [`ConfigError`]; switching
//!   requires a restart.
//! - Unknown names, unreadable files and unreachable backends are fatal.
use crate::config::{DEFAULT_CHANGE_RETENTION_MAX_ROWS, DEFAULT_CHANGES_LIMIT, PostgresConfig};
use crate::retry::RetryConfig;
use crate::storage::{Storage, StorageSettings};
use crate::store::memory::InMemoryStore;
use crate::store::postgres::PostgresStore;
use crate::store::{ResourceStore, StoreConfig, StoreError};
use crate::watch::WatchOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;

pub const MEMORY_BACKEND: &str = "memory";
pub const POSTGRES_BACKEND: &str = "postgres";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown storage backend {0:?}")]
    UnknownBackend(String),
    #[error("read storage config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse storage config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid storage config: {0}")]
    Invalid(String),
    #[error(
        "storage already initialized with backend {existing:?}; restart to use {requested:?}"
    )]
    AlreadyInitialized { existing: String, requested: String },
    #[error("connect storage backend: {0}")]
    Connect(#[source] StoreError),
}

/// Backend YAML file. Every field is optional.
///
/// ```yaml
/// changes_limit: 1000
/// change_retention_max_rows: 10000
/// change_retention_max_age_seconds: 86400
/// registry_cache_ttl_ms: 5000
/// watch:
///   poll_interval_ms: 250
///   bookmark_interval_seconds: 60
/// retry:
///   max_attempts: 4
/// postgres:
///   url: postgres://fleetdex@db/fleetdex
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageFileConfig {
    pub changes_limit: Option<u64>,
    /// `0` disables the row bound.
    pub change_retention_max_rows: Option<i64>,
    pub change_retention_max_age_seconds: Option<u64>,
    pub registry_cache_ttl_ms: Option<u64>,
    #[serde(default)]
    pub watch: WatchFileConfig,
    #[serde(default)]
    pub retry: RetryFileConfig,
    pub postgres: Option<PostgresConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchFileConfig {
    pub poll_interval_ms: Option<u64>,
    pub buffer_capacity: Option<usize>,
    /// `0` lets sessions run until the client goes away.
    pub session_timeout_seconds: Option<u64>,
    pub bookmark_interval_seconds: Option<u64>,
    pub batch_limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryFileConfig {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

impl StorageFileConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn store_config(&self) -> Result<StoreConfig, ConfigError> {
        let changes_limit = self.changes_limit.unwrap_or(DEFAULT_CHANGES_LIMIT);
        if changes_limit == 0 {
            return Err(ConfigError::Invalid("changes_limit must be positive".to_string()));
        }
        let change_retention_max_rows = match self.change_retention_max_rows {
            None => Some(DEFAULT_CHANGE_RETENTION_MAX_ROWS),
            Some(0) => None,
            Some(rows) if rows < 0 => {
                return Err(ConfigError::Invalid(
                    "change_retention_max_rows must not be negative".to_string(),
                ));
            }
            Some(rows) => Some(rows),
        };
        Ok(StoreConfig {
            changes_limit,
            change_retention_max_rows,
            change_retention_max_age: self
                .change_retention_max_age_seconds
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        })
    }

    pub fn settings(&self) -> Result<StorageSettings, ConfigError> {
        let defaults = StorageSettings::default();
        let watch_defaults = defaults.watch;
        let retry_defaults = defaults.retry;

        let watch = WatchOptions {
            poll_interval: self
                .watch
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(watch_defaults.poll_interval),
            buffer_capacity: self
                .watch
                .buffer_capacity
                .unwrap_or(watch_defaults.buffer_capacity),
            session_timeout: match self.watch.session_timeout_seconds {
                None => watch_defaults.session_timeout,
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
            },
            bookmark_interval: self
                .watch
                .bookmark_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(watch_defaults.bookmark_interval),
            batch_limit: self.watch.batch_limit.unwrap_or(watch_defaults.batch_limit),
        };
        if watch.poll_interval.is_zero() || watch.bookmark_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "watch intervals must be positive".to_string(),
            ));
        }
        if watch.buffer_capacity == 0 || watch.batch_limit == 0 {
            return Err(ConfigError::Invalid(
                "watch buffer_capacity and batch_limit must be positive".to_string(),
            ));
        }

        let retry = RetryConfig {
            max_attempts: self.retry.max_attempts.unwrap_or(retry_defaults.max_attempts),
            initial_delay: self
                .retry
                .initial_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.initial_delay),
            max_delay: self
                .retry
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.max_delay),
            backoff_multiplier: self
                .retry
                .backoff_multiplier
                .unwrap_or(retry_defaults.backoff_multiplier),
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }
        if retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry backoff_multiplier must be at least 1".to_string(),
            ));
        }

        Ok(StorageSettings {
            registry_cache_ttl: self
                .registry_cache_ttl_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.registry_cache_ttl),
            retry,
            watch,
        })
    }
}

fn normalize(name: &str) -> Result<&'static str, ConfigError> {
    match name.trim().to_ascii_lowercase().as_str() {
        MEMORY_BACKEND => Ok(MEMORY_BACKEND),
        POSTGRES_BACKEND | "postgresql" => Ok(POSTGRES_BACKEND),
        _ => Err(ConfigError::UnknownBackend(name.to_string())),
    }
}

/// Build a fresh [`Storage`] without touching the process-wide instance.
pub async fn build_storage(name: &str, file: &StorageFileConfig) -> Result<Storage, ConfigError> {
    let backend_name = normalize(name)?;
    let store_config = file.store_config()?;
    let settings = file.settings()?;

    let storage = match backend_name {
        MEMORY_BACKEND => {
            let store = InMemoryStore::new(store_config);
            store.ensure_schema().await.map_err(ConfigError::Connect)?;
            Storage::new(Arc::new(store), settings)
        }
        _ => {
            let pg = file.postgres.as_ref().ok_or_else(|| {
                ConfigError::Invalid("postgres backend requires a `postgres` section".to_string())
            })?;
            let store = PostgresStore::connect(pg, store_config)
                .await
                .map_err(ConfigError::Connect)?;
            Storage::new(Arc::new(store), settings)
        }
    };
    tracing::info!(
        backend = storage.backend_name(),
        durable = storage.is_durable(),
        "storage backend ready"
    );
    Ok(storage)
}

struct FactoryInstance {
    backend: &'static str,
    storage: Arc<Storage>,
}

static STORAGE: OnceCell<FactoryInstance> = OnceCell::const_new();

/// The process-wide storage for `name`, created on first use.
///
/// # Errors
/// - [`ConfigError::UnknownBackend`] for names other than `memory`/`postgres`.
/// - [`ConfigError::AlreadyInitialized`] when another backend was chosen first.
/// - Read, parse and connect failures from the first initialization.
pub async fn get_storage_factory(
    name: &str,
    config_path: Option<&Path>,
) -> Result<Arc<Storage>, ConfigError> {
    let backend = normalize(name)?;
    let instance = STORAGE
        .get_or_try_init(|| async {
            let file = StorageFileConfig::load(config_path)?;
            let storage = build_storage(backend, &file).await?;
            Ok::<_, ConfigError>(FactoryInstance {
                backend,
                storage: Arc::new(storage),
            })
        })
        .await?;
    if instance.backend != backend {
        return Err(ConfigError::AlreadyInitialized {
            existing: instance.backend.to_string(),
            requested: backend.to_string(),
        });
    }
    Ok(instance.storage.clone())
}
