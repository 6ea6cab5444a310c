//! Resource-serving facade shared by every request handler.
//!
//! # Purpose
//! [`Storage`] owns the process-wide backend and wraps each call with:
//! - the synchronization gate: a kind that is not registered for the cluster
//!   fails fast with [`StoreError::KindNotSynchronized`]
//! - bounded retries of [`StoreError::BackendUnavailable`]
//! - watch session startup with the configured [`WatchOptions`]
//!
//! Registry writes pass through the read cache so this process sees its own
//! writes immediately.
use crate::model::{
    ClusterSyncResources, Gvk, KindSelector, Patch, ResourceKey, ResourceRecord, SyncRegistryEntry,
};
use crate::query::QuerySpec;
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::store::{ListPage, StorageBackend, StoreError, StoreResult};
use crate::sync::{DeclarationOutcome, SyncRegistryCache, apply_declaration};
use crate::version::ResourceVersion;
use crate::watch::{self, WatchOptions, WatchRequest, WatchSession};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub registry_cache_ttl: Duration,
    pub retry: RetryConfig,
    pub watch: WatchOptions,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            registry_cache_ttl: Duration::from_secs(5),
            retry: RetryConfig::default(),
            watch: WatchOptions::default(),
        }
    }
}

pub struct Storage {
    backend: Arc<dyn StorageBackend>,
    registry: SyncRegistryCache,
    settings: StorageSettings,
}

impl Storage {
    pub fn new<B>(backend: Arc<B>, settings: StorageSettings) -> Self
    where
        B: StorageBackend + 'static,
    {
        let registry = SyncRegistryCache::new(backend.clone(), settings.registry_cache_ttl);
        Self {
            backend,
            registry,
            settings,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    pub fn is_durable(&self) -> bool {
        self.backend.is_durable()
    }

    pub fn settings(&self) -> &StorageSettings {
        &self.settings
    }

    pub async fn health(&self) -> StoreResult<()> {
        self.backend.health_check().await
    }

    /// Fails with `KindNotSynchronized` unless the registry knows the kind.
    pub async fn ensure_synchronized(&self, kind: &KindSelector) -> StoreResult<()> {
        let entry = retry_with_backoff(&self.settings.retry, "sync_registry.get", || {
            self.registry.get(&kind.cluster, &kind.gvk)
        })
        .await?;
        match entry {
            Some(_) => Ok(()),
            None => {
                metrics::counter!("fleetdex_kind_not_synchronized_total").increment(1);
                Err(StoreError::KindNotSynchronized {
                    cluster: kind.cluster.clone(),
                    gvk: kind.gvk.clone(),
                })
            }
        }
    }

    pub async fn get(&self, key: &ResourceKey) -> StoreResult<ResourceRecord> {
        self.ensure_synchronized(&key.selector()).await?;
        retry_with_backoff(&self.settings.retry, "resource.get", || self.backend.get(key)).await
    }

    pub async fn list(&self, kind: &KindSelector, query: &QuerySpec) -> StoreResult<ListPage> {
        self.ensure_synchronized(kind).await?;
        retry_with_backoff(&self.settings.retry, "resource.list", || {
            self.backend.list(kind, query)
        })
        .await
    }

    pub async fn create(&self, key: &ResourceKey, object: Value) -> StoreResult<ResourceRecord> {
        self.ensure_synchronized(&key.selector()).await?;
        retry_with_backoff(&self.settings.retry, "resource.create", || {
            self.backend.create(key, object.clone())
        })
        .await
    }

    pub async fn update(&self, key: &ResourceKey, object: Value) -> StoreResult<ResourceRecord> {
        self.ensure_synchronized(&key.selector()).await?;
        retry_with_backoff(&self.settings.retry, "resource.update", || {
            self.backend.update(key, object.clone())
        })
        .await
    }

    pub async fn delete(
        &self,
        key: &ResourceKey,
        precondition: Option<ResourceVersion>,
    ) -> StoreResult<ResourceRecord> {
        self.ensure_synchronized(&key.selector()).await?;
        retry_with_backoff(&self.settings.retry, "resource.delete", || {
            self.backend.delete(key, precondition)
        })
        .await
    }

    pub async fn patch(&self, key: &ResourceKey, patch: &Patch) -> StoreResult<ResourceRecord> {
        self.ensure_synchronized(&key.selector()).await?;
        retry_with_backoff(&self.settings.retry, "resource.patch", || {
            self.backend.patch(key, patch)
        })
        .await
    }

    /// Open a watch session. Errors after startup arrive through the session.
    pub async fn watch(&self, request: WatchRequest) -> StoreResult<WatchSession> {
        self.ensure_synchronized(&request.kind).await?;
        Ok(watch::start(
            self.backend.clone(),
            request,
            &self.settings.watch,
        ))
    }

    pub async fn sync_entries(&self, cluster: &str) -> StoreResult<Vec<SyncRegistryEntry>> {
        retry_with_backoff(&self.settings.retry, "sync_registry.list", || {
            self.registry.list_by_cluster(cluster)
        })
        .await
    }

    pub async fn sync_entry(
        &self,
        cluster: &str,
        gvk: &Gvk,
    ) -> StoreResult<Option<SyncRegistryEntry>> {
        self.registry.get(cluster, gvk).await
    }

    pub async fn upsert_sync_entry(&self, entry: SyncRegistryEntry) -> StoreResult<SyncRegistryEntry> {
        self.registry.upsert(entry).await
    }

    pub async fn remove_sync_entry(&self, cluster: &str, gvk: &Gvk) -> StoreResult<()> {
        self.registry.remove(cluster, gvk).await
    }

    pub async fn remove_cluster(&self, cluster: &str) -> StoreResult<usize> {
        self.registry.remove_cluster(cluster).await
    }

    pub async fn apply_declaration(
        &self,
        declaration: &ClusterSyncResources,
    ) -> StoreResult<DeclarationOutcome> {
        apply_declaration(&self.registry, declaration).await
    }
}
