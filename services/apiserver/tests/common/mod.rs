#![allow(dead_code)]

use apiserver::app::{AppState, build_router};
use apiserver::model::{Gvk, SyncRegistryEntry};
use apiserver::retry::RetryConfig;
use apiserver::storage::{Storage, StorageSettings};
use apiserver::store::StoreConfig;
use apiserver::store::memory::InMemoryStore;
use apiserver::watch::WatchOptions;
use std::sync::Arc;
use std::time::Duration;

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

pub fn config_maps() -> Gvk {
    Gvk::new("", "v1", "ConfigMap")
}

pub fn deployments() -> Gvk {
    Gvk::new("apps", "v1", "Deployment")
}

pub fn storage_with(store: StoreConfig) -> Arc<Storage> {
    let settings = StorageSettings {
        registry_cache_ttl: Duration::from_secs(30),
        retry: RetryConfig::with_max_attempts(2),
        watch: WatchOptions {
            poll_interval: Duration::from_millis(20),
            bookmark_interval: Duration::from_millis(200),
            ..WatchOptions::default()
        },
    };
    Arc::new(Storage::new(Arc::new(InMemoryStore::new(store)), settings))
}

/// Memory-backed storage with `ConfigMap` and `Deployment` registered for `east`.
pub async fn registered_storage(store: StoreConfig) -> Arc<Storage> {
    let storage = storage_with(store);
    for gvk in [config_maps(), deployments()] {
        storage
            .upsert_sync_entry(SyncRegistryEntry::pending("east", gvk))
            .await
            .expect("register kind");
    }
    storage
}

pub fn app(storage: Arc<Storage>) -> axum::routing::RouterIntoService<axum::body::Body, ()> {
    build_router(AppState { storage }).into_service()
}
