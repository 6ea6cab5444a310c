use crate::model::{Gvk, SyncRegistryEntry};
use crate::store::{StoreResult, SyncRegistryStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

type CacheKey = (String, Gvk);

struct CacheEntry {
    // `None` caches "not registered" so unknown kinds also fail fast.
    value: Option<SyncRegistryEntry>,
    expires_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    // Bumped by every write through the cache. A read that started before a
    // write does not fill the cache with what it saw.
    generation: u64,
}

/// Read-through TTL cache over a [`SyncRegistryStore`].
///
/// Writes made through the cache go to the backend first and then refresh
/// the cached slot. Writes made by other processes become visible once the
/// slot expires.
pub struct SyncRegistryCache {
    backend: Arc<dyn SyncRegistryStore>,
    ttl: Duration,
    inner: RwLock<CacheState>,
    max_entries: usize,
}

impl SyncRegistryCache {
    pub fn new(backend: Arc<dyn SyncRegistryStore>, ttl: Duration) -> Self {
        Self::with_capacity(backend, ttl, 4096)
    }

    pub fn with_capacity(
        backend: Arc<dyn SyncRegistryStore>,
        ttl: Duration,
        max_entries: usize,
    ) -> Self {
        Self {
            backend,
            ttl,
            inner: RwLock::new(CacheState::default()),
            max_entries: max_entries.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, cluster: &str, gvk: &Gvk) -> StoreResult<Option<SyncRegistryEntry>> {
        let key = (cluster.to_string(), gvk.clone());
        let generation = {
            let guard = self.inner.read().await;
            if let Some(entry) = guard.entries.get(&key)
                && Instant::now() < entry.expires_at
            {
                metrics::counter!("fleetdex_sync_registry_cache_total", "result" => "hit")
                    .increment(1);
                return Ok(entry.value.clone());
            }
            guard.generation
        };
        metrics::counter!("fleetdex_sync_registry_cache_total", "result" => "miss").increment(1);

        // No lock is held while the backend is consulted.
        let value = self.backend.get_sync_entry(cluster, gvk).await?;
        let mut guard = self.inner.write().await;
        if guard.generation == generation {
            self.insert(&mut guard, key, value.clone());
        }
        Ok(value)
    }

    /// Always served by the backend.
    pub async fn list_by_cluster(&self, cluster: &str) -> StoreResult<Vec<SyncRegistryEntry>> {
        self.backend.list_sync_entries(cluster).await
    }

    pub async fn upsert(&self, entry: SyncRegistryEntry) -> StoreResult<SyncRegistryEntry> {
        let stored = self.backend.upsert_sync_entry(entry).await?;
        let key = (stored.cluster.clone(), stored.gvk.clone());
        let mut guard = self.inner.write().await;
        guard.generation += 1;
        self.insert(&mut guard, key, Some(stored.clone()));
        Ok(stored)
    }

    pub async fn remove(&self, cluster: &str, gvk: &Gvk) -> StoreResult<()> {
        let result = self.backend.remove_sync_entry(cluster, gvk).await;
        self.invalidate(cluster, gvk).await;
        result
    }

    pub async fn remove_cluster(&self, cluster: &str) -> StoreResult<usize> {
        let result = self.backend.remove_cluster(cluster).await;
        let mut guard = self.inner.write().await;
        guard.generation += 1;
        guard
            .entries
            .retain(|(entry_cluster, _), _| entry_cluster != cluster);
        result
    }

    pub async fn invalidate(&self, cluster: &str, gvk: &Gvk) {
        let mut guard = self.inner.write().await;
        guard.generation += 1;
        guard.entries.remove(&(cluster.to_string(), gvk.clone()));
    }

    fn insert(&self, state: &mut CacheState, key: CacheKey, value: Option<SyncRegistryEntry>) {
        let now = Instant::now();
        let entries = &mut state.entries;
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + self.ttl,
            },
        );
        if entries.len() > self.max_entries {
            entries.retain(|_, entry| entry.expires_at > now);
            while entries.len() > self.max_entries {
                match entries.keys().next().cloned() {
                    Some(victim) => {
                        entries.remove(&victim);
                    }
                    None => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SyncStatus;
    use crate::store::StoreConfig;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;

    /// Answers registry reads with what it saw `delay` earlier.
    struct LaggingRegistry {
        inner: InMemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl SyncRegistryStore for LaggingRegistry {
        async fn upsert_sync_entry(
            &self,
            entry: SyncRegistryEntry,
        ) -> StoreResult<SyncRegistryEntry> {
            self.inner.upsert_sync_entry(entry).await
        }
        async fn remove_sync_entry(&self, cluster: &str, gvk: &Gvk) -> StoreResult<()> {
            self.inner.remove_sync_entry(cluster, gvk).await
        }
        async fn get_sync_entry(
            &self,
            cluster: &str,
            gvk: &Gvk,
        ) -> StoreResult<Option<SyncRegistryEntry>> {
            let seen = self.inner.get_sync_entry(cluster, gvk).await?;
            tokio::time::sleep(self.delay).await;
            Ok(seen)
        }
        async fn list_sync_entries(&self, cluster: &str) -> StoreResult<Vec<SyncRegistryEntry>> {
            self.inner.list_sync_entries(cluster).await
        }
        async fn remove_cluster(&self, cluster: &str) -> StoreResult<usize> {
            self.inner.remove_cluster(cluster).await
        }
    }

    fn deployments() -> Gvk {
        Gvk::new("apps", "v1", "Deployment")
    }

    fn setup(ttl: Duration) -> (Arc<InMemoryStore>, SyncRegistryCache) {
        let backend = Arc::new(InMemoryStore::new(StoreConfig::default()));
        let cache = SyncRegistryCache::new(backend.clone(), ttl);
        (backend, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn serves_stale_entries_until_ttl() {
        let (backend, cache) = setup(Duration::from_secs(5));
        backend
            .upsert_sync_entry(SyncRegistryEntry::pending("east", deployments()))
            .await
            .expect("upsert");
        let first = cache.get("east", &deployments()).await.expect("get");
        assert_eq!(first.map(|e| e.status), Some(SyncStatus::Pending));

        // A worker flips the status behind the cache's back.
        let mut synced = SyncRegistryEntry::pending("east", deployments());
        synced.status = SyncStatus::Synced;
        backend.upsert_sync_entry(synced).await.expect("upsert");

        let stale = cache.get("east", &deployments()).await.expect("get");
        assert_eq!(stale.map(|e| e.status), Some(SyncStatus::Pending));

        tokio::time::advance(Duration::from_secs(6)).await;
        let fresh = cache.get("east", &deployments()).await.expect("get");
        assert_eq!(fresh.map(|e| e.status), Some(SyncStatus::Synced));
    }

    #[tokio::test(start_paused = true)]
    async fn caches_missing_entries() {
        let (backend, cache) = setup(Duration::from_secs(5));
        assert!(cache.get("east", &deployments()).await.expect("get").is_none());

        backend
            .upsert_sync_entry(SyncRegistryEntry::pending("east", deployments()))
            .await
            .expect("upsert");
        assert!(cache.get("east", &deployments()).await.expect("get").is_none());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get("east", &deployments()).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn writes_through_refresh_the_cache() {
        let (backend, cache) = setup(Duration::from_secs(60));
        assert!(cache.get("east", &deployments()).await.expect("get").is_none());

        cache
            .upsert(SyncRegistryEntry::pending("east", deployments()))
            .await
            .expect("upsert");
        assert!(cache.get("east", &deployments()).await.expect("get").is_some());
        assert!(
            backend
                .get_sync_entry("east", &deployments())
                .await
                .expect("backend")
                .is_some()
        );

        cache.remove("east", &deployments()).await.expect("remove");
        assert!(cache.get("east", &deployments()).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn remove_cluster_drops_cached_slots() {
        let (_backend, cache) = setup(Duration::from_secs(60));
        cache
            .upsert(SyncRegistryEntry::pending("east", deployments()))
            .await
            .expect("upsert");
        cache
            .upsert(SyncRegistryEntry::pending("west", deployments()))
            .await
            .expect("upsert");

        assert_eq!(cache.remove_cluster("east").await.expect("remove"), 1);
        assert!(cache.get("east", &deployments()).await.expect("get").is_none());
        assert!(cache.get("west", &deployments()).await.expect("get").is_some());
        assert_eq!(cache.list_by_cluster("west").await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn capacity_bounds_the_map() {
        let backend = Arc::new(InMemoryStore::new(StoreConfig::default()));
        let cache = SyncRegistryCache::with_capacity(backend, Duration::from_secs(60), 2);
        for kind in ["A", "B", "C"] {
            cache
                .get("east", &Gvk::new("x", "v1", kind))
                .await
                .expect("get");
        }
        assert_eq!(cache.inner.read().await.entries.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_miss_does_not_hide_a_concurrent_write() {
        let backend = Arc::new(LaggingRegistry {
            inner: InMemoryStore::new(StoreConfig::default()),
            delay: Duration::from_millis(100),
        });
        let cache = SyncRegistryCache::new(backend, Duration::from_secs(60));

        let gvr = deployments();
        let (read, write) = tokio::join!(cache.get("east", &gvr), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cache
                .upsert(SyncRegistryEntry::pending("east", deployments()))
                .await
        });
        assert!(read.expect("read").is_none());
        write.expect("upsert");

        let after = cache.get("east", &deployments()).await.expect("get");
        assert_eq!(after.map(|e| e.status), Some(SyncStatus::Pending));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_miss_does_not_resurrect_a_removed_entry() {
        let backend = Arc::new(LaggingRegistry {
            inner: InMemoryStore::new(StoreConfig::default()),
            delay: Duration::from_millis(100),
        });
        backend
            .inner
            .upsert_sync_entry(SyncRegistryEntry::pending("east", deployments()))
            .await
            .expect("seed");
        let cache = SyncRegistryCache::new(backend, Duration::from_secs(60));

        let gvr = deployments();
        let (read, removed) = tokio::join!(cache.get("east", &gvr), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cache.remove("east", &deployments()).await
        });
        assert!(read.expect("read").is_some());
        removed.expect("remove");

        assert!(cache.get("east", &deployments()).await.expect("get").is_none());
    }
}
