//! In-memory resource store.
//!
//! # Purpose
//! Implements [`ResourceStore`] and [`SyncRegistryStore`] entirely in memory.
//! It exists for:
//! - local development and tests (no external dependencies)
//! - deployments where durability is not required
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - Each GVK lives in its own partition behind a `tokio::sync::RwLock`.
//!   Version allocation, the record write and the change-log append happen
//!   under that partition's write lock, so they are one atomic step.
//! - Writes to different GVKs never contend.
//!
//! # Change log
//! Each partition keeps a bounded change log (`StoreConfig::change_window`,
//! optionally also bounded by age). Evicted entries raise the partition's
//! compaction floor; `changes` and as-of lists below it fail.
//!
//! # As-of reads
//! A list at version `V` starts from current state and, for every key touched
//! after `V`, substitutes the `previous` payload of the earliest such change.
use super::{
    ChangeSet, ListPage, ResourceStore, StoreConfig, StoreError, StoreResult, SyncRegistryStore,
};
use crate::model::{
    Change, ChangeOp, Gvk, KindSelector, Patch, ResourceKey, ResourceRecord, SyncRegistryEntry,
    apply_patch, declared_version, prepare_object,
};
use crate::query::{QuerySpec, ReadAt, paginate};
use crate::version::{ResourceVersion, VersionAllocator};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

type Identity = (String, String, String);

/// Bounded, append-only log of one GVK's changes.
///
/// Entries are appended in version order. When the log exceeds its capacity
/// or its oldest entry exceeds `max_age`, the oldest entries are dropped and
/// `compacted_through` advances to the last dropped version.
#[derive(Debug)]
struct ChangeLog {
    capacity: usize,
    max_age: Option<Duration>,
    items: VecDeque<(Instant, Change)>,
    compacted_through: ResourceVersion,
}

impl ChangeLog {
    fn new(capacity: usize, max_age: Option<Duration>) -> Self {
        Self {
            capacity: capacity.max(1),
            max_age,
            items: VecDeque::with_capacity(capacity.min(4096)),
            compacted_through: ResourceVersion::ZERO,
        }
    }

    fn record(&mut self, change: Change) {
        let now = Instant::now();
        self.items.push_back((now, change));
        while self.items.len() > self.capacity
            || self.max_age.is_some_and(|age| {
                self.items
                    .front()
                    .is_some_and(|(at, _)| now.duration_since(*at) > age)
            })
        {
            match self.items.pop_front() {
                Some((_, evicted)) => self.compacted_through = evicted.resource_version,
                None => break,
            }
        }
    }

    fn after(&self, since: ResourceVersion) -> impl Iterator<Item = &Change> {
        // Versions are appended in order, so everything past the partition point qualifies.
        let start = self
            .items
            .partition_point(|(_, change)| change.resource_version <= since);
        self.items.range(start..).map(|(_, change)| change)
    }
}

#[derive(Debug)]
struct KindPartition {
    records: BTreeMap<Identity, ResourceRecord>,
    versions: VersionAllocator,
    changes: ChangeLog,
}

impl KindPartition {
    fn cluster_records<'a>(&'a self, cluster: &'a str) -> impl Iterator<Item = &'a ResourceRecord> {
        self.records
            .range((cluster.to_string(), String::new(), String::new())..)
            .take_while(move |((c, _, _), _)| c == cluster)
            .map(|(_, record)| record)
    }

    /// State of `cluster`'s objects as of `rv`. Requires `rv >= compacted_through`.
    fn snapshot_at(&self, cluster: &str, rv: ResourceVersion) -> Vec<ResourceRecord> {
        let mut touched: HashMap<Identity, Option<&ResourceRecord>> = HashMap::new();
        for change in self.changes.after(rv) {
            if change.record.key.cluster == cluster {
                touched
                    .entry(change.record.key.identity())
                    .or_insert(change.previous.as_ref());
            }
        }
        let mut out: Vec<ResourceRecord> = self
            .cluster_records(cluster)
            .filter(|r| !touched.contains_key(&r.key.identity()))
            .cloned()
            .collect();
        out.extend(touched.into_values().flatten().cloned());
        out
    }

    fn append(&mut self, op: ChangeOp, record: ResourceRecord, previous: Option<ResourceRecord>) {
        self.changes.record(Change {
            resource_version: record.resource_version,
            op,
            record,
            previous,
        });
    }
}

/// In-memory resource store.
///
/// Partitions are created lazily on first touch and never removed; their
/// allocators must survive even when every object of the kind is deleted.
pub struct InMemoryStore {
    config: StoreConfig,
    partitions: RwLock<HashMap<Gvk, Arc<RwLock<KindPartition>>>>,
    sync_entries: RwLock<HashMap<(String, Gvk), SyncRegistryEntry>>,
}

impl InMemoryStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            partitions: RwLock::new(HashMap::new()),
            sync_entries: RwLock::new(HashMap::new()),
        }
    }

    async fn partition(&self, gvk: &Gvk) -> Arc<RwLock<KindPartition>> {
        if let Some(existing) = self.partitions.read().await.get(gvk) {
            return existing.clone();
        }
        let mut partitions = self.partitions.write().await;
        partitions
            .entry(gvk.clone())
            .or_insert_with(|| {
                Arc::new(RwLock::new(KindPartition {
                    records: BTreeMap::new(),
                    versions: VersionAllocator::new(),
                    changes: ChangeLog::new(
                        self.config.change_window(),
                        self.config.change_retention_max_age,
                    ),
                }))
            })
            .clone()
    }

    fn observe_write(gvk: &Gvk, op: ChangeOp, total: usize) {
        metrics::counter!("fleetdex_resource_changes_total", "backend" => "memory", "op" => op.as_str())
            .increment(1);
        metrics::gauge!("fleetdex_resources_total", "backend" => "memory", "kind" => gvk.kind.clone())
            .set(total as f64);
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn ensure_schema(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get(&self, key: &ResourceKey) -> StoreResult<ResourceRecord> {
        let partition = self.partition(&key.gvk).await;
        let guard = partition.read().await;
        guard
            .records
            .get(&key.identity())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn list(&self, kind: &KindSelector, query: &QuerySpec) -> StoreResult<ListPage> {
        let partition = self.partition(&kind.gvk).await;
        let guard = partition.read().await;
        let newest = guard.versions.current();
        let read_at = query.resolve_read(newest, guard.changes.compacted_through)?;
        let candidates: Vec<ResourceRecord> = match read_at {
            ReadAt::Latest => guard
                .cluster_records(&kind.cluster)
                .filter(|r| query.matches(r))
                .cloned()
                .collect(),
            ReadAt::AsOf(rv) => guard
                .snapshot_at(&kind.cluster, rv)
                .into_iter()
                .filter(|r| query.matches(r))
                .collect(),
        };
        drop(guard);
        paginate(candidates, query, read_at.list_version(newest))
    }

    async fn changes(
        &self,
        gvk: &Gvk,
        since: ResourceVersion,
        limit: usize,
    ) -> StoreResult<ChangeSet> {
        let partition = self.partition(gvk).await;
        let guard = partition.read().await;
        if since < guard.changes.compacted_through {
            return Err(StoreError::Expired(format!(
                "resourceVersion {since} of {gvk} is older than retained history ({})",
                guard.changes.compacted_through
            )));
        }
        let limit = limit.clamp(1, self.config.changes_limit.max(1) as usize);
        let items: Vec<Change> = guard.changes.after(since).take(limit).cloned().collect();
        let newest = guard.versions.current();
        let resource_version = match items.last() {
            Some(last) if items.len() == limit => last.resource_version,
            _ => newest.max(since),
        };
        Ok(ChangeSet {
            items,
            resource_version,
            more: resource_version < newest,
        })
    }

    async fn current_version(&self, gvk: &Gvk) -> StoreResult<ResourceVersion> {
        let partition = self.partition(gvk).await;
        let current = partition.read().await.versions.current();
        Ok(current)
    }

    async fn create(&self, key: &ResourceKey, object: Value) -> StoreResult<ResourceRecord> {
        if declared_version(&object)?.is_some() {
            return Err(StoreError::Invalid(
                "resourceVersion should not be set on objects to be created".to_string(),
            ));
        }
        let object = prepare_object(key, object, None)?;
        let partition = self.partition(&key.gvk).await;
        let mut guard = partition.write().await;
        if guard.records.contains_key(&key.identity()) {
            return Err(StoreError::Conflict(format!("{key} already exists")));
        }
        let rv = guard.versions.next();
        let record = ResourceRecord::new(key.clone(), object, rv, Utc::now());
        guard.records.insert(key.identity(), record.clone());
        guard.append(ChangeOp::Added, record.clone(), None);
        Self::observe_write(&key.gvk, ChangeOp::Added, guard.records.len());
        Ok(record)
    }

    async fn update(&self, key: &ResourceKey, object: Value) -> StoreResult<ResourceRecord> {
        let precondition = declared_version(&object)?;
        let partition = self.partition(&key.gvk).await;
        let mut guard = partition.write().await;
        let current = guard
            .records
            .get(&key.identity())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if let Some(expected) = precondition
            && expected != current.resource_version
        {
            return Err(StoreError::Conflict(format!(
                "{key} has resourceVersion {}, update expected {expected}",
                current.resource_version
            )));
        }
        let object = prepare_object(key, object, Some(&current.object))?;
        let rv = guard.versions.next();
        let record = ResourceRecord::new(key.clone(), object, rv, Utc::now());
        guard.records.insert(key.identity(), record.clone());
        guard.append(ChangeOp::Modified, record.clone(), Some(current));
        Self::observe_write(&key.gvk, ChangeOp::Modified, guard.records.len());
        Ok(record)
    }

    async fn delete(
        &self,
        key: &ResourceKey,
        precondition: Option<ResourceVersion>,
    ) -> StoreResult<ResourceRecord> {
        let partition = self.partition(&key.gvk).await;
        let mut guard = partition.write().await;
        let current = guard
            .records
            .get(&key.identity())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if let Some(expected) = precondition
            && expected != current.resource_version
        {
            return Err(StoreError::Conflict(format!(
                "{key} has resourceVersion {}, delete expected {expected}",
                current.resource_version
            )));
        }
        let rv = guard.versions.next();
        let tombstone = current.restamped(rv, Utc::now());
        guard.records.remove(&key.identity());
        guard.append(ChangeOp::Deleted, tombstone.clone(), Some(current));
        Self::observe_write(&key.gvk, ChangeOp::Deleted, guard.records.len());
        Ok(tombstone)
    }

    async fn patch(&self, key: &ResourceKey, patch: &Patch) -> StoreResult<ResourceRecord> {
        let partition = self.partition(&key.gvk).await;
        let mut guard = partition.write().await;
        let current = guard
            .records
            .get(&key.identity())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let patched = apply_patch(&current, patch)?;
        let object = prepare_object(key, patched, Some(&current.object))?;
        let rv = guard.versions.next();
        let record = ResourceRecord::new(key.clone(), object, rv, Utc::now());
        guard.records.insert(key.identity(), record.clone());
        guard.append(ChangeOp::Modified, record.clone(), Some(current));
        Self::observe_write(&key.gvk, ChangeOp::Modified, guard.records.len());
        Ok(record)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl SyncRegistryStore for InMemoryStore {
    async fn upsert_sync_entry(&self, mut entry: SyncRegistryEntry) -> StoreResult<SyncRegistryEntry> {
        entry.updated_at = Utc::now();
        self.sync_entries
            .write()
            .await
            .insert((entry.cluster.clone(), entry.gvk.clone()), entry.clone());
        Ok(entry)
    }

    async fn remove_sync_entry(&self, cluster: &str, gvk: &Gvk) -> StoreResult<()> {
        self.sync_entries
            .write()
            .await
            .remove(&(cluster.to_string(), gvk.clone()))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("sync entry {gvk} for cluster {cluster}")))
    }

    async fn get_sync_entry(
        &self,
        cluster: &str,
        gvk: &Gvk,
    ) -> StoreResult<Option<SyncRegistryEntry>> {
        Ok(self
            .sync_entries
            .read()
            .await
            .get(&(cluster.to_string(), gvk.clone()))
            .cloned())
    }

    async fn list_sync_entries(&self, cluster: &str) -> StoreResult<Vec<SyncRegistryEntry>> {
        let mut entries: Vec<SyncRegistryEntry> = self
            .sync_entries
            .read()
            .await
            .values()
            .filter(|e| e.cluster == cluster)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.gvk.cmp(&b.gvk));
        Ok(entries)
    }

    async fn remove_cluster(&self, cluster: &str) -> StoreResult<usize> {
        let mut entries = self.sync_entries.write().await;
        let before = entries.len();
        entries.retain(|(c, _), _| c != cluster);
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ListOptions;
    use serde_json::json;

    fn store_with_limits(changes_limit: u64, retention: i64) -> InMemoryStore {
        InMemoryStore::new(StoreConfig {
            changes_limit,
            change_retention_max_rows: Some(retention),
            change_retention_max_age: None,
        })
    }

    fn gvk() -> Gvk {
        Gvk::new("", "v1", "ConfigMap")
    }

    fn key(name: &str) -> ResourceKey {
        ResourceKey::new("east", gvk(), "default", name)
    }

    fn body(name: &str, tier: &str) -> Value {
        json!({"metadata": {"name": name, "labels": {"tier": tier}}, "data": {}})
    }

    fn query(opts: ListOptions) -> QuerySpec {
        QuerySpec::from_options(Some("default".into()), &opts).expect("query")
    }

    fn names(page: &ListPage) -> Vec<String> {
        page.items.iter().map(|r| r.key.name.clone()).collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_never_share_a_version() {
        let store = Arc::new(store_with_limits(1000, 1000));
        let mut tasks = Vec::new();
        for task in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let mut versions = Vec::new();
                for i in 0..25 {
                    let name = format!("t{task}-{i}");
                    let created = store.create(&key(&name), body(&name, "web")).await?;
                    let updated = store.update(&key(&name), body(&name, "db")).await?;
                    assert!(created.resource_version < updated.resource_version);
                    versions.push(created.resource_version.as_raw());
                    versions.push(updated.resource_version.as_raw());
                }
                Ok::<_, StoreError>(versions)
            }));
        }
        let mut all = Vec::new();
        for task in tasks {
            all.extend(task.await.expect("join").expect("writes"));
        }
        all.sort_unstable();
        assert_eq!(all, (1..=400).collect::<Vec<u64>>());

        let log = store
            .changes(&gvk(), ResourceVersion::ZERO, 1000)
            .await
            .expect("changes");
        assert_eq!(log.items.len(), 400);
        assert!(
            log.items
                .windows(2)
                .all(|pair| pair[0].resource_version < pair[1].resource_version)
        );
        assert!(
            log.items
                .iter()
                .all(|change| change.record.resource_version == change.resource_version)
        );
        assert_eq!(
            store.current_version(&gvk()).await.expect("current"),
            ResourceVersion::from_raw(400)
        );
    }

    #[tokio::test]
    async fn versions_strictly_increase_across_write_kinds() {
        let store = store_with_limits(100, 100);
        let a = store.create(&key("a"), body("a", "web")).await.expect("a");
        let b = store.create(&key("b"), body("b", "web")).await.expect("b");
        let a2 = store
            .update(&key("a"), body("a", "db"))
            .await
            .expect("update");
        let gone = store.delete(&key("b"), None).await.expect("delete");
        assert!(a.resource_version < b.resource_version);
        assert!(b.resource_version < a2.resource_version);
        assert!(a2.resource_version < gone.resource_version);

        let c = store.create(&key("b"), body("b", "web")).await.expect("recreate");
        assert!(gone.resource_version < c.resource_version);
        assert_eq!(
            store.current_version(&gvk()).await.expect("current"),
            c.resource_version
        );
    }

    #[tokio::test]
    async fn create_conflicts_and_update_checks_preconditions() {
        let store = store_with_limits(100, 100);
        store.create(&key("a"), body("a", "web")).await.expect("a");
        let err = store.create(&key("a"), body("a", "web")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let err = store
            .create(&key("x"), json!({"metadata": {"resourceVersion": "3"}}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));

        let err = store
            .update(&key("a"), json!({"metadata": {"resourceVersion": "9"}}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let err = store.update(&key("nope"), body("nope", "web")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let err = store
            .delete(&key("a"), Some(ResourceVersion::from_raw(9)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn stale_patch_conflicts_then_succeeds_with_current_version() {
        let store = store_with_limits(100, 100);
        store.create(&key("a"), body("a", "web")).await.expect("rv1");
        store.create(&key("b"), body("b", "web")).await.expect("rv2");
        let a = store.update(&key("a"), body("a", "web")).await.expect("rv3");
        assert_eq!(a.resource_version.to_string(), "3");

        let stale = Patch::merge(json!({"metadata": {"resourceVersion": "1"}, "data": {"k": "v"}}));
        let err = store.patch(&key("a"), &stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let fresh = Patch::merge(json!({"metadata": {"resourceVersion": "3"}, "data": {"k": "v"}}));
        let patched = store.patch(&key("a"), &fresh).await.expect("patch");
        assert_eq!(patched.resource_version.to_string(), "4");
        assert_eq!(patched.object["data"]["k"], "v");
        assert_eq!(patched.object["metadata"]["resourceVersion"], "4");
    }

    #[tokio::test]
    async fn change_log_carries_tombstones_and_previous_state() {
        let store = store_with_limits(100, 100);
        store.create(&key("a"), body("a", "web")).await.expect("a");
        store.update(&key("a"), body("a", "db")).await.expect("update");
        store.delete(&key("a"), None).await.expect("delete");

        let set = store
            .changes(&gvk(), ResourceVersion::ZERO, 100)
            .await
            .expect("changes");
        let ops: Vec<ChangeOp> = set.items.iter().map(|c| c.op).collect();
        assert_eq!(ops, vec![ChangeOp::Added, ChangeOp::Modified, ChangeOp::Deleted]);
        let delete = &set.items[2];
        assert_eq!(delete.record.resource_version, delete.resource_version);
        assert_eq!(
            delete.previous.as_ref().map(|p| p.object["metadata"]["labels"]["tier"].clone()),
            Some(json!("db"))
        );
        assert_eq!(set.resource_version, delete.resource_version);
    }

    #[tokio::test]
    async fn changes_page_and_expire_past_the_window() {
        let store = store_with_limits(2, 3);
        for name in ["a", "b", "c", "d", "e"] {
            store.create(&key(name), body(name, "web")).await.expect("create");
        }
        let err = store
            .changes(&gvk(), ResourceVersion::ZERO, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Expired(_)));

        let set = store
            .changes(&gvk(), ResourceVersion::from_raw(2), 10)
            .await
            .expect("changes");
        assert_eq!(set.items.len(), 2);
        assert_eq!(set.resource_version, ResourceVersion::from_raw(4));
        assert!(set.more);
        let rest = store
            .changes(&gvk(), set.resource_version, 10)
            .await
            .expect("changes");
        assert_eq!(rest.items.len(), 1);
        assert_eq!(rest.resource_version, ResourceVersion::from_raw(5));
        assert!(!rest.more);
    }

    #[tokio::test]
    async fn list_filters_by_selectors_and_namespace() {
        let store = store_with_limits(100, 100);
        store.create(&key("a"), body("a", "web")).await.expect("a");
        store.create(&key("b"), body("b", "db")).await.expect("b");
        store
            .create(
                &ResourceKey::new("east", gvk(), "other", "c"),
                body("c", "web"),
            )
            .await
            .expect("c");
        store
            .create(&ResourceKey::new("west", gvk(), "default", "d"), body("d", "web"))
            .await
            .expect("d");

        let kind = KindSelector::new("east", gvk());
        let page = store
            .list(
                &kind,
                &query(ListOptions {
                    label_selector: Some("tier=web".into()),
                    ..ListOptions::default()
                }),
            )
            .await
            .expect("list");
        assert_eq!(names(&page), vec!["a"]);
        assert_eq!(page.resource_version, ResourceVersion::from_raw(4));

        let all = store
            .list(&kind, &QuerySpec::default())
            .await
            .expect("list");
        assert_eq!(names(&all), vec!["a", "b", "c"]);

        let by_field = store
            .list(
                &kind,
                &query(ListOptions {
                    field_selector: Some("metadata.name!=a".into()),
                    ..ListOptions::default()
                }),
            )
            .await
            .expect("list");
        assert_eq!(names(&by_field), vec!["b"]);
    }

    #[tokio::test]
    async fn paging_is_stable_under_concurrent_writes() {
        let store = store_with_limits(100, 100);
        for name in ["a", "b", "c", "d"] {
            store.create(&key(name), body(name, "web")).await.expect("create");
        }
        let kind = KindSelector::new("east", gvk());
        let first = store
            .list(
                &kind,
                &query(ListOptions {
                    limit: Some(2),
                    ..ListOptions::default()
                }),
            )
            .await
            .expect("page 1");
        assert_eq!(names(&first), vec!["a", "b"]);
        assert_eq!(first.remaining_item_count, Some(2));
        let token = first.continue_token.clone().expect("token");

        store.delete(&key("c"), None).await.expect("delete c");
        store.create(&key("bb"), body("bb", "web")).await.expect("create bb");
        store.update(&key("d"), body("d", "db")).await.expect("update d");

        let second = store
            .list(
                &kind,
                &query(ListOptions {
                    limit: Some(2),
                    continue_token: Some(token),
                    ..ListOptions::default()
                }),
            )
            .await
            .expect("page 2");
        assert_eq!(names(&second), vec!["c", "d"]);
        assert_eq!(second.resource_version, first.resource_version);
        assert_eq!(second.items[1].object["metadata"]["labels"]["tier"], "web");
        assert!(second.continue_token.is_none());
        assert_eq!(second.remaining_item_count, None);
    }

    #[tokio::test]
    async fn exact_reads_serve_history_until_compacted() {
        let store = store_with_limits(2, 2);
        store.create(&key("a"), body("a", "web")).await.expect("rv1");
        store.create(&key("b"), body("b", "web")).await.expect("rv2");
        store.delete(&key("a"), None).await.expect("rv3");

        let kind = KindSelector::new("east", gvk());
        let exact = |rv: &str| {
            query(ListOptions {
                resource_version: Some(rv.into()),
                resource_version_match: Some("Exact".into()),
                ..ListOptions::default()
            })
        };
        let at_two = store.list(&kind, &exact("2")).await.expect("as of 2");
        assert_eq!(names(&at_two), vec!["a", "b"]);
        assert_eq!(at_two.resource_version, ResourceVersion::from_raw(2));

        let err = store.list(&kind, &exact("7")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        store.create(&key("c"), body("c", "web")).await.expect("rv4");
        let err = store.list(&kind, &exact("1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn sync_registry_round_trip() {
        let store = store_with_limits(10, 10);
        let deploy = Gvk::new("apps", "v1", "Deployment");
        store
            .upsert_sync_entry(SyncRegistryEntry::pending("east", gvk()))
            .await
            .expect("upsert");
        store
            .upsert_sync_entry(SyncRegistryEntry::pending("east", deploy.clone()))
            .await
            .expect("upsert");
        store
            .upsert_sync_entry(SyncRegistryEntry::pending("west", gvk()))
            .await
            .expect("upsert");

        assert!(store.get_sync_entry("east", &deploy).await.expect("get").is_some());
        assert_eq!(store.list_sync_entries("east").await.expect("list").len(), 2);

        store.remove_sync_entry("east", &deploy).await.expect("remove");
        let err = store.remove_sync_entry("east", &deploy).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        assert_eq!(store.remove_cluster("east").await.expect("remove cluster"), 1);
        assert!(store.list_sync_entries("east").await.expect("list").is_empty());
        assert_eq!(store.list_sync_entries("west").await.expect("list").len(), 1);
    }
}
