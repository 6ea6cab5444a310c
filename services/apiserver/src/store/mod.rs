//! Storage backend contract.
//!
//! # Purpose
//! The generic API layer talks to persisted resources only through the traits
//! defined here. Backends are selected once at startup (see `crate::factory`)
//! and shared as a single `Arc<dyn StorageBackend>`.
//!
//! # Key invariants
//! - Every successful write allocates a resource version strictly greater
//!   than any previously issued for the same GVK, and the record is visible to
//!   `list`/`changes` at that version once the write returns.
//! - Each GVK keeps a change log. `changes(since)` returns entries with
//!   `rv > since` in increasing order, or `Expired` once `since` falls behind
//!   the retained window.
use crate::model::{
    Change, Gvk, KindSelector, Patch, ResourceKey, ResourceRecord, SyncRegistryEntry,
};
use crate::query::QuerySpec;
use crate::version::ResourceVersion;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod postgres;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Upper bound on entries returned by one `changes` call.
    pub changes_limit: u64,
    /// Change log entries kept per GVK.
    pub change_retention_max_rows: Option<i64>,
    /// Change log entries older than this are compacted.
    pub change_retention_max_age: Option<Duration>,
}

impl StoreConfig {
    pub fn change_window(&self) -> usize {
        self.change_retention_max_rows
            .unwrap_or(self.changes_limit as i64)
            .max(self.changes_limit as i64) as usize
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            changes_limit: 1000,
            change_retention_max_rows: Some(10_000),
            change_retention_max_age: None,
        }
    }
}

/// One page of a list.
#[derive(Debug, Clone)]
pub struct ListPage {
    pub items: Vec<ResourceRecord>,
    /// Present when more items follow.
    pub continue_token: Option<String>,
    /// The version the page was served at.
    pub resource_version: ResourceVersion,
    pub remaining_item_count: Option<u64>,
}

/// A slice of one GVK's change log.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub items: Vec<Change>,
    /// Every change up to and including this version has been accounted for;
    /// the next poll resumes from here.
    pub resource_version: ResourceVersion,
    /// Changes newer than `resource_version` were already committed when
    /// this slice was read.
    pub more: bool,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("expired: {0}")]
    Expired(String),
    #[error("kind {gvk} is not synchronized for cluster {cluster}")]
    KindNotSynchronized { cluster: String, gvk: Gvk },
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl StoreError {
    /// Only transport-level failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::BackendUnavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Create tables or other backing structures. Idempotent.
    async fn ensure_schema(&self) -> StoreResult<()>;

    async fn get(&self, key: &ResourceKey) -> StoreResult<ResourceRecord>;
    async fn list(&self, kind: &KindSelector, query: &QuerySpec) -> StoreResult<ListPage>;
    /// Change log entries for `gvk` with `rv > since`, at most `limit` of them.
    async fn changes(&self, gvk: &Gvk, since: ResourceVersion, limit: usize)
    -> StoreResult<ChangeSet>;
    /// Newest version issued for `gvk` (`ZERO` before the first write).
    async fn current_version(&self, gvk: &Gvk) -> StoreResult<ResourceVersion>;

    async fn create(&self, key: &ResourceKey, object: Value) -> StoreResult<ResourceRecord>;
    /// A `metadata.resourceVersion` in `object` is treated as a precondition.
    async fn update(&self, key: &ResourceKey, object: Value) -> StoreResult<ResourceRecord>;
    /// Returns the final state of the object, stamped with the delete's version.
    async fn delete(
        &self,
        key: &ResourceKey,
        precondition: Option<ResourceVersion>,
    ) -> StoreResult<ResourceRecord>;
    async fn patch(&self, key: &ResourceKey, patch: &Patch) -> StoreResult<ResourceRecord>;

    async fn health_check(&self) -> StoreResult<()>;
    /// Whether deletes leave tombstones in the change log. Watchers of
    /// backends that do not get periodic bookmarks and must re-list.
    fn retains_tombstones(&self) -> bool {
        true
    }
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}

#[async_trait]
pub trait SyncRegistryStore: Send + Sync {
    async fn upsert_sync_entry(&self, entry: SyncRegistryEntry) -> StoreResult<SyncRegistryEntry>;
    async fn remove_sync_entry(&self, cluster: &str, gvk: &Gvk) -> StoreResult<()>;
    async fn get_sync_entry(&self, cluster: &str, gvk: &Gvk)
    -> StoreResult<Option<SyncRegistryEntry>>;
    async fn list_sync_entries(&self, cluster: &str) -> StoreResult<Vec<SyncRegistryEntry>>;
    /// Drop every entry for `cluster`, returning how many were removed.
    async fn remove_cluster(&self, cluster: &str) -> StoreResult<usize>;
}

pub trait StorageBackend: ResourceStore + SyncRegistryStore {}

impl<T: ResourceStore + SyncRegistryStore> StorageBackend for T {}
