//! Postgres-backed resource store.
//!
//! # Data model
//! - `resources` holds the current state of every object, one row per
//!   (group, version, kind, cluster, namespace, name).
//! - `resource_changes` is the append-only change log. Each row carries the
//!   new state and the state just before the change, so lists can be served
//!   as of an earlier version.
//! - `resource_version_counters` holds one allocator row per GVK together
//!   with the compaction floor of that GVK's change log.
//! - `sync_registry` holds synchronization bookkeeping.
//!
//! # Key invariants
//! - A write transaction first bumps its GVK's counter row with
//!   `INSERT .. ON CONFLICT DO UPDATE .. RETURNING`. The row stays locked
//!   until commit, so writers of one GVK are serialized and commit in version
//!   order. Readers that see counter value `N` therefore see every change up
//!   to `N`.
//! - The authoritative row and its change row are written in the same
//!   transaction.
//! - Reads that combine the counter with data run in a `REPEATABLE READ`
//!   read-only transaction so both come from one snapshot.
//!
//! # Retention
//! An optional background task deletes change rows beyond
//! `change_retention_max_rows` per GVK or older than
//! `change_retention_max_age`, raising `compacted_through` accordingly.
//! Failures are logged and retried on the next tick.
//!
//! # Security notes
//! - Database URLs may contain credentials; they are never logged.
//! - All user-supplied values are bound parameters (see `query::sql`).
use super::{
    ChangeSet, ListPage, ResourceStore, StoreConfig, StoreError, StoreResult, SyncRegistryStore,
};
use crate::config::PostgresConfig;
use crate::model::{
    Change, ChangeOp, Gvk, KindSelector, Patch, ResourceKey, ResourceRecord, SyncRegistryEntry,
    SyncStatus, apply_patch, declared_version, prepare_object,
};
use crate::query::{ContinueToken, QuerySpec, sql};
use crate::version::ResourceVersion;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::migrate::MigrateError;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "pg-tests")]
const RETENTION_TICK: Duration = Duration::from_secs(1);
#[cfg(not(feature = "pg-tests"))]
const RETENTION_TICK: Duration = Duration::from_secs(60);

/// Durable resource store backed by Postgres.
///
/// # Example
/// ```rust,no_run
/// use apiserver::config::PostgresConfig;
/// use apiserver::store::{StoreConfig, postgres::PostgresStore};
///
/// async fn open(pg: PostgresConfig, cfg: StoreConfig) {
///     let _ = PostgresStore::connect(&pg, cfg).await;
/// }
/// ```
pub struct PostgresStore {
    pool: PgPool,
    config: StoreConfig,
}

#[derive(Debug, Clone, FromRow)]
struct ResourceRow {
    cluster: String,
    namespace: String,
    name: String,
    resource_version: i64,
    object: Value,
    synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct ListRow {
    cluster: String,
    namespace: String,
    name: String,
    resource_version: i64,
    object: Value,
    synced_at: DateTime<Utc>,
    total: i64,
}

#[derive(Debug, Clone, FromRow)]
struct ChangeRow {
    resource_version: i64,
    op: String,
    cluster: String,
    namespace: String,
    name: String,
    object: Value,
    synced_at: DateTime<Utc>,
    prev_object: Option<Value>,
    prev_resource_version: Option<i64>,
    prev_synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
struct SyncRow {
    cluster: String,
    api_group: String,
    api_version: String,
    kind: String,
    status: String,
    last_synced_version: Option<String>,
    error_message: Option<String>,
    observed_generation: i64,
    updated_at: DateTime<Utc>,
}

const RESOURCE_COLUMNS: &str = "cluster, namespace, name, resource_version, object, synced_at";

impl PostgresStore {
    /// Connect, apply migrations, and start retention maintenance when configured.
    ///
    /// # Errors
    /// - `BackendUnavailable` when the database cannot be reached in time.
    /// - `SchemaMismatch` when migrations cannot be applied.
    pub async fn connect(pg: &PostgresConfig, config: StoreConfig) -> StoreResult<Self> {
        Self::connect_internal(pg, config, true).await
    }

    /// Connect without running migrations, for tests that manage the schema.
    #[cfg(any(test, feature = "pg-tests"))]
    pub async fn connect_without_migrations(
        pg: &PostgresConfig,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        Self::connect_internal(pg, config, false).await
    }

    async fn connect_internal(
        pg: &PostgresConfig,
        config: StoreConfig,
        run_migrations: bool,
    ) -> StoreResult<Self> {
        let connect_options = PgConnectOptions::from_str(&pg.url)
            .map_err(|err| StoreError::Invalid(format!("postgres url: {err}")))?;
        let pool = tokio::time::timeout(
            Duration::from_millis(pg.connect_timeout_ms),
            PgPoolOptions::new()
                .max_connections(pg.max_connections)
                .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
                .connect_with(connect_options),
        )
        .await
        .map_err(|_| StoreError::BackendUnavailable("postgres connect timed out".to_string()))??;

        let store = Self { pool, config };
        if run_migrations {
            store.ensure_schema().await?;
        }
        if store.config.change_retention_max_rows.is_some()
            || store.config.change_retention_max_age.is_some()
        {
            spawn_retention_task(
                store.pool.clone(),
                store.config.change_retention_max_rows,
                store.config.change_retention_max_age,
            );
        }
        Ok(store)
    }

    fn limit(&self) -> i64 {
        self.config.changes_limit.max(1) as i64
    }

    async fn begin_snapshot(&self) -> StoreResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    /// Read-modify-write of an existing object under its GVK's counter lock.
    async fn rewrite<F>(&self, key: &ResourceKey, transform: F) -> StoreResult<ResourceRecord>
    where
        F: FnOnce(&ResourceRecord) -> StoreResult<Value> + Send,
    {
        let mut tx = self.pool.begin().await?;
        let rv = allocate_version(&mut tx, &key.gvk).await?;
        let current = fetch_for_update(&mut tx, key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let object = prepare_object(key, transform(&current)?, Some(&current.object))?;
        let record = ResourceRecord::new(key.clone(), object, rv, Utc::now());
        sqlx::query(
            "UPDATE resources SET resource_version = $7, object = $8, synced_at = $9 \
             WHERE api_group = $1 AND api_version = $2 AND kind = $3 \
             AND cluster = $4 AND namespace = $5 AND name = $6",
        )
        .bind(&key.gvk.group)
        .bind(&key.gvk.version)
        .bind(&key.gvk.kind)
        .bind(&key.cluster)
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(rv.as_raw() as i64)
        .bind(&record.object)
        .bind(record.synced_at)
        .execute(&mut *tx)
        .await?;
        append_change(&mut tx, ChangeOp::Modified, &record, Some(&current)).await?;
        tx.commit().await?;
        observe_write(ChangeOp::Modified);
        Ok(record)
    }
}

/// Spawn a best-effort task that compacts every GVK's change log.
///
/// A change row is dropped when it is more than `max_rows` versions behind
/// its GVK's newest version, or older than `max_age`. The counter row's
/// `compacted_through` is raised to the highest dropped version so readers
/// can tell a resumable version from a compacted one.
fn spawn_retention_task(pool: PgPool, max_rows: Option<i64>, max_age: Option<Duration>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RETENTION_TICK);
        loop {
            ticker.tick().await;
            let result = sqlx::query(
                "WITH doomed AS ( \
                   DELETE FROM resource_changes c USING resource_version_counters v \
                   WHERE c.api_group = v.api_group AND c.api_version = v.api_version AND c.kind = v.kind \
                   AND (($1::bigint IS NOT NULL AND c.resource_version <= v.current_rv - $1::bigint) \
                     OR ($2::float8 IS NOT NULL AND c.changed_at < now() - make_interval(secs => $2::float8))) \
                   RETURNING c.api_group, c.api_version, c.kind, c.resource_version \
                 ) \
                 UPDATE resource_version_counters v \
                 SET compacted_through = GREATEST(v.compacted_through, d.max_rv) \
                 FROM (SELECT api_group, api_version, kind, MAX(resource_version) AS max_rv \
                       FROM doomed GROUP BY api_group, api_version, kind) d \
                 WHERE v.api_group = d.api_group AND v.api_version = d.api_version AND v.kind = d.kind",
            )
            .bind(max_rows)
            .bind(max_age.map(|age| age.as_secs_f64()))
            .execute(&pool)
            .await;
            match result {
                Ok(done) if done.rows_affected() > 0 => {
                    tracing::debug!(kinds = done.rows_affected(), "compacted change log");
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "change log retention failed"),
            }
        }
    });
}

async fn allocate_version(
    tx: &mut Transaction<'static, Postgres>,
    gvk: &Gvk,
) -> StoreResult<ResourceVersion> {
    let rv: i64 = sqlx::query_scalar(
        "INSERT INTO resource_version_counters (api_group, api_version, kind, current_rv) \
         VALUES ($1, $2, $3, 1) \
         ON CONFLICT (api_group, api_version, kind) \
         DO UPDATE SET current_rv = resource_version_counters.current_rv + 1 \
         RETURNING current_rv",
    )
    .bind(&gvk.group)
    .bind(&gvk.version)
    .bind(&gvk.kind)
    .fetch_one(&mut **tx)
    .await?;
    Ok(ResourceVersion::from_raw(rv as u64))
}

/// `(current_rv, compacted_through)` for `gvk`, zeros before the first write.
async fn read_counters(
    tx: &mut Transaction<'static, Postgres>,
    gvk: &Gvk,
) -> StoreResult<(ResourceVersion, ResourceVersion)> {
    let row: Option<(i64, i64)> = sqlx::query_as(
        "SELECT current_rv, compacted_through FROM resource_version_counters \
         WHERE api_group = $1 AND api_version = $2 AND kind = $3",
    )
    .bind(&gvk.group)
    .bind(&gvk.version)
    .bind(&gvk.kind)
    .fetch_optional(&mut **tx)
    .await?;
    let (current, compacted) = row.unwrap_or((0, 0));
    Ok((
        ResourceVersion::from_raw(current as u64),
        ResourceVersion::from_raw(compacted as u64),
    ))
}

async fn fetch_for_update(
    tx: &mut Transaction<'static, Postgres>,
    key: &ResourceKey,
) -> StoreResult<Option<ResourceRecord>> {
    let row: Option<ResourceRow> = sqlx::query_as(&format!(
        "SELECT {RESOURCE_COLUMNS} FROM resources \
         WHERE api_group = $1 AND api_version = $2 AND kind = $3 \
         AND cluster = $4 AND namespace = $5 AND name = $6 FOR UPDATE"
    ))
    .bind(&key.gvk.group)
    .bind(&key.gvk.version)
    .bind(&key.gvk.kind)
    .bind(&key.cluster)
    .bind(&key.namespace)
    .bind(&key.name)
    .fetch_optional(&mut **tx)
    .await?;
    row.map(|row| record_from_row(&key.gvk, row)).transpose()
}

async fn append_change(
    tx: &mut Transaction<'static, Postgres>,
    op: ChangeOp,
    record: &ResourceRecord,
    previous: Option<&ResourceRecord>,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO resource_changes \
         (api_group, api_version, kind, resource_version, op, cluster, namespace, name, \
          object, synced_at, prev_object, prev_resource_version, prev_synced_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(&record.key.gvk.group)
    .bind(&record.key.gvk.version)
    .bind(&record.key.gvk.kind)
    .bind(record.resource_version.as_raw() as i64)
    .bind(op.as_str())
    .bind(&record.key.cluster)
    .bind(&record.key.namespace)
    .bind(&record.key.name)
    .bind(&record.object)
    .bind(record.synced_at)
    .bind(previous.map(|p| &p.object))
    .bind(previous.map(|p| p.resource_version.as_raw() as i64))
    .bind(previous.map(|p| p.synced_at))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn observe_write(op: ChangeOp) {
    metrics::counter!("fleetdex_resource_changes_total", "backend" => "postgres", "op" => op.as_str())
        .increment(1);
}

fn decode_record(
    gvk: &Gvk,
    cluster: String,
    namespace: String,
    name: String,
    resource_version: i64,
    object: Value,
    synced_at: DateTime<Utc>,
) -> StoreResult<ResourceRecord> {
    if !object.is_object() || resource_version <= 0 {
        return Err(StoreError::SchemaMismatch(format!(
            "stored {} {cluster}/{namespace}/{name} does not decode as a resource",
            gvk.kind
        )));
    }
    Ok(ResourceRecord {
        key: ResourceKey::new(cluster, gvk.clone(), namespace, name),
        object,
        resource_version: ResourceVersion::from_raw(resource_version as u64),
        synced_at,
    })
}

fn record_from_row(gvk: &Gvk, row: ResourceRow) -> StoreResult<ResourceRecord> {
    decode_record(
        gvk,
        row.cluster,
        row.namespace,
        row.name,
        row.resource_version,
        row.object,
        row.synced_at,
    )
}

fn change_from_row(gvk: &Gvk, row: ChangeRow) -> StoreResult<Change> {
    let op = ChangeOp::parse(&row.op)
        .ok_or_else(|| StoreError::SchemaMismatch(format!("unknown change op {:?}", row.op)))?;
    let previous = match (row.prev_object, row.prev_resource_version, row.prev_synced_at) {
        (Some(object), Some(rv), Some(at)) => Some(decode_record(
            gvk,
            row.cluster.clone(),
            row.namespace.clone(),
            row.name.clone(),
            rv,
            object,
            at,
        )?),
        _ => None,
    };
    let record = decode_record(
        gvk,
        row.cluster,
        row.namespace,
        row.name,
        row.resource_version,
        row.object,
        row.synced_at,
    )?;
    Ok(Change {
        resource_version: record.resource_version,
        op,
        record,
        previous,
    })
}

fn sync_from_row(row: SyncRow) -> StoreResult<SyncRegistryEntry> {
    let status = SyncStatus::parse(&row.status)
        .ok_or_else(|| StoreError::SchemaMismatch(format!("unknown sync status {:?}", row.status)))?;
    Ok(SyncRegistryEntry {
        cluster: row.cluster,
        gvk: Gvk::new(row.api_group, row.api_version, row.kind),
        status,
        last_synced_version: row.last_synced_version,
        error_message: row.error_message,
        observed_generation: row.observed_generation,
        updated_at: row.updated_at,
    })
}

#[async_trait]
impl ResourceStore for PostgresStore {
    async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("postgres schema is up to date");
        Ok(())
    }

    async fn get(&self, key: &ResourceKey) -> StoreResult<ResourceRecord> {
        let row: Option<ResourceRow> = sqlx::query_as(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources \
             WHERE api_group = $1 AND api_version = $2 AND kind = $3 \
             AND cluster = $4 AND namespace = $5 AND name = $6"
        ))
        .bind(&key.gvk.group)
        .bind(&key.gvk.version)
        .bind(&key.gvk.kind)
        .bind(&key.cluster)
        .bind(&key.namespace)
        .bind(&key.name)
        .fetch_optional(&self.pool)
        .await?;
        let row = row.ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        record_from_row(&key.gvk, row)
    }

    async fn list(&self, kind: &KindSelector, query: &QuerySpec) -> StoreResult<ListPage> {
        let mut tx = self.begin_snapshot().await?;
        let (newest, compacted) = read_counters(&mut tx, &kind.gvk).await?;
        let read_at = query.resolve_read(newest, compacted)?;
        let mut qb = sql::list_query(kind, query, read_at);
        let rows: Vec<ListRow> = qb.build_query_as().fetch_all(&mut *tx).await?;
        tx.commit().await?;

        let total = rows.first().map(|row| row.total.max(0) as u64).unwrap_or(0);
        let items = rows
            .into_iter()
            .map(|row| {
                decode_record(
                    &kind.gvk,
                    row.cluster,
                    row.namespace,
                    row.name,
                    row.resource_version,
                    row.object,
                    row.synced_at,
                )
            })
            .collect::<StoreResult<Vec<_>>>()?;
        let resource_version = read_at.list_version(newest);
        let remaining = total.saturating_sub(items.len() as u64);
        let continue_token = match items.last() {
            Some(last) if remaining > 0 => Some(
                ContinueToken {
                    resource_version,
                    last_key: query.order.sort_key(last),
                    order: query.order.fingerprint(),
                }
                .encode()?,
            ),
            _ => None,
        };
        Ok(ListPage {
            items,
            continue_token,
            resource_version,
            remaining_item_count: (remaining > 0).then_some(remaining),
        })
    }

    async fn changes(
        &self,
        gvk: &Gvk,
        since: ResourceVersion,
        limit: usize,
    ) -> StoreResult<ChangeSet> {
        let mut tx = self.begin_snapshot().await?;
        let (newest, compacted) = read_counters(&mut tx, gvk).await?;
        if since < compacted {
            return Err(StoreError::Expired(format!(
                "resourceVersion {since} of {gvk} is older than retained history ({compacted})"
            )));
        }
        let limit = (limit.max(1) as i64).min(self.limit());
        let rows: Vec<ChangeRow> = sqlx::query_as(
            "SELECT resource_version, op, cluster, namespace, name, object, synced_at, \
             prev_object, prev_resource_version, prev_synced_at \
             FROM resource_changes \
             WHERE api_group = $1 AND api_version = $2 AND kind = $3 \
             AND resource_version > $4 AND resource_version <= $5 \
             ORDER BY resource_version ASC LIMIT $6",
        )
        .bind(&gvk.group)
        .bind(&gvk.version)
        .bind(&gvk.kind)
        .bind(since.as_raw() as i64)
        .bind(newest.as_raw() as i64)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let full = rows.len() as i64 == limit;
        let items = rows
            .into_iter()
            .map(|row| change_from_row(gvk, row))
            .collect::<StoreResult<Vec<_>>>()?;
        let resource_version = match items.last() {
            Some(last) if full => last.resource_version,
            _ => newest.max(since),
        };
        Ok(ChangeSet {
            items,
            resource_version,
            more: resource_version < newest,
        })
    }

    async fn current_version(&self, gvk: &Gvk) -> StoreResult<ResourceVersion> {
        let current: Option<i64> = sqlx::query_scalar(
            "SELECT current_rv FROM resource_version_counters \
             WHERE api_group = $1 AND api_version = $2 AND kind = $3",
        )
        .bind(&gvk.group)
        .bind(&gvk.version)
        .bind(&gvk.kind)
        .fetch_optional(&self.pool)
        .await?;
        Ok(ResourceVersion::from_raw(current.unwrap_or(0) as u64))
    }

    async fn create(&self, key: &ResourceKey, object: Value) -> StoreResult<ResourceRecord> {
        if declared_version(&object)?.is_some() {
            return Err(StoreError::Invalid(
                "resourceVersion should not be set on objects to be created".to_string(),
            ));
        }
        let object = prepare_object(key, object, None)?;
        let mut tx = self.pool.begin().await?;
        let rv = allocate_version(&mut tx, &key.gvk).await?;
        let record = ResourceRecord::new(key.clone(), object, rv, Utc::now());
        let insert = sqlx::query(
            "INSERT INTO resources \
             (api_group, api_version, kind, cluster, namespace, name, resource_version, object, synced_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&key.gvk.group)
        .bind(&key.gvk.version)
        .bind(&key.gvk.kind)
        .bind(&key.cluster)
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(rv.as_raw() as i64)
        .bind(&record.object)
        .bind(record.synced_at)
        .execute(&mut *tx)
        .await;
        if let Err(err) = insert {
            // Dropping `tx` rolls back the counter bump as well.
            if is_unique_violation(&err) {
                return Err(StoreError::Conflict(format!("{key} already exists")));
            }
            return Err(err.into());
        }
        append_change(&mut tx, ChangeOp::Added, &record, None).await?;
        tx.commit().await?;
        observe_write(ChangeOp::Added);
        Ok(record)
    }

    async fn update(&self, key: &ResourceKey, object: Value) -> StoreResult<ResourceRecord> {
        let precondition = declared_version(&object)?;
        self.rewrite(key, move |current| {
            if let Some(expected) = precondition
                && expected != current.resource_version
            {
                return Err(StoreError::Conflict(format!(
                    "{} has resourceVersion {}, update expected {expected}",
                    current.key, current.resource_version
                )));
            }
            Ok(object)
        })
        .await
    }

    async fn delete(
        &self,
        key: &ResourceKey,
        precondition: Option<ResourceVersion>,
    ) -> StoreResult<ResourceRecord> {
        let mut tx = self.pool.begin().await?;
        let rv = allocate_version(&mut tx, &key.gvk).await?;
        let current = fetch_for_update(&mut tx, key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if let Some(expected) = precondition
            && expected != current.resource_version
        {
            return Err(StoreError::Conflict(format!(
                "{key} has resourceVersion {}, delete expected {expected}",
                current.resource_version
            )));
        }
        let tombstone = current.restamped(rv, Utc::now());
        sqlx::query(
            "DELETE FROM resources \
             WHERE api_group = $1 AND api_version = $2 AND kind = $3 \
             AND cluster = $4 AND namespace = $5 AND name = $6",
        )
        .bind(&key.gvk.group)
        .bind(&key.gvk.version)
        .bind(&key.gvk.kind)
        .bind(&key.cluster)
        .bind(&key.namespace)
        .bind(&key.name)
        .execute(&mut *tx)
        .await?;
        append_change(&mut tx, ChangeOp::Deleted, &tombstone, Some(&current)).await?;
        tx.commit().await?;
        observe_write(ChangeOp::Deleted);
        Ok(tombstone)
    }

    async fn patch(&self, key: &ResourceKey, patch: &Patch) -> StoreResult<ResourceRecord> {
        self.rewrite(key, |current| apply_patch(current, patch)).await
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[async_trait]
impl SyncRegistryStore for PostgresStore {
    async fn upsert_sync_entry(&self, entry: SyncRegistryEntry) -> StoreResult<SyncRegistryEntry> {
        let row: SyncRow = sqlx::query_as(
            "INSERT INTO sync_registry \
             (cluster, api_group, api_version, kind, status, last_synced_version, error_message, \
              observed_generation, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now()) \
             ON CONFLICT (cluster, api_group, api_version, kind) DO UPDATE SET \
               status = EXCLUDED.status, \
               last_synced_version = EXCLUDED.last_synced_version, \
               error_message = EXCLUDED.error_message, \
               observed_generation = EXCLUDED.observed_generation, \
               updated_at = EXCLUDED.updated_at \
             RETURNING cluster, api_group, api_version, kind, status, last_synced_version, \
               error_message, observed_generation, updated_at",
        )
        .bind(&entry.cluster)
        .bind(&entry.gvk.group)
        .bind(&entry.gvk.version)
        .bind(&entry.gvk.kind)
        .bind(entry.status.as_str())
        .bind(&entry.last_synced_version)
        .bind(&entry.error_message)
        .bind(entry.observed_generation)
        .fetch_one(&self.pool)
        .await?;
        sync_from_row(row)
    }

    async fn remove_sync_entry(&self, cluster: &str, gvk: &Gvk) -> StoreResult<()> {
        let result = sqlx::query(
            "DELETE FROM sync_registry \
             WHERE cluster = $1 AND api_group = $2 AND api_version = $3 AND kind = $4",
        )
        .bind(cluster)
        .bind(&gvk.group)
        .bind(&gvk.version)
        .bind(&gvk.kind)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "sync entry {gvk} for cluster {cluster}"
            )));
        }
        Ok(())
    }

    async fn get_sync_entry(
        &self,
        cluster: &str,
        gvk: &Gvk,
    ) -> StoreResult<Option<SyncRegistryEntry>> {
        let row: Option<SyncRow> = sqlx::query_as(
            "SELECT cluster, api_group, api_version, kind, status, last_synced_version, \
             error_message, observed_generation, updated_at FROM sync_registry \
             WHERE cluster = $1 AND api_group = $2 AND api_version = $3 AND kind = $4",
        )
        .bind(cluster)
        .bind(&gvk.group)
        .bind(&gvk.version)
        .bind(&gvk.kind)
        .fetch_optional(&self.pool)
        .await?;
        row.map(sync_from_row).transpose()
    }

    async fn list_sync_entries(&self, cluster: &str) -> StoreResult<Vec<SyncRegistryEntry>> {
        let rows: Vec<SyncRow> = sqlx::query_as(
            "SELECT cluster, api_group, api_version, kind, status, last_synced_version, \
             error_message, observed_generation, updated_at FROM sync_registry \
             WHERE cluster = $1 ORDER BY api_group, api_version, kind",
        )
        .bind(cluster)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(sync_from_row).collect()
    }

    async fn remove_cluster(&self, cluster: &str) -> StoreResult<usize> {
        let result = sqlx::query("DELETE FROM sync_registry WHERE cluster = $1")
            .bind(cluster)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23505").unwrap_or(false);
    }
    false
}

/// SQLSTATE classes that indicate the database, not the request, is at fault:
/// connection exceptions, operator intervention, insufficient resources,
/// serialization failures and deadlocks.
fn is_transient_code(code: &str) -> bool {
    code.starts_with("08")
        || code.starts_with("57P")
        || code.starts_with("53")
        || code == "40001"
        || code == "40P01"
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => StoreError::BackendUnavailable(err.to_string()),
            sqlx::Error::Database(ref db_err)
                if db_err.code().is_some_and(|code| is_transient_code(&code)) =>
            {
                StoreError::BackendUnavailable(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::TypeNotFound { .. } => StoreError::SchemaMismatch(err.to_string()),
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            other => StoreError::Unexpected(other.into()),
        }
    }
}

impl From<MigrateError> for StoreError {
    fn from(err: MigrateError) -> Self {
        match err {
            MigrateError::Execute(inner) => inner.into(),
            other => StoreError::SchemaMismatch(other.to_string()),
        }
    }
}
