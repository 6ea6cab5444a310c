use super::SyncRegistryCache;
use crate::model::{ClusterSyncResources, Gvk, SyncRegistryEntry};
use crate::store::{StoreError, StoreResult};
use serde::Serialize;

/// GVKs whose registry entries changed while applying a declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeclarationOutcome {
    pub added: Vec<Gvk>,
    pub removed: Vec<Gvk>,
}

/// Reconcile a cluster's registry entries with its declaration.
///
/// Newly declared kinds get a `Pending` entry. Kinds that are still declared
/// keep their entry untouched. Entries no longer declared are removed.
pub async fn apply_declaration(
    registry: &SyncRegistryCache,
    declaration: &ClusterSyncResources,
) -> StoreResult<DeclarationOutcome> {
    if declaration.cluster.is_empty() {
        return Err(StoreError::Invalid("declaration has no cluster".to_string()));
    }
    let cluster = declaration.cluster.as_str();
    let declared = declaration.gvks();
    let existing = registry.list_by_cluster(cluster).await?;

    let mut outcome = DeclarationOutcome::default();
    for gvk in &declared {
        if existing.iter().any(|entry| &entry.gvk == gvk) {
            continue;
        }
        registry
            .upsert(SyncRegistryEntry::pending(cluster, gvk.clone()))
            .await?;
        outcome.added.push(gvk.clone());
    }
    for entry in existing {
        if declared.contains(&entry.gvk) {
            continue;
        }
        match registry.remove(cluster, &entry.gvk).await {
            // Raced with another writer; already gone.
            Ok(()) | Err(StoreError::NotFound(_)) => outcome.removed.push(entry.gvk),
            Err(err) => return Err(err),
        }
    }

    tracing::info!(
        cluster = %cluster,
        added = outcome.added.len(),
        removed = outcome.removed.len(),
        "applied sync declaration"
    );
    Ok(outcome)
}
