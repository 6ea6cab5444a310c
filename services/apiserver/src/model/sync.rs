//! Synchronization bookkeeping types.
use super::Gvk;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Error,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "Pending",
            SyncStatus::Syncing => "Syncing",
            SyncStatus::Synced => "Synced",
            SyncStatus::Error => "Error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Pending" => Some(SyncStatus::Pending),
            "Syncing" => Some(SyncStatus::Syncing),
            "Synced" => Some(SyncStatus::Synced),
            "Error" => Some(SyncStatus::Error),
            _ => None,
        }
    }
}

/// Which kind is synchronized from which cluster, and how far along it is.
///
/// Written by sync workers; the API layer only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRegistryEntry {
    pub cluster: String,
    pub gvk: Gvk,
    pub status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub observed_generation: i64,
    pub updated_at: DateTime<Utc>,
}

impl SyncRegistryEntry {
    pub fn pending(cluster: impl Into<String>, gvk: Gvk) -> Self {
        Self {
            cluster: cluster.into(),
            gvk,
            status: SyncStatus::Pending,
            last_synced_version: None,
            error_message: None,
            observed_generation: 0,
            updated_at: Utc::now(),
        }
    }
}

/// A cluster's declaration of the kinds it wants synchronized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSyncResources {
    pub cluster: String,
    #[serde(default)]
    pub resources: Vec<SyncResourceGroup>,
}

/// Every combination of `versions` x `kinds` inside `group` is declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResourceGroup {
    #[serde(default)]
    pub group: String,
    pub versions: Vec<String>,
    pub kinds: Vec<String>,
}

impl ClusterSyncResources {
    /// Expand into distinct GVKs, in declaration order.
    pub fn gvks(&self) -> Vec<Gvk> {
        let mut out: Vec<Gvk> = Vec::new();
        for group in &self.resources {
            for version in &group.versions {
                for kind in &group.kinds {
                    let gvk = Gvk::new(group.group.clone(), version.clone(), kind.clone());
                    if !out.contains(&gvk) {
                        out.push(gvk);
                    }
                }
            }
        }
        out
    }
}
