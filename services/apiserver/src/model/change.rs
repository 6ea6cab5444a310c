//! Change log entries and watch events.
use super::{Gvk, ResourceRecord};
use crate::version::ResourceVersion;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeOp {
    Added,
    Modified,
    Deleted,
}

impl ChangeOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeOp::Added => "added",
            ChangeOp::Modified => "modified",
            ChangeOp::Deleted => "deleted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "added" => Some(ChangeOp::Added),
            "modified" => Some(ChangeOp::Modified),
            "deleted" => Some(ChangeOp::Deleted),
            _ => None,
        }
    }
}

/// One entry of a GVK's change log.
///
/// For deletes `record` is the final state of the object, stamped with the
/// version allocated for the delete. `previous` is the state just before this
/// change and is `None` for creations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub resource_version: ResourceVersion,
    pub op: ChangeOp,
    pub record: ResourceRecord,
    pub previous: Option<ResourceRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    /// Absent for bookmarks.
    pub record: Option<ResourceRecord>,
    pub resource_version: ResourceVersion,
    /// Set on bookmarks from backends that keep no tombstones: deletes may
    /// have gone unreported, so the client should re-list.
    pub relist_advised: bool,
}

/// Bookmark annotation telling clients to re-list.
pub const RELIST_ADVISED_ANNOTATION: &str = "fleetdex.io/relist-advised";

impl WatchEvent {
    pub fn bookmark(resource_version: ResourceVersion) -> Self {
        Self {
            event_type: WatchEventType::Bookmark,
            record: None,
            resource_version,
            relist_advised: false,
        }
    }

    pub fn relist_bookmark(resource_version: ResourceVersion) -> Self {
        Self {
            relist_advised: true,
            ..Self::bookmark(resource_version)
        }
    }

    pub fn with_record(event_type: WatchEventType, record: ResourceRecord) -> Self {
        Self {
            event_type,
            resource_version: record.resource_version,
            record: Some(record),
            relist_advised: false,
        }
    }

    /// Kubernetes wire form: `{"type": "ADDED", "object": {...}}`.
    pub fn to_wire(&self, gvk: &Gvk) -> Value {
        let object = match &self.record {
            Some(record) => record.object.clone(),
            None => {
                let mut metadata = json!({ "resourceVersion": self.resource_version.to_string() });
                if self.relist_advised {
                    metadata["annotations"] = json!({ (RELIST_ADVISED_ANNOTATION): "true" });
                }
                json!({
                    "apiVersion": gvk.api_version(),
                    "kind": gvk.kind,
                    "metadata": metadata,
                })
            }
        };
        json!({ "type": self.event_type, "object": object })
    }
}
