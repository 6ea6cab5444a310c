//! Patch documents and their application.
use super::{ResourceRecord, declared_version};
use crate::store::{StoreError, StoreResult};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchType {
    /// RFC 7386 JSON merge patch.
    Merge,
    /// RFC 6902 JSON patch.
    Json,
    /// Accepted for client compatibility and applied as a merge patch; stored
    /// payloads carry no schema to drive list merge keys.
    StrategicMerge,
}

impl PatchType {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let media = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match media.as_str() {
            "application/merge-patch+json" => Some(PatchType::Merge),
            "application/json-patch+json" => Some(PatchType::Json),
            "application/strategic-merge-patch+json" => Some(PatchType::StrategicMerge),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub patch_type: PatchType,
    pub document: Value,
}

impl Patch {
    pub fn merge(document: Value) -> Self {
        Self {
            patch_type: PatchType::Merge,
            document,
        }
    }

    pub fn json(document: Value) -> Self {
        Self {
            patch_type: PatchType::Json,
            document,
        }
    }
}

/// Apply `patch` to the current state of an object.
///
/// If the patched document names a `metadata.resourceVersion`, it must equal
/// the current one.
///
/// # Errors
/// - [`StoreError::Invalid`] for malformed documents or failing operations.
/// - [`StoreError::Conflict`] when the patch was computed against a stale version.
pub fn apply_patch(current: &ResourceRecord, patch: &Patch) -> StoreResult<Value> {
    let mut doc = current.object.clone();
    match patch.patch_type {
        PatchType::Merge | PatchType::StrategicMerge => {
            if !patch.document.is_object() {
                return Err(StoreError::Invalid(
                    "merge patch must be a JSON object".to_string(),
                ));
            }
            json_patch::merge(&mut doc, &patch.document);
        }
        PatchType::Json => {
            let ops: json_patch::Patch = serde_json::from_value(patch.document.clone())
                .map_err(|err| StoreError::Invalid(format!("malformed json patch: {err}")))?;
            json_patch::patch(&mut doc, &ops)
                .map_err(|err| StoreError::Invalid(format!("json patch failed: {err}")))?;
        }
    }

    if let Some(requested) = declared_version(&doc)?
        && requested != current.resource_version
    {
        return Err(StoreError::Conflict(format!(
            "{} has resourceVersion {}, patch expected {}",
            current.key, current.resource_version, requested
        )));
    }
    Ok(doc)
}
