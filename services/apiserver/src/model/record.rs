//! Resource identity and the stored record.
use super::Gvk;
use crate::store::{StoreError, StoreResult};
use crate::version::ResourceVersion;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Unique identity of one object inside a backend instance.
///
/// Cluster-scoped objects use an empty `namespace`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub cluster: String,
    pub gvk: Gvk,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(
        cluster: impl Into<String>,
        gvk: Gvk,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            gvk,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Position of this key inside its GVK partition.
    pub fn identity(&self) -> (String, String, String) {
        (
            self.cluster.clone(),
            self.namespace.clone(),
            self.name.clone(),
        )
    }

    pub fn selector(&self) -> KindSelector {
        KindSelector {
            cluster: self.cluster.clone(),
            gvk: self.gvk.clone(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {}/{}", self.gvk.kind, self.cluster, self.name)
        } else {
            write!(
                f,
                "{} {}/{}/{}",
                self.gvk.kind, self.cluster, self.namespace, self.name
            )
        }
    }
}

/// The (cluster, kind) pair a list or watch is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KindSelector {
    pub cluster: String,
    pub gvk: Gvk,
}

impl KindSelector {
    pub fn new(cluster: impl Into<String>, gvk: Gvk) -> Self {
        Self {
            cluster: cluster.into(),
            gvk,
        }
    }
}

/// A persisted object snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub key: ResourceKey,
    pub object: Value,
    pub resource_version: ResourceVersion,
    pub synced_at: DateTime<Utc>,
}

impl ResourceRecord {
    /// Build a record and stamp `metadata.resourceVersion` into its payload.
    pub fn new(
        key: ResourceKey,
        mut object: Value,
        resource_version: ResourceVersion,
        synced_at: DateTime<Utc>,
    ) -> Self {
        if let Some(meta) = object.as_object_mut().map(metadata_mut) {
            meta.insert(
                "resourceVersion".to_string(),
                Value::String(resource_version.to_string()),
            );
        }
        Self {
            key,
            object,
            resource_version,
            synced_at,
        }
    }

    pub fn labels(&self) -> Option<&Map<String, Value>> {
        self.object
            .pointer("/metadata/labels")
            .and_then(Value::as_object)
    }

    /// Same identity and payload, restamped with a later version.
    pub fn restamped(&self, resource_version: ResourceVersion, synced_at: DateTime<Utc>) -> Self {
        Self::new(
            self.key.clone(),
            self.object.clone(),
            resource_version,
            synced_at,
        )
    }
}

fn metadata_mut(obj: &mut Map<String, Value>) -> &mut Map<String, Value> {
    let entry = obj
        .entry("metadata".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    match entry {
        Value::Object(map) => map,
        _ => unreachable!("metadata was just replaced with an object"),
    }
}

/// The `metadata.resourceVersion` a client sent along with a write, if any.
///
/// # Errors
/// - [`StoreError::Invalid`] when the field is present but not a token this
///   server issued.
pub fn declared_version(object: &Value) -> StoreResult<Option<ResourceVersion>> {
    match object.pointer("/metadata/resourceVersion") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => ResourceVersion::parse(s).map(Some),
        Some(other) => Err(StoreError::Invalid(format!(
            "metadata.resourceVersion must be a string, got {other}"
        ))),
    }
}

/// Normalize an incoming payload against the key it is written under.
///
/// Fills `apiVersion`, `kind`, `metadata.name`, `metadata.namespace` and
/// `metadata.creationTimestamp` (carried over from `existing` on updates).
/// The version stamp is applied later by [`ResourceRecord::new`].
///
/// # Errors
/// - [`StoreError::Invalid`] when the payload is not an object or names a
///   different object than `key`.
pub fn prepare_object(
    key: &ResourceKey,
    object: Value,
    existing: Option<&Value>,
) -> StoreResult<Value> {
    let Value::Object(mut obj) = object else {
        return Err(StoreError::Invalid(
            "resource body must be a JSON object".to_string(),
        ));
    };
    if key.name.is_empty() {
        return Err(StoreError::Invalid("metadata.name is required".to_string()));
    }

    let api_version = key.gvk.api_version();
    check_or_set(&mut obj, "apiVersion", &api_version)?;
    check_or_set(&mut obj, "kind", &key.gvk.kind)?;

    let created = existing
        .and_then(|v| v.pointer("/metadata/creationTimestamp"))
        .cloned();
    let meta = metadata_mut(&mut obj);
    check_or_set(meta, "name", &key.name)
        .map_err(|_| StoreError::Invalid(format!("metadata.name does not match {}", key.name)))?;
    match meta.get("namespace").and_then(Value::as_str) {
        Some(ns) if !ns.is_empty() && ns != key.namespace => {
            return Err(StoreError::Invalid(format!(
                "metadata.namespace {ns:?} does not match request namespace {:?}",
                key.namespace
            )));
        }
        _ => {
            if key.namespace.is_empty() {
                meta.remove("namespace");
            } else {
                meta.insert(
                    "namespace".to_string(),
                    Value::String(key.namespace.clone()),
                );
            }
        }
    }
    if !meta.contains_key("creationTimestamp") {
        let ts = created.unwrap_or_else(|| {
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
        });
        meta.insert("creationTimestamp".to_string(), ts);
    }
    Ok(Value::Object(obj))
}

fn check_or_set(obj: &mut Map<String, Value>, field: &str, expected: &str) -> StoreResult<()> {
    match obj.get(field).and_then(Value::as_str) {
        Some(found) if !found.is_empty() && found != expected => Err(StoreError::Invalid(
            format!("{field} {found:?} does not match {expected:?}"),
        )),
        _ => {
            obj.insert(field.to_string(), Value::String(expected.to_string()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod_key() -> ResourceKey {
        ResourceKey::new("east", Gvk::new("", "v1", "Pod"), "default", "web-0")
    }

    #[test]
    fn prepare_fills_identity_fields() {
        let prepared = prepare_object(&pod_key(), json!({"spec": {}}), None).expect("prepare");
        assert_eq!(prepared["apiVersion"], "v1");
        assert_eq!(prepared["kind"], "Pod");
        assert_eq!(prepared["metadata"]["name"], "web-0");
        assert_eq!(prepared["metadata"]["namespace"], "default");
        assert!(prepared["metadata"]["creationTimestamp"].is_string());
    }

    #[test]
    fn prepare_rejects_mismatched_identity() {
        let err = prepare_object(&pod_key(), json!({"metadata": {"name": "other"}}), None)
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));

        let err = prepare_object(&pod_key(), json!({"kind": "Service"}), None).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));

        let err = prepare_object(&pod_key(), json!([1, 2]), None).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[test]
    fn prepare_keeps_creation_timestamp_on_update() {
        let existing = json!({"metadata": {"creationTimestamp": "2024-01-01T00:00:00Z"}});
        let prepared =
            prepare_object(&pod_key(), json!({"metadata": {}}), Some(&existing)).expect("prepare");
        assert_eq!(
            prepared["metadata"]["creationTimestamp"],
            "2024-01-01T00:00:00Z"
        );
    }

    #[test]
    fn record_stamps_resource_version() {
        let record = ResourceRecord::new(
            pod_key(),
            json!({"metadata": {"name": "web-0"}}),
            ResourceVersion::from_raw(7),
            Utc::now(),
        );
        assert_eq!(record.object["metadata"]["resourceVersion"], "7");
        assert_eq!(
            declared_version(&record.object).expect("declared"),
            Some(ResourceVersion::from_raw(7))
        );
    }
}
