//! HTTP API request/response types.
//!
//! # Purpose
//! Kubernetes-shaped envelopes for lists, errors and the small set of
//! service-specific endpoints.
use crate::model::{Gvk, SyncRegistryEntry};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    #[serde(rename = "continue", default, skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_item_count: Option<u64>,
}

/// `{Kind}List` envelope returned by collection GETs.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResourceList {
    pub api_version: String,
    pub kind: String,
    pub metadata: ListMeta,
    pub items: Vec<Value>,
}

impl ResourceList {
    pub fn new(gvk: &Gvk, metadata: ListMeta, items: Vec<Value>) -> Self {
        Self {
            api_version: gvk.api_version(),
            kind: format!("{}List", gvk.kind),
            metadata,
            items,
        }
    }
}

/// Kubernetes `Status`, the body of every error response.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub api_version: String,
    pub kind: String,
    pub metadata: Value,
    pub status: String,
    pub message: String,
    pub reason: String,
    pub code: u16,
}

impl Status {
    pub fn failure(code: u16, reason: &str, message: &str) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "Status".to_string(),
            metadata: Value::Object(Default::default()),
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: reason.to_string(),
            code,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Preconditions {
    pub resource_version: Option<String>,
}

/// Body of a DELETE request. Only preconditions are honored.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOptions {
    #[serde(default)]
    pub preconditions: Option<Preconditions>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HealthStatus {
    pub status: String,
    pub backend: String,
    pub durable: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SyncResourcesResponse {
    pub cluster: String,
    pub items: Vec<SyncRegistryEntry>,
}
