//! Kubernetes-style resource handlers.
//!
//! # Purpose
//! Maps the REST conventions of a cluster API onto [`crate::storage::Storage`]:
//!
//! - `{prefix}/{kind}` and `{prefix}/namespaces/{ns}/{kind}`: list, watch, create
//! - `{prefix}/{kind}/{name}` and `{prefix}/namespaces/{ns}/{kind}/{name}`:
//!   get, update, patch, delete
//!
//! where `{prefix}` is `api/{version}` for the core group and
//! `apis/{group}/{version}` otherwise, all below `/clusters/{cluster}/`.
//!
//! Watches stream newline-delimited JSON events. A session that ends
//! abnormally emits a final `ERROR` event carrying a `Status`.
use crate::api::error::{
    ApiError, api_bad_request, api_method_not_allowed, api_not_found, api_unsupported_media_type,
};
use crate::api::sync::list_sync_resources;
use crate::api::types::{DeleteOptions, ListMeta, ResourceList};
use crate::app::AppState;
use crate::model::{Gvk, KindSelector, Patch, PatchType, ResourceKey};
use crate::query::{ListOptions, QuerySpec};
use crate::version::ResourceVersion;
use crate::watch::WatchRequest;
use axum::Json;
use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::time::Duration;

/// What a path below `/clusters/{cluster}/` addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourcePath {
    SyncResources,
    Collection {
        gvk: Gvk,
        namespace: Option<String>,
    },
    Object {
        gvk: Gvk,
        namespace: Option<String>,
        name: String,
    },
}

impl ResourcePath {
    pub fn parse(path: &str) -> Result<Self, ApiError> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(api_not_found(&format!("no resource at {path:?}")));
        }
        let (group, version, rest) = match segments.as_slice() {
            ["syncresources"] => return Ok(ResourcePath::SyncResources),
            ["api", version, rest @ ..] => ("", *version, rest),
            ["apis", group, version, rest @ ..] => (*group, *version, rest),
            _ => return Err(api_not_found(&format!("no resource at {path:?}"))),
        };
        let gvk = |kind: &str| Gvk::new(group, version, kind);
        match rest {
            [kind] => Ok(ResourcePath::Collection {
                gvk: gvk(*kind),
                namespace: None,
            }),
            ["namespaces", ns, kind] => Ok(ResourcePath::Collection {
                gvk: gvk(*kind),
                namespace: Some(ns.to_string()),
            }),
            [kind, name] => Ok(ResourcePath::Object {
                gvk: gvk(*kind),
                namespace: None,
                name: name.to_string(),
            }),
            ["namespaces", ns, kind, name] => Ok(ResourcePath::Object {
                gvk: gvk(*kind),
                namespace: Some(ns.to_string()),
                name: name.to_string(),
            }),
            _ => Err(api_not_found(&format!("no resource at {path:?}"))),
        }
    }
}

fn object_key(cluster: String, gvk: Gvk, namespace: Option<String>, name: String) -> ResourceKey {
    ResourceKey::new(cluster, gvk, namespace.unwrap_or_default(), name)
}

fn parse_json(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|err| api_bad_request(&format!("invalid JSON body: {err}")))
}

pub(crate) async fn get_handler(
    Path((cluster, path)): Path<(String, String)>,
    query: Result<Query<ListOptions>, QueryRejection>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let Query(opts) = query.map_err(|err| api_bad_request(&err.body_text()))?;
    match ResourcePath::parse(&path)? {
        ResourcePath::SyncResources => list_sync_resources(&state, &cluster).await,
        ResourcePath::Collection { gvk, namespace } => {
            let kind = KindSelector::new(cluster, gvk);
            let query = QuerySpec::from_options(namespace, &opts)?;
            if opts.watch {
                watch_collection(&state, kind, query, &opts).await
            } else {
                list_collection(&state, kind, query).await
            }
        }
        ResourcePath::Object {
            gvk,
            namespace,
            name,
        } => {
            let record = state
                .storage
                .get(&object_key(cluster, gvk, namespace, name))
                .await?;
            Ok(Json(record.object).into_response())
        }
    }
}

async fn list_collection(
    state: &AppState,
    kind: KindSelector,
    query: QuerySpec,
) -> Result<Response, ApiError> {
    let page = state.storage.list(&kind, &query).await?;
    let metadata = ListMeta {
        resource_version: page.resource_version.to_string(),
        continue_token: page.continue_token,
        remaining_item_count: page.remaining_item_count,
    };
    let items = page.items.into_iter().map(|record| record.object).collect();
    Ok(Json(ResourceList::new(&kind.gvk, metadata, items)).into_response())
}

async fn watch_collection(
    state: &AppState,
    kind: KindSelector,
    query: QuerySpec,
    opts: &ListOptions,
) -> Result<Response, ApiError> {
    let gvk = kind.gvk.clone();
    let request = WatchRequest {
        from: query.resource_version,
        kind,
        query,
        allow_bookmarks: opts.allow_watch_bookmarks,
        timeout: opts
            .timeout_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs),
    };
    let session = state.storage.watch(request).await?;

    let events = futures::stream::unfold(Some(session), move |slot| {
        let gvk = gvk.clone();
        async move {
            let mut session = slot?;
            match session.next().await {
                Some(Ok(event)) => {
                    let frame = line(&event.to_wire(&gvk));
                    Some((Ok::<_, Infallible>(frame), Some(session)))
                }
                Some(Err(err)) => {
                    let status = ApiError::from(err).body;
                    let frame = line(&json!({ "type": "ERROR", "object": status }));
                    Some((Ok(frame), None))
                }
                None => None,
            }
        }
    });
    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(events),
    )
        .into_response())
}

fn line(value: &Value) -> Bytes {
    let mut buf = value.to_string().into_bytes();
    buf.push(b'\n');
    Bytes::from(buf)
}

pub(crate) async fn post_handler(
    Path((cluster, path)): Path<(String, String)>,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let ResourcePath::Collection { gvk, namespace } = ResourcePath::parse(&path)? else {
        return Err(api_method_not_allowed("POST is only supported on collections"));
    };
    let object = parse_json(&body)?;
    let name = object
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| api_bad_request("metadata.name is required"))?
        .to_string();
    let namespace = namespace.or_else(|| {
        object
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
            .map(str::to_string)
    });
    let key = object_key(cluster, gvk, namespace, name);
    let record = state.storage.create(&key, object).await?;
    Ok((StatusCode::CREATED, Json(record.object)).into_response())
}

fn object_path(path: &str, method: &str) -> Result<(Gvk, Option<String>, String), ApiError> {
    match ResourcePath::parse(path)? {
        ResourcePath::Object {
            gvk,
            namespace,
            name,
        } => Ok((gvk, namespace, name)),
        _ => Err(api_method_not_allowed(&format!(
            "{method} is only supported on named objects"
        ))),
    }
}

pub(crate) async fn put_handler(
    Path((cluster, path)): Path<(String, String)>,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let (gvk, namespace, name) = object_path(&path, "PUT")?;
    let object = parse_json(&body)?;
    let record = state
        .storage
        .update(&object_key(cluster, gvk, namespace, name), object)
        .await?;
    Ok(Json(record.object).into_response())
}

pub(crate) async fn patch_handler(
    Path((cluster, path)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let (gvk, namespace, name) = object_path(&path, "PATCH")?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let patch_type = PatchType::from_content_type(content_type).ok_or_else(|| {
        api_unsupported_media_type(&format!("unsupported patch content type {content_type:?}"))
    })?;
    let patch = Patch {
        patch_type,
        document: parse_json(&body)?,
    };
    let record = state
        .storage
        .patch(&object_key(cluster, gvk, namespace, name), &patch)
        .await?;
    Ok(Json(record.object).into_response())
}

pub(crate) async fn delete_handler(
    Path((cluster, path)): Path<(String, String)>,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let (gvk, namespace, name) = object_path(&path, "DELETE")?;
    let options: DeleteOptions = if body.iter().all(u8::is_ascii_whitespace) {
        DeleteOptions::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|err| api_bad_request(&format!("invalid DeleteOptions: {err}")))?
    };
    let precondition = options
        .preconditions
        .and_then(|p| p.resource_version)
        .filter(|rv| !rv.is_empty())
        .map(|rv| ResourceVersion::parse(&rv))
        .transpose()?;
    let record = state
        .storage
        .delete(&object_key(cluster, gvk, namespace, name), precondition)
        .await?;
    Ok(Json(record.object).into_response())
}
