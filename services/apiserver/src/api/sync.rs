//! Read-only view of a cluster's synchronization registry.
use crate::api::error::ApiError;
use crate::api::types::SyncResourcesResponse;
use crate::app::AppState;
use axum::Json;
use axum::response::{IntoResponse, Response};

/// `GET /clusters/{cluster}/syncresources`
pub(crate) async fn list_sync_resources(
    state: &AppState,
    cluster: &str,
) -> Result<Response, ApiError> {
    let items = state.storage.sync_entries(cluster).await?;
    Ok(Json(SyncResourcesResponse {
        cluster: cluster.to_string(),
        items,
    })
    .into_response())
}
