//! API error types and helpers.
//!
//! # Purpose and responsibility
//! Translates [`StoreError`] into HTTP responses carrying a Kubernetes
//! `Status` body, so clients built for a native cluster API can interpret
//! failures (notably `410 Gone`, which means re-list and re-watch).
use crate::api::types::Status;
use crate::store::StoreError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Structured API error returned by handlers.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: Status,
}

impl ApiError {
    pub fn new(status: StatusCode, reason: &str, message: &str) -> Self {
        Self {
            status,
            body: Status::failure(status.as_u16(), reason, message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::NotFound(msg) => api_not_found(msg),
            StoreError::KindNotSynchronized { .. } => api_not_found(&err.to_string()),
            StoreError::Conflict(msg) => api_conflict("Conflict", msg),
            StoreError::Expired(msg) => api_gone(msg),
            StoreError::Invalid(msg) => api_bad_request(msg),
            StoreError::BackendUnavailable(_) => {
                tracing::warn!(error = %err, "storage backend unavailable");
                ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "ServiceUnavailable",
                    "storage backend unavailable",
                )
            }
            StoreError::SchemaMismatch(_) | StoreError::Unexpected(_) => {
                api_internal("storage error", &err)
            }
        }
    }
}

pub fn api_not_found(message: &str) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "NotFound", message)
}

pub fn api_conflict(reason: &str, message: &str) -> ApiError {
    ApiError::new(StatusCode::CONFLICT, reason, message)
}

pub fn api_gone(message: &str) -> ApiError {
    ApiError::new(StatusCode::GONE, "Expired", message)
}

pub fn api_bad_request(message: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "BadRequest", message)
}

pub fn api_unsupported_media_type(message: &str) -> ApiError {
    ApiError::new(
        StatusCode::UNSUPPORTED_MEDIA_TYPE,
        "UnsupportedMediaType",
        message,
    )
}

pub fn api_method_not_allowed(message: &str) -> ApiError {
    ApiError::new(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed", message)
}

/// Logs the store error and returns a generic internal error response.
pub fn api_internal(message: &str, err: &StoreError) -> ApiError {
    tracing::error!(error = ?err, "apiserver storage error");
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Gvk;

    #[test]
    fn store_errors_map_to_kubernetes_statuses() {
        let cases = [
            (StoreError::NotFound("x".into()), 404, "NotFound"),
            (
                StoreError::KindNotSynchronized {
                    cluster: "east".into(),
                    gvk: Gvk::new("apps", "v1", "Deployment"),
                },
                404,
                "NotFound",
            ),
            (StoreError::Conflict("x".into()), 409, "Conflict"),
            (StoreError::Expired("x".into()), 410, "Expired"),
            (StoreError::Invalid("x".into()), 400, "BadRequest"),
            (StoreError::BackendUnavailable("x".into()), 503, "ServiceUnavailable"),
            (StoreError::SchemaMismatch("x".into()), 500, "InternalError"),
            (StoreError::Unexpected(anyhow::anyhow!("boom")), 500, "InternalError"),
        ];
        for (err, code, reason) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status.as_u16(), code);
            assert_eq!(api.body.code, code);
            assert_eq!(api.body.reason, reason);
            assert_eq!(api.body.kind, "Status");
            assert_eq!(api.body.status, "Failure");
        }
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = StoreError::SchemaMismatch("column object is not jsonb".into());
        let api = api_internal("storage failed", &err);
        assert_eq!(api.body.message, "storage failed");
    }
}
