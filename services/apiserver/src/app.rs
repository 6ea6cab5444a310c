//! API server HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, configures middleware, and defines the shared
//! application state injected into handlers.
use crate::api;
use crate::storage::Storage;
use axum::Router;
use axum::routing::get;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            )
        });

    Router::new()
        .route("/healthz", get(api::system::healthz))
        .route(
            "/clusters/:cluster/*path",
            get(api::resources::get_handler)
                .post(api::resources::post_handler)
                .put(api::resources::put_handler)
                .patch(api::resources::patch_handler)
                .delete(api::resources::delete_handler),
        )
        .layer(trace_layer)
        .with_state(state)
}
