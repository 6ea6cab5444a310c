//! API server entry point.
//!
//! # Purpose
//! Wires configuration, the storage factory and the HTTP router, then serves
//! until shutdown.
use anyhow::Context;
use apiserver::app::{AppState, build_router};
use apiserver::config::ApiServerConfig;
use apiserver::{factory, observability};
use std::future::Future;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ApiServerConfig::from_env_or_yaml().context("api server config")?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: ApiServerConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("fleetdex-apiserver")?;
    let state = build_state(&config).await?;
    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let app = build_router(state);
    let addr = config.bind_addr;
    tracing::info!(%addr, "api server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    metrics_task.abort();
    let _ = metrics_task.await;
    Ok(())
}

async fn build_state(config: &ApiServerConfig) -> anyhow::Result<AppState> {
    let storage =
        factory::get_storage_factory(&config.storage_backend, config.storage_config.as_deref())
            .await
            .with_context(|| format!("initialize {} storage", config.storage_backend))?;
    Ok(AppState { storage })
}
