//! Prometheus metrics endpoint.
//!
//! Serves `/metrics` in the Prometheus text format and `/health` for
//! liveness probes.

use axum::{Extension, Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{BindSnafu, MetricsError, PrometheusInitSnafu};

/// Histogram buckets are drained on this cadence when nobody scrapes.
const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Install the Prometheus recorder and serve it on `addr`.
///
/// The listener is bound before returning so a taken port fails startup.
pub async fn init(addr: SocketAddr) -> Result<(), MetricsError> {
    let listener = TcpListener::bind(addr).await.context(BindSnafu { addr })?;
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    tokio::spawn(upkeep(handle.clone()));
    tokio::spawn(serve(listener, handle));

    info!(%addr, "Metrics endpoint listening");
    Ok(())
}

async fn upkeep(handle: PrometheusHandle) {
    let mut ticker = tokio::time::interval(UPKEEP_INTERVAL);
    loop {
        ticker.tick().await;
        handle.run_upkeep();
    }
}

async fn serve(listener: TcpListener, handle: PrometheusHandle) {
    let app = Router::new()
        .route("/metrics", get(render))
        .route("/health", get(|| async { "ok\n" }))
        .layer(Extension(handle));

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "Metrics server stopped");
    }
}

async fn render(Extension(handle): Extension<PrometheusHandle>) -> String {
    handle.render()
}
