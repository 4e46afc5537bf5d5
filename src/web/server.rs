use super::api::{get_status, health_check, StatusState};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn router(state: Arc<StatusState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the status API until `shutdown` fires
pub async fn run_server(
    listen_addr: SocketAddr,
    state: Arc<StatusState>,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!(addr = %listen_addr, "Status server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Status server shutting down");
        })
        .await
}
