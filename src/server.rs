//! HTTP/WebSocket server startup, grounded on `proxy/server.rs`'s
//! `axum::serve(...).with_graceful_shutdown(...)` pattern.

use std::net::SocketAddr;

use axum::routing::{any, get};
use axum::Router;
use tokio::net::TcpListener;

use crate::handshake::{healthy, ws_or_ok};
use crate::state::AppState;

pub async fn serve(bind_addr: SocketAddr, state: AppState, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/healthy", get(healthy))
        .fallback(any(ws_or_ok))
        .with_state(state);

    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!(%bind_addr, "listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
