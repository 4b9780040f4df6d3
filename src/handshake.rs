//! Session lifecycle & handshake bridge: validates the upgrade, prepares
//! a session in the background, and hands off to the message pump once
//! it's ready (or times out).
//!
//! Grounded on `core/websocket_handler.py`'s `handle_client` for the
//! overall shape and `RobustWebSocketServerProtocol.py` for gate
//! ordering (§4.2 step 1: scan protector, then header validation, then
//! proceed).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::base_info::BaseInfo;
use crate::error::HandshakeError;
use crate::frames::{ClientFrame, ServerFrame};
use crate::pump;
use crate::session::Session;
use crate::state::AppState;

pub async fn healthy() -> impl IntoResponse {
    "healthy\n"
}

/// Every path, any method: a WebSocket upgrade is handed off to the
/// handshake bridge; anything else gets the unconditional `OK\n` (§4.2
/// step 1).
pub async fn ws_or_ok(
    ws: Option<WebSocketUpgrade>,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let Some(ws) = ws else {
        return "OK\n".into_response();
    };

    if let Err(e) = state.abuse_gate.admit(&addr.ip().to_string(), &headers) {
        return reject(e);
    }

    let base_info = BaseInfo::from_param(query.get("param").map(String::as_str));
    let session_id = Uuid::new_v4().to_string();

    ws.on_upgrade(move |socket| handle_socket(socket, state, base_info, session_id))
}

fn reject(error: HandshakeError) -> Response {
    let status = match error {
        HandshakeError::Banned => axum::http::StatusCode::FORBIDDEN,
        HandshakeError::InvalidHeaders | HandshakeError::InvalidUpgrade => axum::http::StatusCode::BAD_REQUEST,
    };
    (status, error.to_string()).into_response()
}

async fn handle_socket(mut socket: WebSocket, state: AppState, base_info: BaseInfo, session_id: String) {
    let rx = state.readiness.create(session_id.clone());

    {
        let state = state.clone();
        let base_info = base_info.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move {
            prepare_session(state, base_info, session_id).await;
        });
    }

    let Some(session) = state.readiness.wait(rx).await else {
        tracing::warn!(session_id, "readiness timed out, closing socket");
        let _ = socket
            .send(WsMessage::Close(Some(CloseFrame {
                code: 1008,
                reason: "Gemini initialization failed".into(),
            })))
            .await;
        return;
    };

    run_session(socket, state, session).await;
}

/// Pull a session from the warmup pool and register it; resolves the
/// readiness promise on success, cancels it on failure so the socket
/// handler doesn't hang past the timeout for nothing.
async fn prepare_session(state: AppState, base_info: BaseInfo, session_id: String) {
    let upstream = match state.pool.acquire(&base_info).await {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::error!(session_id, error = %e, "failed to prepare upstream session");
            state.readiness.cancel(&session_id);
            return;
        }
    };

    let session = Arc::new(Session::new(session_id.clone(), base_info, upstream, Arc::clone(&state.mq_producer)));
    state.sessions.add(Arc::clone(&session));
    state.readiness.complete(&session_id, session);
}

async fn run_session(socket: WebSocket, state: AppState, session: Arc<Session>) {
    let session_id = session.id.clone();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (from_client_tx, from_client_rx) = mpsc::unbounded_channel::<ClientFrame>();
    let (to_client_tx, mut to_client_rx) = mpsc::unbounded_channel::<ServerFrame>();

    let _ = to_client_tx.send(ServerFrame::Ready { ready: true, session_id: session_id.clone() });

    let writer = tokio::spawn(async move {
        while let Some(frame) = to_client_rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else { continue };
            if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            if let WsMessage::Text(text) = msg {
                match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => {
                        if from_client_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        tracing::debug!("dropping malformed client frame");
                    }
                }
            }
        }
    });

    let executor = Arc::clone(&state.tool_executor);
    let factory = Arc::clone(&state.factory);
    let close_info = pump::run(Arc::clone(&session), from_client_rx, to_client_tx, executor, factory).await;

    tracing::info!(session_id, reason = %close_info.reason, "session pump finished");

    reader.abort();
    writer.abort();
    state.sessions.remove(&session_id);
}
