use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{stream::StreamExt, SinkExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vrcast_common::{ClientEvent, Error, RelayNotice};

use crate::router::Scope;
use crate::AppState;

/// `GET /ws`: the global scope, where every frame goes to all other global channels.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    upgrade(ws, state, Scope::Global, addr, &headers)
}

/// `GET /ws/:session`: a paired session of at most two channels.
pub async fn ws_session_handler(
    ws: WebSocketUpgrade,
    Path(session): Path<String>,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if !vrcast_common::is_valid_session_id(&session) {
        return (StatusCode::BAD_REQUEST, "invalid session id").into_response();
    }
    upgrade(ws, state, Scope::Session(session), addr, &headers)
}

fn upgrade(
    ws: WebSocketUpgrade,
    state: AppState,
    scope: Scope,
    addr: SocketAddr,
    headers: &HeaderMap,
) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !state.config.origins.allows(origin) {
        warn!("rejected websocket from {} with origin {:?}", addr, origin);
        return StatusCode::FORBIDDEN.into_response();
    }

    // Frames up to twice the text limit reach the read loop, which discards them.
    let socket_limit = state.config.max_text_bytes.saturating_mul(2);
    ws.max_message_size(socket_limit)
        .max_frame_size(socket_limit)
        .on_upgrade(move |socket| handle_socket(socket, state, scope, addr))
        .into_response()
}

async fn handle_socket(stream: WebSocket, state: AppState, scope: Scope, addr: SocketAddr) {
    info!("client connecting from {} ({:?})", addr, scope);
    let (mut sender, mut receiver) = stream.split();
    let (tx, mut rx) = mpsc::channel::<Arc<str>>(state.config.outbox_capacity);

    let id = match state.router.connect(scope.clone(), tx).await {
        Ok(id) => id,
        Err(Error::SessionFull(session)) => {
            if let Ok(json) = (RelayNotice::SessionFull { session }).to_json() {
                let _ = sender.send(Message::Text(json)).await;
            }
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
        Err(err) => {
            warn!("router unavailable for {}: {}", addr, err);
            return;
        }
    };

    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.to_string())).await.is_err() {
                break;
            }
        }
        let _ = disconnect_tx.try_send(());
    });

    loop {
        tokio::select! {
            _ = disconnect_rx.recv() => {
                break;
            }
            msg = receiver.next() => {
                let Some(msg) = msg else { break; };
                let Ok(msg) = msg else { break; };

                let text = match msg {
                    Message::Text(text) => text,
                    Message::Binary(_) => {
                        warn!("binary frame from channel {} discarded", id);
                        continue;
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };

                if text.len() > state.config.max_text_bytes {
                    warn!("oversized frame from channel {} discarded", id);
                    continue;
                }

                match ClientEvent::peek(&text) {
                    Ok(event) => {
                        debug!("channel {} sent {}", id, event.as_str());
                        state.router.forward(id, Arc::from(text));
                    }
                    Err(err) => {
                        warn!("channel {} from {}: {}", id, addr, err);
                    }
                }
            }
        }
    }

    state.router.disconnect(id);
    info!("client disconnected from {}", addr);
}
