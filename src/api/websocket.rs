//! WebSocket endpoint listeners attach to
//!
//! Text frames are forwarded verbatim to the hit relay, which validates
//! them. Nothing is sent back: relay-side drops are silent to the listener.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::StreamExt;

use super::ApiState;

/// Build WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(State(state): State<Arc<ApiState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle one listener connection
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    let clients = state.presence.attach();
    tracing::info!(clients, "listener connected");

    // Pings are answered by axum; we only read
    let (_sender, mut receiver) = socket.split();

    while let Some(message) = receiver.next().await {
        let frame = match message {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    tracing::warn!(len = bytes.len(), "non-UTF-8 binary frame dropped");
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "listener connection error");
                break;
            }
        };

        if state.relay_inbox.send(frame).await.is_err() {
            tracing::error!("hit relay stopped, closing listener connection");
            break;
        }
    }

    let clients = state.presence.detach();
    tracing::info!(clients, "listener disconnected");
}
