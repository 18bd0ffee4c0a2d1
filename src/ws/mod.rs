pub mod handlers;
pub mod session;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;

use crate::registry::ConnectionHandle;
use crate::state::AppState;

pub use session::{ClientSession, SessionPhase};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::info!(
        "WebSocket connection request (token present: {})",
        params.token.is_some()
    );

    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, params: WsQuery, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (connection, mut outbound) = ConnectionHandle::new();

    // Single writer per socket: frames leave in the order they were queued
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sender.send(msg).await.is_err() || closing {
                break;
            }
        }
        // Stop accepting frames so broadcasters see the connection as gone
        outbound.close();
    });

    let Some(mut session) =
        ClientSession::handshake(&state, connection.clone(), params.token.as_deref()).await
    else {
        drop(connection);
        let _ = writer.await;
        return;
    };

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                tracing::debug!("Received message: {}", text.as_str());
                session.handle_text(&state, text.as_str()).await;
            }
            Ok(Message::Binary(bytes)) => session.handle_binary(&state, &bytes).await,
            Ok(Message::Close(_)) => {
                tracing::debug!("Close frame from {}", session.identity().user_id);
                break;
            }
            Ok(Message::Ping(data)) => {
                if !connection.send_raw(Message::Pong(data)) {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("WebSocket error for {}: {}", session.identity().user_id, e);
                break;
            }
        }
    }

    session.close(&state).await;
    drop(connection);
    writer.abort();
}
