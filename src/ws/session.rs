//! Per-connection session lifecycle
//!
//! `Connecting` is the span of [`ClientSession::handshake`]; a successful
//! handshake yields a session in [`SessionPhase::Authenticated`], a `join`
//! moves it to [`SessionPhase::Joined`], and [`ClientSession::close`]
//! consumes it. Inbound frames for one connection are handled one at a time
//! by its reader task.

use std::sync::Arc;

use crate::auth::{token_from_query, AuthError};
use crate::broadcast::broadcast_to_room;
use crate::protocol::{
    errors, AuthenticatedPayload, ClientMessage, PeerLeftPayload, ServerMessage,
    CLOSE_INVALID_TOKEN, CLOSE_MISSING_TOKEN, CLOSE_REASON_INVALID_TOKEN,
    CLOSE_REASON_MISSING_TOKEN,
};
use crate::registry::ConnectionHandle;
use crate::state::AppState;
use crate::types::{Identity, RoomId};

use super::handlers;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Authenticated,
    Joined(RoomId),
}

#[derive(Debug)]
pub struct ClientSession {
    pub(super) connection: ConnectionHandle,
    pub(super) identity: Identity,
    pub(super) phase: SessionPhase,
}

impl ClientSession {
    /// Authenticate a freshly accepted connection.
    ///
    /// On failure an `error` envelope and a close frame are queued and `None`
    /// is returned; the connection must not be used further.
    pub async fn handshake(
        state: &Arc<AppState>,
        connection: ConnectionHandle,
        token: Option<&str>,
    ) -> Option<Self> {
        let token = match token_from_query(token) {
            Ok(token) => token,
            Err(_) => {
                tracing::info!("Connection {} rejected: missing token", connection.id());
                connection.send(&ServerMessage::error(errors::MISSING_TOKEN));
                connection.close(CLOSE_MISSING_TOKEN, CLOSE_REASON_MISSING_TOKEN);
                return None;
            }
        };

        let timeout = state.settings.store_timeout;
        let verified = match tokio::time::timeout(timeout, state.verifier.verify(token)).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::InvalidToken(format!(
                "verification timed out after {:?}",
                timeout
            ))),
        };

        let identity = match verified {
            Ok(identity) => identity,
            Err(e) => {
                tracing::info!("Connection {} rejected: {}", connection.id(), e);
                connection.send(&ServerMessage::error(errors::INVALID_TOKEN));
                connection.close(CLOSE_INVALID_TOKEN, CLOSE_REASON_INVALID_TOKEN);
                return None;
            }
        };

        tracing::info!(
            "Connection {} authenticated: {} ({})",
            connection.id(),
            identity.email,
            identity.user_id
        );
        connection.send(&ServerMessage::Authenticated(AuthenticatedPayload {
            user_id: identity.user_id.clone(),
            email: identity.email.clone(),
        }));

        Some(Self {
            connection,
            identity,
            phase: SessionPhase::Authenticated,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Process one inbound text frame. Never fails: every problem is
    /// answered with an `error` envelope and leaves the phase unchanged.
    pub async fn handle_text(&mut self, state: &Arc<AppState>, text: &str) {
        let reply = match ClientMessage::parse(text) {
            Ok(msg) => handlers::handle_message(msg, self, state).await,
            Err(e) => {
                tracing::warn!(
                    "Failed to parse message from {}: {}",
                    self.identity.user_id,
                    e
                );
                Some(ServerMessage::error(errors::PROCESSING_FAILED))
            }
        };

        if let Some(reply) = reply {
            self.connection.send(&reply);
        }
    }

    /// Binary frames carry the same JSON envelopes as text frames
    pub async fn handle_binary(&mut self, state: &Arc<AppState>, bytes: &[u8]) {
        match std::str::from_utf8(bytes) {
            Ok(text) => self.handle_text(state, text).await,
            Err(e) => {
                tracing::warn!(
                    "Binary frame from {} is not UTF-8: {}",
                    self.identity.user_id,
                    e
                );
                self.connection
                    .send(&ServerMessage::error(errors::PROCESSING_FAILED));
            }
        }
    }

    /// Tear down: drop the registry entry and tell the room, if joined.
    pub async fn close(self, state: &Arc<AppState>) {
        let id = self.connection.id();
        match state.registry.unregister(id).await {
            Some(session) => {
                tracing::info!(
                    "{} left room {} (connection {})",
                    session.identity.email,
                    session.room_id,
                    id
                );
                let leave = ServerMessage::Leave(PeerLeftPayload {
                    user_id: session.identity.user_id,
                });
                broadcast_to_room(&state.registry, &session.room_id, &leave, Some(id)).await;
            }
            None => {
                tracing::info!(
                    "Connection {} for {} closed before joining a room",
                    id,
                    self.identity.user_id
                );
            }
        }
    }
}
