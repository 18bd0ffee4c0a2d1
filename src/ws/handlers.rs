//! WebSocket message dispatch
//!
//! Entry point for inbound envelopes of an authenticated connection.
//! Handlers return the optional reply for the sender; fan-out to the rest of
//! the room goes through the broadcaster.

use std::sync::Arc;

use crate::broadcast::broadcast_to_room;
use crate::protocol::{
    errors, ClientMessage, JoinRequest, MessageRequest, PeerJoinedPayload, ServerMessage,
};
use crate::registry::Session;
use crate::state::AppState;
use crate::store::{bounded, StoreResult};

use super::session::{ClientSession, SessionPhase};

/// Return an `error` reply to the sender and stop handling this envelope
macro_rules! reject {
    ($msg:expr) => {
        return Ok(Some(ServerMessage::error($msg)))
    };
}

/// Handle one parsed client message and return the reply for the sender.
///
/// Store failures and timeouts are logged and answered with the generic
/// processing error; they never end the connection.
pub async fn handle_message(
    msg: ClientMessage,
    session: &mut ClientSession,
    state: &Arc<AppState>,
) -> Option<ServerMessage> {
    let result = match msg {
        ClientMessage::Join(req) => handle_join(req, session, state).await,
        ClientMessage::Message(req) => handle_chat_message(req, session, state).await,
        ClientMessage::Unknown(kind) => {
            tracing::warn!(
                "Unknown message type {:?} from {}",
                kind,
                session.identity.user_id
            );
            Ok(Some(ServerMessage::error(errors::UNKNOWN_MESSAGE_TYPE)))
        }
    };

    match result {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(
                "Failed to process message from {}: {}",
                session.identity.user_id,
                e
            );
            Some(ServerMessage::error(errors::PROCESSING_FAILED))
        }
    }
}

async fn handle_join(
    req: JoinRequest,
    session: &mut ClientSession,
    state: &Arc<AppState>,
) -> StoreResult<Option<ServerMessage>> {
    let identity = session.identity.clone();

    if req.user_id.as_deref() != Some(identity.user_id.as_str()) {
        tracing::warn!(
            "{} tried to join room {} as {:?}",
            identity.user_id,
            req.room_id,
            req.user_id
        );
        reject!(errors::JOIN_AS_OTHER_USER);
    }

    let timeout = state.settings.store_timeout;
    let Some(user) = bounded(timeout, state.users.find_user_by_id(&identity.user_id)).await? else {
        tracing::warn!("Join rejected: user {} not found", identity.user_id);
        reject!(errors::USER_NOT_FOUND);
    };

    let room_id = req.room_id;
    let previous = state
        .registry
        .register(Session {
            connection: session.connection.clone(),
            identity: identity.clone(),
            room_id: room_id.clone(),
        })
        .await;

    let history = match bounded(
        timeout,
        state.history.list_messages(&room_id, state.settings.history_limit),
    )
    .await
    {
        Ok(history) => history,
        Err(e) => {
            // Undo the registration so a failed join leaves membership as it was
            match previous {
                Some(previous) => {
                    state.registry.register(previous).await;
                }
                None => {
                    state.registry.unregister(session.connection.id()).await;
                }
            }
            return Err(e);
        }
    };

    session.phase = SessionPhase::Joined(room_id.clone());
    tracing::info!(
        "{} joined room {} ({} messages of history)",
        identity.email,
        room_id,
        history.len()
    );

    session.connection.send(&ServerMessage::History(history));

    let joined = ServerMessage::Join(PeerJoinedPayload {
        user_id: identity.user_id,
        name: user.name,
    });
    broadcast_to_room(
        &state.registry,
        &room_id,
        &joined,
        Some(session.connection.id()),
    )
    .await;

    Ok(None)
}

async fn handle_chat_message(
    req: MessageRequest,
    session: &mut ClientSession,
    state: &Arc<AppState>,
) -> StoreResult<Option<ServerMessage>> {
    if session.phase == SessionPhase::Authenticated {
        reject!(errors::NOT_JOINED);
    }

    let content = req.content.filter(|c| !c.is_empty());
    let room_id = req.room_id.filter(|r| !r.is_empty());
    let (Some(content), Some(room_id)) = (content, room_id) else {
        reject!(errors::CONTENT_AND_ROOM_REQUIRED);
    };

    let timeout = state.settings.store_timeout;
    let sender_id = &session.identity.user_id;

    bounded(timeout, state.history.ensure_room(&room_id)).await?;
    let message = bounded(
        timeout,
        state.history.insert_message(&room_id, sender_id, &content),
    )
    .await?;

    tracing::debug!("Message {} from {} in room {}", message.id, sender_id, room_id);

    broadcast_to_room(&state.registry, &room_id, &ServerMessage::Message(message), None).await;

    Ok(None)
}
