//! Wire protocol: every frame in either direction is `{"type": ..., "payload": ...}`.

use crate::types::*;
use serde::de::Error as _;
use serde::{Deserialize, Serialize};

/// Close code sent when the handshake carries no token
pub const CLOSE_MISSING_TOKEN: u16 = 4001;
/// Close code sent when the handshake token does not verify
pub const CLOSE_INVALID_TOKEN: u16 = 4002;

pub const CLOSE_REASON_MISSING_TOKEN: &str = "Missing token";
pub const CLOSE_REASON_INVALID_TOKEN: &str = "Invalid token";

/// Fixed texts of `error` envelopes. Clients match on these, keep them stable.
pub mod errors {
    pub const MISSING_TOKEN: &str = "Authentication token is required";
    pub const INVALID_TOKEN: &str = "Invalid or expired token";
    pub const JOIN_AS_OTHER_USER: &str = "You cannot join as another user";
    pub const USER_NOT_FOUND: &str = "User not found";
    pub const CONTENT_AND_ROOM_REQUIRED: &str = "content and roomId are required";
    pub const NOT_JOINED: &str = "Join a room before sending messages";
    pub const UNKNOWN_MESSAGE_TYPE: &str = "Unknown message type";
    pub const PROCESSING_FAILED: &str = "Failed to process message";
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// Claimed user; must match the authenticated identity
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub room_id: RoomId,
}

/// Inbound chat message. A `senderId` field, if the client sends one, is
/// dropped during deserialization.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub room_id: Option<RoomId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Join(JoinRequest),
    Message(MessageRequest),
    /// Any other `type`, including the reserved `typing` and `read`
    Unknown(String),
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl ClientMessage {
    /// Parse one inbound text frame.
    ///
    /// Fails when the frame is not JSON, has no `type`, or the payload does
    /// not have the shape its type requires.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        match raw.kind.as_str() {
            "join" => {
                let req: JoinRequest = serde_json::from_value(raw.payload)?;
                if req.room_id.is_empty() {
                    return Err(serde_json::Error::custom("roomId must not be empty"));
                }
                Ok(Self::Join(req))
            }
            "message" => Ok(Self::Message(serde_json::from_value(raw.payload)?)),
            _ => Ok(Self::Unknown(raw.kind)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedPayload {
    pub user_id: UserId,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerJoinedPayload {
    pub user_id: UserId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerLeftPayload {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    Authenticated(AuthenticatedPayload),
    /// Sent to the joiner only, oldest message first
    History(Vec<ChatMessage>),
    /// Sent to peers already in the room
    Join(PeerJoinedPayload),
    /// Sent to the whole room, sender included
    Message(ChatMessage),
    Leave(PeerLeftPayload),
    Error(String),
}

impl ServerMessage {
    pub fn error(msg: &str) -> Self {
        Self::Error(msg.to_string())
    }
}
