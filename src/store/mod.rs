mod memory;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::types::*;

pub use memory::MemoryStore;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the user directory and history store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("user not found: {0}")]
    UserNotFound(UserId),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Point lookups against the user table
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user_by_id(&self, id: &UserId) -> StoreResult<Option<User>>;
}

/// Durable message history, one independent write per chat message
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Create the room if it does not exist yet. Idempotent.
    async fn ensure_room(&self, room_id: &RoomId) -> StoreResult<()>;

    /// Persist a message and return it with its denormalized sender.
    async fn insert_message(
        &self,
        room_id: &RoomId,
        sender_id: &UserId,
        content: &str,
    ) -> StoreResult<ChatMessage>;

    /// The `limit` most recent messages of a room, oldest first.
    /// An unknown room has no messages.
    async fn list_messages(&self, room_id: &RoomId, limit: usize) -> StoreResult<Vec<ChatMessage>>;
}

/// Run a store call under a deadline so one slow backend cannot stall a
/// connection's handler.
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}
