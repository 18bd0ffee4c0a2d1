use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

use super::{HistoryStore, StoreError, StoreResult, UserDirectory};
use crate::types::*;

/// In-process user directory and history store.
///
/// Enforces the same referential rules a relational backend would: a
/// message needs an existing room and an existing sender.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<UserId, User>>,
    /// Messages per room, in insertion order
    rooms: RwLock<HashMap<RoomId, Vec<ChatMessage>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let users = users.into_iter().map(|u| (u.id.clone(), u)).collect();
        Self {
            users: RwLock::new(users),
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Seed the directory from a JSON array of users
    pub async fn from_users_file(path: &Path) -> StoreResult<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::Backend(format!("{}: {}", path.display(), e)))?;
        let users: Vec<User> = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Backend(format!("{}: {}", path.display(), e)))?;
        tracing::info!("Loaded {} users from {}", users.len(), path.display());
        Ok(Self::with_users(users))
    }

    pub async fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_user_by_id(&self, id: &UserId) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.get(id).cloned())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn ensure_room(&self, room_id: &RoomId) -> StoreResult<()> {
        self.rooms
            .write()
            .await
            .entry(room_id.clone())
            .or_default();
        Ok(())
    }

    async fn insert_message(
        &self,
        room_id: &RoomId,
        sender_id: &UserId,
        content: &str,
    ) -> StoreResult<ChatMessage> {
        let sender = self
            .users
            .read()
            .await
            .get(sender_id)
            .map(User::summary)
            .ok_or_else(|| StoreError::UserNotFound(sender_id.clone()))?;

        let mut rooms = self.rooms.write().await;
        let messages = rooms
            .get_mut(room_id)
            .ok_or_else(|| StoreError::RoomNotFound(room_id.clone()))?;

        // Keep createdAt non-decreasing within a room even if the clock steps back
        let now = chrono::Utc::now();
        let created_at = match messages.last() {
            Some(last) if last.created_at > now => last.created_at,
            _ => now,
        };

        let message = ChatMessage {
            id: ulid::Ulid::new().to_string(),
            content: content.to_string(),
            sender_id: sender_id.clone(),
            room_id: room_id.clone(),
            created_at,
            sender,
        };
        messages.push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, room_id: &RoomId, limit: usize) -> StoreResult<Vec<ChatMessage>> {
        let rooms = self.rooms.read().await;
        let Some(messages) = rooms.get(room_id) else {
            return Ok(Vec::new());
        };
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }
}
