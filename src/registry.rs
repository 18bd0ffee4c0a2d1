//! Live connection registry: which authenticated connection listens in which room.

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use ulid::Ulid;

use crate::protocol::ServerMessage;
use crate::types::{Identity, RoomId};

pub type ConnectionId = Ulid;

/// Frames a connection may have waiting for its writer before new ones are dropped
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Addressable handle to one live connection.
///
/// Frames are queued on a bounded channel drained in order by the
/// connection's writer task, so every recipient sees frames in the order
/// they were enqueued. When a slow reader lets its queue fill up, further
/// frames for it are dropped. Cloning the handle does not keep the socket
/// alive once the writer has stopped.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Message>,
}

impl ConnectionHandle {
    pub fn new() -> (Self, mpsc::Receiver<Message>) {
        Self::with_capacity(OUTBOUND_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                id: Ulid::new(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Serialize and queue one envelope. Returns false if the connection is gone.
    pub fn send(&self, msg: &ServerMessage) -> bool {
        match serde_json::to_string(msg) {
            Ok(json) => self.send_frame(json.into()),
            Err(e) => {
                tracing::error!("Failed to serialize server message: {}", e);
                false
            }
        }
    }

    /// Queue an already serialized text frame
    pub fn send_frame(&self, frame: Utf8Bytes) -> bool {
        self.send_raw(Message::Text(frame))
    }

    /// Queue a frame without waiting. Returns false if the connection is
    /// gone or its queue is full; the frame is dropped in both cases.
    pub fn send_raw(&self, msg: Message) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Outbound queue full for connection {}, dropping frame", self.id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a close frame; the writer stops after flushing it.
    pub fn close(&self, code: u16, reason: &'static str) -> bool {
        self.send_raw(Message::Close(Some(CloseFrame {
            code,
            reason: Utf8Bytes::from_static(reason),
        })))
    }
}

/// A joined connection: who it is and which room it listens to
#[derive(Debug, Clone)]
pub struct Session {
    pub connection: ConnectionHandle,
    pub identity: Identity,
    pub room_id: RoomId,
}

/// Owner of every live session, keyed by connection.
///
/// One lock guards the whole map. Each operation holds it for exactly one
/// insert, removal or snapshot; room membership is derived from the map on
/// every lookup and never stored separately.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<ConnectionId, Session>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the session for its connection, returning the one replaced
    pub async fn register(&self, session: Session) -> Option<Session> {
        let id = session.connection.id();
        self.sessions.write().await.insert(id, session)
    }

    /// Remove a connection's session. Removing twice is harmless.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Session> {
        self.sessions.write().await.remove(&id)
    }

    pub async fn session(&self, id: ConnectionId) -> Option<Session> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Point-in-time snapshot of everyone currently in `room_id`, in no particular order
    pub async fn sessions_in_room(&self, room_id: &str) -> Vec<Session> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.room_id == room_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Number of rooms with at least one live session
    pub async fn room_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .map(|s| s.room_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn identity(user_id: &str) -> Identity {
        Identity {
            user_id: user_id.to_string(),
            email: format!("{}@example.com", user_id),
            role: "user".to_string(),
        }
    }

    fn session(user_id: &str, room_id: &str) -> (Session, mpsc::Receiver<Message>) {
        let (connection, rx) = ConnectionHandle::new();
        (
            Session {
                connection,
                identity: identity(user_id),
                room_id: room_id.to_string(),
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let (s, _rx) = session("u1", "r1");
        let id = s.connection.id();

        assert!(registry.register(s).await.is_none());
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.session(id).await.unwrap().room_id, "r1");
    }

    #[tokio::test]
    async fn test_register_overwrites_room() {
        let registry = ConnectionRegistry::new();
        let (s, _rx) = session("u1", "r1");
        let id = s.connection.id();
        registry.register(s.clone()).await;

        let moved = Session {
            room_id: "r2".to_string(),
            ..s
        };
        let previous = registry.register(moved).await.unwrap();

        assert_eq!(previous.room_id, "r1");
        assert_eq!(registry.len().await, 1);
        assert!(registry.sessions_in_room("r1").await.is_empty());
        assert_eq!(registry.sessions_in_room("r2").await[0].connection.id(), id);
    }

    #[tokio::test]
    async fn test_unregister_twice_is_noop() {
        let registry = ConnectionRegistry::new();
        let (s, _rx) = session("u1", "r1");
        let id = s.connection.id();
        registry.register(s).await;

        assert!(registry.unregister(id).await.is_some());
        assert!(registry.unregister(id).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_sessions_in_room_filters_by_room() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = session("u1", "r1");
        let (b, _rb) = session("u2", "r1");
        let (c, _rc) = session("u3", "r2");
        registry.register(a).await;
        registry.register(b).await;
        registry.register(c).await;

        let mut in_r1: Vec<String> = registry
            .sessions_in_room("r1")
            .await
            .into_iter()
            .map(|s| s.identity.user_id)
            .collect();
        in_r1.sort();
        assert_eq!(in_r1, vec!["u1", "u2"]);
        assert_eq!(registry.sessions_in_room("r2").await.len(), 1);
        assert!(registry.sessions_in_room("r3").await.is_empty());
        assert_eq!(registry.room_count().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_register_while_snapshotting() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut receivers = Vec::new();
        let mut tasks = Vec::new();

        for i in 0..50 {
            let (s, rx) = session(&format!("u{}", i), "r1");
            receivers.push(rx);
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.register(s).await;
                registry.sessions_in_room("r1").await.len()
            }));
        }

        for task in tasks {
            let seen = task.await.unwrap();
            assert!((1..=50).contains(&seen));
        }
        assert_eq!(registry.sessions_in_room("r1").await.len(), 50);
    }

    #[tokio::test]
    async fn test_handle_reports_closed_receiver() {
        let (connection, rx) = ConnectionHandle::new();
        assert!(connection.is_open());
        assert!(connection.send(&ServerMessage::error("x")));

        drop(rx);
        assert!(!connection.is_open());
        assert!(!connection.send(&ServerMessage::error("x")));
    }

    #[tokio::test]
    async fn test_full_queue_drops_new_frames() {
        let (connection, mut rx) = ConnectionHandle::with_capacity(2);
        assert!(connection.send(&ServerMessage::error("first")));
        assert!(connection.send(&ServerMessage::error("second")));

        assert!(!connection.send(&ServerMessage::error("third")));
        assert!(connection.is_open());

        // Draining makes room again
        assert!(rx.try_recv().is_ok());
        assert!(connection.send(&ServerMessage::error("fourth")));
        let queued: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|msg| match msg {
                Message::Text(t) => t.as_str().to_string(),
                other => panic!("Expected text frame, got {:?}", other),
            })
            .collect();
        assert_eq!(queued.len(), 2);
        assert!(queued[0].contains("second"));
        assert!(queued[1].contains("fourth"));
    }
}
