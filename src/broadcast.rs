use crate::protocol::ServerMessage;
use crate::registry::{ConnectionId, ConnectionRegistry};

/// Deliver `msg` to every connection currently in `room_id`, except `exclude`.
///
/// The envelope is serialized once and the same frame is queued for every
/// recipient. A recipient whose connection is already gone, or whose
/// outbound queue is full, misses this frame; a gone connection is removed
/// by its own close handler. Returns how many recipients the frame was
/// queued for.
pub async fn broadcast_to_room(
    registry: &ConnectionRegistry,
    room_id: &str,
    msg: &ServerMessage,
    exclude: Option<ConnectionId>,
) -> usize {
    let frame = match serde_json::to_string(msg) {
        Ok(json) => axum::extract::ws::Utf8Bytes::from(json),
        Err(e) => {
            tracing::error!("Failed to serialize broadcast for room {}: {}", room_id, e);
            return 0;
        }
    };

    let mut delivered = 0;
    for session in registry.sessions_in_room(room_id).await {
        let id = session.connection.id();
        if Some(id) == exclude {
            continue;
        }
        if session.connection.send_frame(frame.clone()) {
            delivered += 1;
        } else {
            tracing::debug!(
                "Frame not queued for connection {} ({}) in room {}",
                id,
                session.identity.user_id,
                room_id
            );
        }
    }

    tracing::debug!("Broadcast to room {}: {} recipients", room_id, delivered);
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PeerLeftPayload;
    use crate::registry::{ConnectionHandle, Session};
    use crate::types::Identity;
    use axum::extract::ws::Message;
    use tokio::sync::mpsc::Receiver;

    async fn join(
        registry: &ConnectionRegistry,
        user_id: &str,
        room_id: &str,
    ) -> (ConnectionId, Receiver<Message>) {
        join_with_capacity(registry, user_id, room_id, 64).await
    }

    async fn join_with_capacity(
        registry: &ConnectionRegistry,
        user_id: &str,
        room_id: &str,
        capacity: usize,
    ) -> (ConnectionId, Receiver<Message>) {
        let (connection, rx) = ConnectionHandle::with_capacity(capacity);
        let id = connection.id();
        registry
            .register(Session {
                connection,
                identity: Identity {
                    user_id: user_id.to_string(),
                    email: format!("{}@example.com", user_id),
                    role: "user".to_string(),
                },
                room_id: room_id.to_string(),
            })
            .await;
        (id, rx)
    }

    fn leave(user_id: &str) -> ServerMessage {
        ServerMessage::Leave(PeerLeftPayload {
            user_id: user_id.to_string(),
        })
    }

    fn text(msg: Message) -> String {
        match msg {
            Message::Text(t) => t.as_str().to_string(),
            other => panic!("Expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_whole_room_only() {
        let registry = ConnectionRegistry::new();
        let (_a, mut ra) = join(&registry, "u1", "r1").await;
        let (_b, mut rb) = join(&registry, "u2", "r1").await;
        let (_c, mut rc) = join(&registry, "u3", "r2").await;

        let delivered = broadcast_to_room(&registry, "r1", &leave("u9"), None).await;

        assert_eq!(delivered, 2);
        let a = text(ra.try_recv().unwrap());
        let b = text(rb.try_recv().unwrap());
        assert_eq!(a, b);
        assert!(a.contains("\"leave\""));
        assert!(rc.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_honours_exclusion() {
        let registry = ConnectionRegistry::new();
        let (a, mut ra) = join(&registry, "u1", "r1").await;
        let (_b, mut rb) = join(&registry, "u2", "r1").await;

        let delivered = broadcast_to_room(&registry, "r1", &leave("u1"), Some(a)).await;

        assert_eq!(delivered, 1);
        assert!(ra.try_recv().is_err());
        assert!(rb.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_dead_recipient_does_not_stop_delivery() {
        let registry = ConnectionRegistry::new();
        let (_a, ra) = join(&registry, "u1", "r1").await;
        let (_b, mut rb) = join(&registry, "u2", "r1").await;
        drop(ra);

        let delivered = broadcast_to_room(&registry, "r1", &leave("u3"), None).await;

        assert_eq!(delivered, 1);
        assert!(rb.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_stalled_recipient_does_not_block_others() {
        let registry = ConnectionRegistry::new();
        let (_a, mut ra) = join(&registry, "u1", "r1").await;
        let (_b, mut rb) = join_with_capacity(&registry, "u2", "r1", 3).await;

        for i in 0..10 {
            let delivered =
                broadcast_to_room(&registry, "r1", &leave(&format!("u{}", i)), None).await;
            assert_eq!(delivered, if i < 3 { 2 } else { 1 });
        }

        for i in 0..10 {
            assert!(text(ra.try_recv().unwrap()).contains(&format!("\"u{}\"", i)));
        }
        // The stalled recipient kept only what fit in its queue
        for i in 0..3 {
            assert!(text(rb.try_recv().unwrap()).contains(&format!("\"u{}\"", i)));
        }
        assert!(rb.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_per_recipient_order_is_preserved() {
        let registry = ConnectionRegistry::new();
        let (_a, mut ra) = join(&registry, "u1", "r1").await;

        for i in 0..10 {
            broadcast_to_room(&registry, "r1", &leave(&format!("u{}", i)), None).await;
        }

        for i in 0..10 {
            let frame = text(ra.try_recv().unwrap());
            assert!(frame.contains(&format!("\"u{}\"", i)));
        }
    }

    #[tokio::test]
    async fn test_empty_room() {
        let registry = ConnectionRegistry::new();
        assert_eq!(
            broadcast_to_room(&registry, "r1", &leave("u1"), None).await,
            0
        );
    }
}
