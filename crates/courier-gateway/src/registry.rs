use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use courier_types::events::ServerEvent;

/// Registry of live connections: user id -> per-connection event senders.
///
/// An explicit, injectable object owned by the process lifecycle, cheap to
/// clone, safe to share across connection tasks. Users with at least one
/// registered handle are Online; `UserStatus` broadcasts fire only on the
/// Offline<->Online transition edges, never for extra handles of an already
/// online user. Rebuilt empty on restart; connections re-announce.
#[derive(Clone)]
pub struct Presence {
    inner: Arc<PresenceInner>,
}

struct PresenceInner {
    /// Broadcast channel for user-status transitions; every connection
    /// subscribes and relays to its client
    status_tx: broadcast::Sender<ServerEvent>,

    /// Per-user delivery group: user id -> connection id -> sender
    sessions: RwLock<HashMap<Uuid, HashMap<Uuid, mpsc::UnboundedSender<ServerEvent>>>>,
}

impl Presence {
    pub fn new() -> Self {
        let (status_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(PresenceInner {
                status_tx,
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to user-status transition events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.status_tx.subscribe()
    }

    /// Register a live connection for a user. Returns the connection id and
    /// the receiving end of its delivery channel. The first handle flips the
    /// user Offline -> Online and broadcasts one status event.
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let went_online = {
            let mut sessions = self.inner.sessions.write().await;
            let handles = sessions.entry(user_id).or_default();
            let was_offline = handles.is_empty();
            handles.insert(conn_id, tx);
            was_offline
        };

        if went_online {
            self.broadcast_status(user_id, true);
        }
        (conn_id, rx)
    }

    /// Remove a connection. Removing the user's last handle flips them
    /// Online -> Offline and broadcasts one status event.
    pub async fn deregister(&self, user_id: Uuid, conn_id: Uuid) {
        let went_offline = {
            let mut sessions = self.inner.sessions.write().await;
            match sessions.get_mut(&user_id) {
                Some(handles) => {
                    handles.remove(&conn_id);
                    if handles.is_empty() {
                        sessions.remove(&user_id);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if went_offline {
            self.broadcast_status(user_id, false);
        }
    }

    /// Forward an event to every live handle of a user. Best-effort: a
    /// closed channel is simply skipped.
    pub async fn send_to_user(&self, user_id: Uuid, event: ServerEvent) {
        let sessions = self.inner.sessions.read().await;
        if let Some(handles) = sessions.get(&user_id) {
            for tx in handles.values() {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Forward an event to one specific connection, e.g. an error back to
    /// the connection whose command failed.
    pub async fn send_to_connection(&self, user_id: Uuid, conn_id: Uuid, event: ServerEvent) {
        let sessions = self.inner.sessions.read().await;
        if let Some(tx) = sessions.get(&user_id).and_then(|h| h.get(&conn_id)) {
            let _ = tx.send(event);
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.sessions.read().await.contains_key(&user_id)
    }

    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.sessions.read().await.keys().copied().collect()
    }

    fn broadcast_status(&self, user_id: Uuid, online: bool) {
        let _ = self
            .inner
            .status_tx
            .send(ServerEvent::UserStatus { user_id, online });
    }
}

impl Default for Presence {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_status(event: ServerEvent, expect_user: Uuid, expect_online: bool) {
        match event {
            ServerEvent::UserStatus { user_id, online } => {
                assert_eq!(user_id, expect_user);
                assert_eq!(online, expect_online);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_then_deregister_broadcasts_one_edge_each() {
        let presence = Presence::new();
        let mut status_rx = presence.subscribe();
        let user = Uuid::new_v4();

        let (conn_id, _rx) = presence.register(user).await;
        presence.deregister(user, conn_id).await;

        assert!(!presence.is_online(user).await);
        assert_status(status_rx.recv().await.unwrap(), user, true);
        assert_status(status_rx.recv().await.unwrap(), user, false);
        assert!(status_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn second_device_does_not_broadcast() {
        let presence = Presence::new();
        let mut status_rx = presence.subscribe();
        let user = Uuid::new_v4();

        let (first, _rx1) = presence.register(user).await;
        let (second, _rx2) = presence.register(user).await;
        presence.deregister(user, first).await;
        assert!(presence.is_online(user).await);
        presence.deregister(user, second).await;

        // Exactly one online and one offline edge across both devices
        assert_status(status_rx.recv().await.unwrap(), user, true);
        assert_status(status_rx.recv().await.unwrap(), user, false);
        assert!(status_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn events_fan_out_to_every_handle() {
        let presence = Presence::new();
        let user = Uuid::new_v4();

        let (_c1, mut rx1) = presence.register(user).await;
        let (_c2, mut rx2) = presence.register(user).await;

        let event = ServerEvent::TypingIndicator {
            friend_id: Uuid::new_v4(),
            is_typing: true,
        };
        presence.send_to_user(user, event).await;

        assert!(matches!(
            rx1.recv().await,
            Some(ServerEvent::TypingIndicator { .. })
        ));
        assert!(matches!(
            rx2.recv().await,
            Some(ServerEvent::TypingIndicator { .. })
        ));
    }

    #[tokio::test]
    async fn targeted_send_reaches_only_that_connection() {
        let presence = Presence::new();
        let user = Uuid::new_v4();

        let (c1, mut rx1) = presence.register(user).await;
        let (_c2, mut rx2) = presence.register(user).await;

        presence
            .send_to_connection(
                user,
                c1,
                ServerEvent::Error {
                    message: "bad command".into(),
                },
            )
            .await;

        assert!(matches!(rx1.recv().await, Some(ServerEvent::Error { .. })));
        assert!(rx2.try_recv().is_err());
    }
}
