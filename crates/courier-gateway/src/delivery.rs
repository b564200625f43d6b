use std::sync::Arc;

use chrono::Utc;
use tracing::error;
use uuid::Uuid;

use courier_db::Database;
use courier_db::models::parse_uuid;
use courier_types::events::ServerEvent;
use courier_types::models::{MessageKind, MessagePayload, MessageStatus, UserSummary};

use crate::authorization;
use crate::error::RoutingError;
use crate::registry::Presence;

/// Message routing and delivery: authorize, persist, then forward to live
/// connections. The stored row is the source of truth; live forwarding is a
/// best-effort notification layer with no retry or redelivery queue; an
/// offline recipient picks the message up on their next history fetch.
#[derive(Clone)]
pub struct Delivery {
    db: Arc<Database>,
    presence: Presence,
}

impl Delivery {
    pub fn new(db: Arc<Database>, presence: Presence) -> Self {
        Self { db, presence }
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    /// Persist a message with status `sent`, forward it to every live handle
    /// of the receiver, and echo it to the sender's own handles so multi-tab
    /// senders stay in sync.
    pub async fn send_message(
        &self,
        sender: UserSummary,
        friend_id: Uuid,
        kind: MessageKind,
        content: Option<String>,
        media_url: Option<String>,
    ) -> Result<MessagePayload, RoutingError> {
        let sender_id = sender.id;

        self.run_db(move |db| authorization::message_gate(db, sender_id, friend_id))
            .await?
            .check()?;

        let message_id = Uuid::new_v4();
        {
            let content = content.clone();
            let media_url = media_url.clone();
            self.run_db(move |db| {
                db.insert_message(
                    &message_id.to_string(),
                    &sender_id.to_string(),
                    &friend_id.to_string(),
                    kind.as_str(),
                    content.as_deref(),
                    media_url.as_deref(),
                )
            })
            .await?;
        }

        let payload = MessagePayload {
            id: message_id,
            sender_id,
            receiver_id: friend_id,
            kind,
            content,
            media_url,
            status: MessageStatus::Sent,
            created_at: Utc::now(),
            sender,
        };

        self.presence
            .send_to_user(friend_id, ServerEvent::NewMessage(payload.clone()))
            .await;
        self.presence
            .send_to_user(sender_id, ServerEvent::MessageSent(payload.clone()))
            .await;

        Ok(payload)
    }

    /// Receiver-side acknowledgement. Only the message's receiver may update
    /// its status; the transition is stored and forwarded to the sender's
    /// live handles.
    pub async fn update_status(
        &self,
        actor: Uuid,
        message_id: Uuid,
        status: MessageStatus,
    ) -> Result<(), RoutingError> {
        let row = self
            .run_db(move |db| db.get_message(&message_id.to_string()))
            .await?
            .ok_or(RoutingError::MessageNotFound)?;

        if parse_uuid(&row.receiver_id) != actor {
            return Err(RoutingError::NotReceiver);
        }

        self.run_db(move |db| db.set_message_status(&message_id.to_string(), status.as_str()))
            .await?;

        self.presence
            .send_to_user(
                parse_uuid(&row.sender_id),
                ServerEvent::MessageStatusUpdate { message_id, status },
            )
            .await;

        Ok(())
    }

    /// Ephemeral typing signal: gated like send, forwarded, never persisted.
    pub async fn typing(
        &self,
        actor: Uuid,
        friend_id: Uuid,
        is_typing: bool,
    ) -> Result<(), RoutingError> {
        self.run_db(move |db| authorization::message_gate(db, actor, friend_id))
            .await?
            .check()?;

        self.presence
            .send_to_user(
                friend_id,
                ServerEvent::TypingIndicator {
                    friend_id: actor,
                    is_typing,
                },
            )
            .await;

        Ok(())
    }

    /// Run a blocking store call off the async runtime.
    async fn run_db<T, F>(&self, f: F) -> Result<T, RoutingError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                RoutingError::Internal(anyhow::anyhow!(e))
            })?
            .map_err(RoutingError::Internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        delivery: Delivery,
        db: Arc<Database>,
        alice: UserSummary,
        bob: UserSummary,
    }

    fn setup() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let alice = UserSummary {
            id: Uuid::new_v4(),
            username: "alice".into(),
        };
        let bob = UserSummary {
            id: Uuid::new_v4(),
            username: "bob".into(),
        };
        db.create_user(&alice.id.to_string(), "alice", "hash", "AAA111")
            .unwrap();
        db.create_user(&bob.id.to_string(), "bob", "hash", "BBB222")
            .unwrap();
        db.create_friendship(&alice.id.to_string(), &bob.id.to_string())
            .unwrap();

        let delivery = Delivery::new(db.clone(), Presence::new());
        Fixture {
            delivery,
            db,
            alice,
            bob,
        }
    }

    #[tokio::test]
    async fn send_persists_and_forwards_to_both_sides() {
        let f = setup();
        let (_conn, mut bob_rx) = f.delivery.presence().register(f.bob.id).await;
        let (_conn, mut alice_rx) = f.delivery.presence().register(f.alice.id).await;

        let payload = f
            .delivery
            .send_message(
                f.alice.clone(),
                f.bob.id,
                MessageKind::Text,
                Some("hi".into()),
                None,
            )
            .await
            .unwrap();
        assert_eq!(payload.status, MessageStatus::Sent);

        // Receiver gets the message, sender gets the echo
        match bob_rx.recv().await.unwrap() {
            ServerEvent::NewMessage(m) => assert_eq!(m.id, payload.id),
            other => panic!("unexpected event: {other:?}"),
        }
        match alice_rx.recv().await.unwrap() {
            ServerEvent::MessageSent(m) => assert_eq!(m.id, payload.id),
            other => panic!("unexpected event: {other:?}"),
        }

        // And the row is durably there
        let stored = f.db.get_message(&payload.id.to_string()).unwrap().unwrap();
        assert_eq!(stored.content.as_deref(), Some("hi"));
        assert_eq!(stored.status, "sent");
    }

    #[tokio::test]
    async fn send_to_offline_receiver_still_persists() {
        let f = setup();

        let payload = f
            .delivery
            .send_message(f.alice.clone(), f.bob.id, MessageKind::Text, Some("hi".into()), None)
            .await
            .unwrap();

        assert!(f.db.get_message(&payload.id.to_string()).unwrap().is_some());
    }

    #[tokio::test]
    async fn blocked_send_is_rejected_and_never_persisted() {
        let f = setup();
        f.db.insert_block(&f.bob.id.to_string(), &f.alice.id.to_string())
            .unwrap();

        let result = f
            .delivery
            .send_message(f.alice.clone(), f.bob.id, MessageKind::Text, Some("hi".into()), None)
            .await;
        assert!(matches!(result, Err(RoutingError::Blocked)));
        assert!(
            f.db.list_conversation(&f.alice.id.to_string(), &f.bob.id.to_string())
                .unwrap()
                .is_empty()
        );

        // Unblock and the identical call goes through
        f.db.delete_block(&f.bob.id.to_string(), &f.alice.id.to_string())
            .unwrap();
        let payload = f
            .delivery
            .send_message(f.alice.clone(), f.bob.id, MessageKind::Text, Some("hi".into()), None)
            .await
            .unwrap();
        assert_eq!(payload.status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn stranger_send_is_rejected() {
        let f = setup();
        let carol = UserSummary {
            id: Uuid::new_v4(),
            username: "carol".into(),
        };
        f.db.create_user(&carol.id.to_string(), "carol", "hash", "CCC333")
            .unwrap();

        let result = f
            .delivery
            .send_message(carol, f.alice.id, MessageKind::Text, Some("hi".into()), None)
            .await;
        assert!(matches!(result, Err(RoutingError::NotFriends)));
    }

    #[tokio::test]
    async fn only_the_receiver_may_update_status() {
        let f = setup();
        let payload = f
            .delivery
            .send_message(f.alice.clone(), f.bob.id, MessageKind::Text, Some("hi".into()), None)
            .await
            .unwrap();

        // Sender cannot self-acknowledge
        let result = f
            .delivery
            .update_status(f.alice.id, payload.id, MessageStatus::Seen)
            .await;
        assert!(matches!(result, Err(RoutingError::NotReceiver)));

        // Receiver can; the sender's live handles hear about it
        let (_conn, mut alice_rx) = f.delivery.presence().register(f.alice.id).await;
        f.delivery
            .update_status(f.bob.id, payload.id, MessageStatus::Seen)
            .await
            .unwrap();

        let stored = f.db.get_message(&payload.id.to_string()).unwrap().unwrap();
        assert_eq!(stored.status, "seen");
        match alice_rx.recv().await.unwrap() {
            ServerEvent::MessageStatusUpdate { message_id, status } => {
                assert_eq!(message_id, payload.id);
                assert_eq!(status, MessageStatus::Seen);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_message_status_update_fails() {
        let f = setup();
        let result = f
            .delivery
            .update_status(f.bob.id, Uuid::new_v4(), MessageStatus::Delivered)
            .await;
        assert!(matches!(result, Err(RoutingError::MessageNotFound)));
    }

    #[tokio::test]
    async fn typing_forwards_without_persisting() {
        let f = setup();
        let (_conn, mut bob_rx) = f.delivery.presence().register(f.bob.id).await;

        f.delivery.typing(f.alice.id, f.bob.id, true).await.unwrap();

        match bob_rx.recv().await.unwrap() {
            ServerEvent::TypingIndicator {
                friend_id,
                is_typing,
            } => {
                assert_eq!(friend_id, f.alice.id);
                assert!(is_typing);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(
            f.db.list_conversation(&f.alice.id.to_string(), &f.bob.id.to_string())
                .unwrap()
                .is_empty()
        );
    }
}
