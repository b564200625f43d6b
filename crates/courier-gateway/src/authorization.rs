//! Relationship authorization: pure decision functions over store state read
//! immediately before the decision. No network I/O, no store writes; the
//! caller acts on the decision.

use anyhow::Result;
use uuid::Uuid;

use courier_db::Database;

use crate::error::RoutingError;

/// Whether messaging between a pair is permitted right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageGate {
    Allowed,
    NotFriends,
    Blocked,
}

impl MessageGate {
    pub fn check(self) -> Result<(), RoutingError> {
        match self {
            Self::Allowed => Ok(()),
            Self::NotFriends => Err(RoutingError::NotFriends),
            Self::Blocked => Err(RoutingError::Blocked),
        }
    }
}

/// Outcome of attempting to send a friend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    Allowed,
    SelfRequest,
    AlreadyFriends,
    AlreadyPending,
    /// The receiver already has a pending request to the sender; the caller
    /// must resolve both pending rows into a friendship atomically.
    AutoAccept,
}

/// Messaging is allowed iff a friendship row exists for the pair and no
/// block exists in either direction. Friendship rows come in mirrored pairs,
/// so a single-direction lookup suffices and the gate is symmetric.
pub fn message_gate(db: &Database, actor: Uuid, counterparty: Uuid) -> Result<MessageGate> {
    let a = actor.to_string();
    let b = counterparty.to_string();

    if !db.are_friends(&a, &b)? {
        return Ok(MessageGate::NotFriends);
    }
    if db.block_exists_between(&a, &b)? {
        return Ok(MessageGate::Blocked);
    }
    Ok(MessageGate::Allowed)
}

pub fn can_message(db: &Database, actor: Uuid, counterparty: Uuid) -> Result<bool> {
    Ok(message_gate(db, actor, counterparty)? == MessageGate::Allowed)
}

/// Decide whether `sender` may open a friend request to `receiver`. Blocks do
/// not gate requests; they only gate messaging.
pub fn request_decision(db: &Database, sender: Uuid, receiver: Uuid) -> Result<RequestDecision> {
    if sender == receiver {
        return Ok(RequestDecision::SelfRequest);
    }

    let s = sender.to_string();
    let r = receiver.to_string();

    if db.are_friends(&s, &r)? {
        return Ok(RequestDecision::AlreadyFriends);
    }
    if db.find_request(&s, &r)?.is_some() {
        return Ok(RequestDecision::AlreadyPending);
    }
    if db.find_request(&r, &s)?.is_some() {
        return Ok(RequestDecision::AutoAccept);
    }
    Ok(RequestDecision::Allowed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Database, Uuid, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        db.create_user(&a.to_string(), "alice", "hash", "AAA111")
            .unwrap();
        db.create_user(&b.to_string(), "bob", "hash", "BBB222")
            .unwrap();
        (db, a, b)
    }

    #[test]
    fn strangers_cannot_message() {
        let (db, a, b) = setup();
        assert_eq!(message_gate(&db, a, b).unwrap(), MessageGate::NotFriends);
    }

    #[test]
    fn can_message_is_symmetric() {
        let (db, a, b) = setup();
        db.create_friendship(&a.to_string(), &b.to_string()).unwrap();
        assert!(can_message(&db, a, b).unwrap());
        assert!(can_message(&db, b, a).unwrap());

        // A block in one direction suppresses both
        db.insert_block(&a.to_string(), &b.to_string()).unwrap();
        assert!(!can_message(&db, a, b).unwrap());
        assert!(!can_message(&db, b, a).unwrap());
        assert_eq!(message_gate(&db, b, a).unwrap(), MessageGate::Blocked);
    }

    #[test]
    fn request_decision_table() {
        let (db, a, b) = setup();

        assert_eq!(
            request_decision(&db, a, a).unwrap(),
            RequestDecision::SelfRequest
        );
        assert_eq!(request_decision(&db, a, b).unwrap(), RequestDecision::Allowed);

        db.insert_friend_request(&Uuid::new_v4().to_string(), &a.to_string(), &b.to_string())
            .unwrap();
        assert_eq!(
            request_decision(&db, a, b).unwrap(),
            RequestDecision::AlreadyPending
        );
        assert_eq!(
            request_decision(&db, b, a).unwrap(),
            RequestDecision::AutoAccept
        );

        db.accept_into_friendship(&a.to_string(), &b.to_string())
            .unwrap();
        assert_eq!(
            request_decision(&db, a, b).unwrap(),
            RequestDecision::AlreadyFriends
        );
        assert_eq!(
            request_decision(&db, b, a).unwrap(),
            RequestDecision::AlreadyFriends
        );
    }

    #[test]
    fn blocks_do_not_gate_requests() {
        let (db, a, b) = setup();
        db.insert_block(&b.to_string(), &a.to_string()).unwrap();
        assert_eq!(request_decision(&db, a, b).unwrap(), RequestDecision::Allowed);
    }
}
