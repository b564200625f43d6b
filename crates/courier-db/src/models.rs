//! Database row types that map directly to SQLite rows.
//! Distinct from the courier-types API models to keep the DB layer
//! independent; conversion helpers live here so corrupt rows are handled in
//! one place.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use courier_types::models::{MessagePayload, UserProfile, UserSummary};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub friend_code: String,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

pub struct FriendRequestRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub created_at: String,
}

/// Pending request joined with the sender's profile fields.
pub struct PendingRequestRow {
    pub id: String,
    pub created_at: String,
    pub sender: UserRow,
}

/// Friend edge joined with the friend's profile fields.
pub struct FriendListRow {
    pub since: String,
    pub friend: UserRow,
}

/// Block joined with the blocked user's profile fields.
pub struct BlockListRow {
    pub blocked_at: String,
    pub blocked: UserRow,
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub kind: String,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub status: String,
    pub created_at: String,
    pub sender_username: String,
}

impl UserRow {
    pub fn into_profile(self) -> UserProfile {
        UserProfile {
            id: parse_uuid(&self.id),
            username: self.username,
            friend_code: self.friend_code,
            avatar_url: self.avatar_url,
            created_at: parse_timestamp(&self.created_at),
        }
    }
}

impl MessageRow {
    pub fn into_payload(self) -> MessagePayload {
        MessagePayload {
            id: parse_uuid(&self.id),
            sender_id: parse_uuid(&self.sender_id),
            receiver_id: parse_uuid(&self.receiver_id),
            kind: self.kind.parse().unwrap_or_else(|e| {
                warn!("Corrupt kind on message '{}': {}", self.id, e);
                Default::default()
            }),
            content: self.content,
            media_url: self.media_url,
            status: self.status.parse().unwrap_or_else(|e| {
                warn!("Corrupt status on message '{}': {}", self.id, e);
                Default::default()
            }),
            created_at: parse_timestamp(&self.created_at),
            sender: UserSummary {
                id: parse_uuid(&self.sender_id),
                username: self.sender_username,
            },
        }
    }
}

pub fn parse_uuid(s: &str) -> Uuid {
    s.parse().unwrap_or_else(|e| {
        warn!("Corrupt uuid '{}': {}", s, e);
        Uuid::default()
    })
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
/// Parse as naive UTC and convert, accepting RFC 3339 too.
pub fn parse_timestamp(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", s, e);
            DateTime::default()
        })
}
