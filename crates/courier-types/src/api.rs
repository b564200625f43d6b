use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MessagePayload, UserProfile};

// -- JWT Claims --

/// JWT claims shared across courier-api (REST middleware) and the gateway
/// (WebSocket upgrade authentication). Canonical definition lives here in
/// courier-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProfile,
}

// -- Profile --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}

// -- Friend requests --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendFriendRequestRequest {
    pub friend_code: String,
}

#[derive(Debug, Serialize)]
pub struct PendingRequestResponse {
    pub id: Uuid,
    pub sender: UserProfile,
    pub created_at: DateTime<Utc>,
}

// -- Friends --

#[derive(Debug, Serialize)]
pub struct FriendResponse {
    pub id: Uuid,
    pub username: String,
    pub friend_code: String,
    pub avatar_url: Option<String>,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DashboardFriend {
    pub id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
    pub online: bool,
}

#[derive(Debug, Serialize)]
pub struct RecentChat {
    pub friend_id: Uuid,
    pub last_message: MessagePayload,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub friends: Vec<DashboardFriend>,
    pub recent_chats: Vec<RecentChat>,
}

// -- Blocks --

#[derive(Debug, Serialize)]
pub struct BlockedUserResponse {
    pub id: Uuid,
    pub username: String,
    pub friend_code: String,
    pub avatar_url: Option<String>,
    pub blocked_at: DateTime<Utc>,
}
