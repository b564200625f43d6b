use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use courier_db::models::{parse_timestamp, parse_uuid};
use courier_types::api::{Claims, DashboardFriend, DashboardResponse, FriendResponse, RecentChat};

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn list_friends(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<FriendResponse>>, ApiError> {
    let me = claims.sub.to_string();
    let rows = state.run_db(move |db| db.list_friends(&me)).await?;

    let friends = rows
        .into_iter()
        .map(|row| FriendResponse {
            id: parse_uuid(&row.friend.id),
            username: row.friend.username,
            friend_code: row.friend.friend_code,
            avatar_url: row.friend.avatar_url,
            since: parse_timestamp(&row.since),
        })
        .collect();

    Ok(Json(friends))
}

pub async fn remove_friend(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(friend_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let me = claims.sub.to_string();
    let friend = friend_id.to_string();

    let existed = {
        let me = me.clone();
        let friend = friend.clone();
        state.run_db(move |db| db.are_friends(&me, &friend)).await?
    };
    if !existed {
        return Err(ApiError::NotFound("Friendship not found".into()));
    }

    // Both directed rows go together; the remover's chat view is hidden too
    state
        .run_db(move |db| {
            db.remove_friendship(&me, &friend)?;
            db.hide_chat(&me, &friend)
        })
        .await?;

    Ok(Json(serde_json::json!({ "message": "Friend removed successfully" })))
}

/// Home-screen data: friends filtered by blocks and hidden chats, live
/// presence flags, and the most recent message per visible conversation.
pub async fn dashboard(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<DashboardResponse>, ApiError> {
    let me = claims.sub.to_string();

    let (rows, blocked, hidden) = {
        let me = me.clone();
        state
            .run_db(move |db| {
                let rows = db.list_friends(&me)?;
                let blocked = db.blocked_ids(&me)?;
                let hidden = db.hidden_chat_ids(&me)?;
                Ok((rows, blocked, hidden))
            })
            .await?
    };

    let mut friends = Vec::new();
    let mut recent_chats = Vec::new();

    for row in rows {
        if blocked.contains(&row.friend.id) || hidden.contains(&row.friend.id) {
            continue;
        }
        let friend_id = parse_uuid(&row.friend.id);

        friends.push(DashboardFriend {
            id: friend_id,
            username: row.friend.username,
            avatar_url: row.friend.avatar_url,
            online: state.presence.is_online(friend_id).await,
        });

        let last = {
            let me = me.clone();
            let other = row.friend.id.clone();
            state
                .run_db(move |db| db.last_message_between(&me, &other))
                .await?
        };
        if let Some(message) = last {
            recent_chats.push(RecentChat {
                friend_id,
                last_message: message.into_payload(),
            });
        }
    }

    recent_chats.sort_by(|a, b| b.last_message.created_at.cmp(&a.last_message.created_at));

    Ok(Json(DashboardResponse {
        friends,
        recent_chats,
    }))
}
