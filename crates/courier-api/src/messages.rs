use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use courier_gateway::authorization::{self, MessageGate};
use courier_types::api::Claims;
use courier_types::models::MessagePayload;

use crate::auth::AppState;
use crate::error::ApiError;

/// Full chat history with a friend, oldest first. Side effect: everything the
/// friend sent that the caller had not yet seen is bulk-marked seen. The
/// response carries the pre-transition statuses, matching what the caller's
/// client had before opening the chat.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(friend_id): Path<Uuid>,
) -> Result<Json<Vec<MessagePayload>>, ApiError> {
    let me = claims.sub;

    let (gate, rows) = state
        .run_db(move |db| {
            let gate = authorization::message_gate(db, me, friend_id)?;
            if gate != MessageGate::Allowed {
                return Ok((gate, Vec::new()));
            }
            let rows = db.list_conversation(&me.to_string(), &friend_id.to_string())?;
            db.mark_seen(&friend_id.to_string(), &me.to_string())?;
            Ok((gate, rows))
        })
        .await?;
    gate.check()?;

    let messages = rows.into_iter().map(|row| row.into_payload()).collect();
    Ok(Json(messages))
}

/// Hide the conversation for the caller only. Messages are retained and the
/// friend's view is unaffected.
pub async fn delete_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(friend_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let me = claims.sub.to_string();
    let friend = friend_id.to_string();

    let (is_friend, already_hidden) = {
        let me = me.clone();
        let friend = friend.clone();
        state
            .run_db(move |db| {
                let is_friend = db.are_friends(&me, &friend)?;
                let already_hidden = db.chat_hidden(&me, &friend)?;
                Ok((is_friend, already_hidden))
            })
            .await?
    };

    if !is_friend {
        return Err(ApiError::NotFound("Friendship not found".into()));
    }
    if already_hidden {
        return Err(ApiError::Validation("Chat already deleted".into()));
    }

    state.run_db(move |db| db.hide_chat(&me, &friend)).await?;

    Ok(Json(serde_json::json!({ "message": "Chat deleted successfully" })))
}
