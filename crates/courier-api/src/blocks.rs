use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use courier_db::models::{parse_timestamp, parse_uuid};
use courier_types::api::{BlockedUserResponse, Claims};

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn block_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(blocked_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if blocked_id == claims.sub {
        return Err(ApiError::Validation("You cannot block yourself".into()));
    }

    let me = claims.sub.to_string();
    let target = blocked_id.to_string();

    let already = {
        let me = me.clone();
        let target = target.clone();
        state
            .run_db(move |db| db.block_exists(&me, &target))
            .await?
    };
    if already {
        return Err(ApiError::Conflict("User is already blocked".into()));
    }

    let blocked_user = {
        let target = target.clone();
        state
            .run_db(move |db| db.get_user_by_id(&target))
            .await?
            .ok_or_else(|| ApiError::NotFound("User to block not found".into()))?
    };

    state
        .run_db(move |db| db.insert_block(&me, &target))
        .await?;

    let body = serde_json::json!({
        "message": "User blocked successfully",
        "blocked_user": {
            "id": blocked_id,
            "username": blocked_user.username,
        },
    });
    Ok((StatusCode::CREATED, Json(body)))
}

pub async fn unblock_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(blocked_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let me = claims.sub.to_string();
    let target = blocked_id.to_string();

    let removed = state.run_db(move |db| db.delete_block(&me, &target)).await?;
    if !removed {
        return Err(ApiError::NotFound("Block record not found".into()));
    }

    Ok(Json(serde_json::json!({ "message": "User unblocked successfully" })))
}

pub async fn list_blocked_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<BlockedUserResponse>>, ApiError> {
    let me = claims.sub.to_string();
    let rows = state.run_db(move |db| db.list_blocks(&me)).await?;

    let blocked = rows
        .into_iter()
        .map(|row| BlockedUserResponse {
            id: parse_uuid(&row.blocked.id),
            username: row.blocked.username,
            friend_code: row.blocked.friend_code,
            avatar_url: row.blocked.avatar_url,
            blocked_at: parse_timestamp(&row.blocked_at),
        })
        .collect();

    Ok(Json(blocked))
}
