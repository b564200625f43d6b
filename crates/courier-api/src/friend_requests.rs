use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use courier_db::models::parse_uuid;
use courier_gateway::authorization::{self, RequestDecision};
use courier_types::api::{Claims, PendingRequestResponse, SendFriendRequestRequest};

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn send_friend_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendFriendRequestRequest>,
) -> Result<Response, ApiError> {
    let friend_code = req.friend_code.trim().to_uppercase();
    if friend_code.is_empty() {
        return Err(ApiError::Validation("Friend code is required".into()));
    }

    let receiver = state
        .run_db(move |db| db.get_user_by_friend_code(&friend_code))
        .await?
        .ok_or_else(|| ApiError::NotFound("User with this friend code not found".into()))?;
    let receiver_id = parse_uuid(&receiver.id);
    let sender_id = claims.sub;

    let decision = state
        .run_db(move |db| authorization::request_decision(db, sender_id, receiver_id))
        .await?;

    match decision {
        RequestDecision::SelfRequest => Err(ApiError::Validation(
            "You cannot add yourself as a friend".into(),
        )),
        RequestDecision::AlreadyFriends => Err(ApiError::Conflict(
            "You are already friends with this user".into(),
        )),
        RequestDecision::AlreadyPending => {
            Err(ApiError::Conflict("Friend request already sent".into()))
        }
        RequestDecision::AutoAccept => {
            // The receiver already asked for us: resolve both pending rows
            // into the friendship pair in one transaction.
            state
                .run_db(move |db| {
                    db.accept_into_friendship(&sender_id.to_string(), &receiver_id.to_string())
                })
                .await?;

            let body = serde_json::json!({
                "message": "Friend request accepted automatically",
                "friendship": {
                    "friend_id": receiver_id,
                    "friend_username": receiver.username,
                },
            });
            Ok((StatusCode::OK, Json(body)).into_response())
        }
        RequestDecision::Allowed => {
            let request_id = Uuid::new_v4();
            state
                .run_db(move |db| {
                    db.insert_friend_request(
                        &request_id.to_string(),
                        &sender_id.to_string(),
                        &receiver_id.to_string(),
                    )
                })
                .await?;

            let body = serde_json::json!({
                "message": "Friend request sent successfully",
                "request": {
                    "id": request_id,
                    "receiver_id": receiver_id,
                    "receiver_username": receiver.username,
                },
            });
            Ok((StatusCode::CREATED, Json(body)).into_response())
        }
    }
}

pub async fn list_pending_requests(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<PendingRequestResponse>>, ApiError> {
    let me = claims.sub.to_string();
    let rows = state.run_db(move |db| db.list_pending_requests(&me)).await?;

    let pending = rows
        .into_iter()
        .map(|row| PendingRequestResponse {
            id: parse_uuid(&row.id),
            created_at: courier_db::models::parse_timestamp(&row.created_at),
            sender: row.sender.into_profile(),
        })
        .collect();

    Ok(Json(pending))
}

pub async fn accept_friend_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request = state
        .run_db(move |db| db.get_friend_request(&request_id.to_string()))
        .await?
        .ok_or_else(|| ApiError::NotFound("Friend request not found".into()))?;

    if parse_uuid(&request.receiver_id) != claims.sub {
        return Err(ApiError::Forbidden(
            "Not authorized to accept this request".into(),
        ));
    }

    let sender_id = request.sender_id.clone();
    let me = claims.sub.to_string();
    state
        .run_db(move |db| db.accept_into_friendship(&me, &sender_id))
        .await?;

    Ok(Json(serde_json::json!({
        "message": "Friend request accepted",
        "friendship": {
            "friend_id": parse_uuid(&request.sender_id),
        },
    })))
}

pub async fn decline_friend_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request = state
        .run_db(move |db| db.get_friend_request(&request_id.to_string()))
        .await?
        .ok_or_else(|| ApiError::NotFound("Friend request not found".into()))?;

    if parse_uuid(&request.receiver_id) != claims.sub {
        return Err(ApiError::Forbidden(
            "Not authorized to decline this request".into(),
        ));
    }

    state
        .run_db(move |db| db.delete_friend_request(&request_id.to_string()))
        .await?;

    Ok(Json(serde_json::json!({ "message": "Friend request declined" })))
}
