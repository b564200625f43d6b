use axum::{Extension, Json, extract::State};

use courier_types::api::{Claims, UpdateProfileRequest};
use courier_types::models::UserProfile;

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserProfile>, ApiError> {
    let id = claims.sub.to_string();
    let user = state
        .run_db(move |db| db.get_user_by_id(&id))
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    Ok(Json(user.into_profile()))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    let id = claims.sub.to_string();
    let user = {
        let id = id.clone();
        state
            .run_db(move |db| db.get_user_by_id(&id))
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".into()))?
    };

    let username = match req.username {
        Some(new_name) if new_name != user.username => {
            let new_name = new_name.trim().to_string();
            if new_name.is_empty() {
                return Err(ApiError::Validation("Username cannot be empty".into()));
            }
            let taken = {
                let new_name = new_name.clone();
                state.run_db(move |db| db.username_exists(&new_name)).await?
            };
            if taken {
                return Err(ApiError::Conflict("Username already exists".into()));
            }
            new_name
        }
        _ => user.username.clone(),
    };
    let avatar_url = req.avatar_url.or(user.avatar_url);

    let updated = {
        let id = id.clone();
        state
            .run_db(move |db| {
                db.update_profile(&id, &username, avatar_url.as_deref())?;
                db.get_user_by_id(&id)
            })
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".into()))?
    };

    Ok(Json(updated.into_profile()))
}
