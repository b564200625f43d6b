use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand::Rng;
use tracing::error;
use uuid::Uuid;

use courier_db::Database;
use courier_gateway::registry::Presence;
use courier_types::api::{AuthResponse, Claims, LoginRequest, SignupRequest};

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub presence: Presence,
}

impl AppStateInner {
    /// Run a blocking store call off the async runtime.
    pub(crate) async fn run_db<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal(anyhow::anyhow!(e))
            })?
            .map_err(ApiError::Internal)
    }
}

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    if username.is_empty() || req.password.is_empty() {
        return Err(ApiError::Validation(
            "Username and password are required".into(),
        ));
    }

    {
        let username = username.clone();
        if state
            .run_db(move |db| db.username_exists(&username))
            .await?
        {
            return Err(ApiError::Conflict("Username already exists".into()));
        }
    }

    let friend_code = unique_friend_code(&state).await?;

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hash failed: {}", e)))?
        .to_string();

    let user_id = Uuid::new_v4();
    let user = {
        let username = username.clone();
        let friend_code = friend_code.clone();
        state
            .run_db(move |db| {
                db.create_user(&user_id.to_string(), &username, &password_hash, &friend_code)?;
                db.get_user_by_id(&user_id.to_string())
            })
            .await?
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("user vanished after signup")))?
    };

    let token = create_token(&state.jwt_secret, user_id, &username)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: user.into_profile(),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    let user = {
        let username = username.clone();
        state
            .run_db(move |db| db.get_user_by_username(&username))
            .await?
            .ok_or_else(|| ApiError::Validation("Invalid credentials".into()))?
    };

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt password hash: {}", e)))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Validation("Invalid credentials".into()))?;

    let user_id = courier_db::models::parse_uuid(&user.id);
    let token = create_token(&state.jwt_secret, user_id, &user.username)?;

    Ok(Json(AuthResponse {
        token,
        user: user.into_profile(),
    }))
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(7)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(anyhow::anyhow!("token encode failed: {}", e)))
}

/// Three random uppercase letters followed by three random digits, retried
/// until globally unique.
fn generate_friend_code() -> String {
    let mut rng = rand::rng();
    let mut code = String::with_capacity(6);
    for _ in 0..3 {
        code.push((b'A' + rng.random_range(0..26)) as char);
    }
    for _ in 0..3 {
        code.push((b'0' + rng.random_range(0..10)) as char);
    }
    code
}

async fn unique_friend_code(state: &AppStateInner) -> Result<String, ApiError> {
    loop {
        let code = generate_friend_code();
        let exists = {
            let code = code.clone();
            state.run_db(move |db| db.friend_code_exists(&code)).await?
        };
        if !exists {
            return Ok(code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn friend_codes_are_three_letters_three_digits() {
        for _ in 0..100 {
            let code = generate_friend_code();
            assert_eq!(code.len(), 6);
            assert!(code[..3].chars().all(|c| c.is_ascii_uppercase()));
            assert!(code[3..].chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn token_roundtrips_through_validation() {
        use jsonwebtoken::{DecodingKey, Validation, decode};

        let user_id = Uuid::new_v4();
        let token = create_token("test-secret", user_id, "alice").unwrap();

        let data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"test-secret"),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(data.claims.sub, user_id);
        assert_eq!(data.claims.username, "alice");
    }
}
