use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use courier_gateway::error::RoutingError;

/// REST-side failure taxonomy. Every handler converts failures into one of
/// these; nothing escapes to crash the process.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(_) | ApiError::Conflict(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::Internal(e) => {
                error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({ "message": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<RoutingError> for ApiError {
    fn from(e: RoutingError) -> Self {
        match e {
            RoutingError::NotFriends => ApiError::NotFound(e.to_string()),
            RoutingError::MessageNotFound => ApiError::NotFound(e.to_string()),
            RoutingError::Blocked => ApiError::Forbidden(e.to_string()),
            RoutingError::NotReceiver => ApiError::Forbidden(e.to_string()),
            RoutingError::Invalid(m) => ApiError::Validation(m),
            RoutingError::Internal(e) => ApiError::Internal(e),
        }
    }
}
