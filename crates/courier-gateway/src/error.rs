use thiserror::Error;

/// Failure taxonomy for routing and delivery. The live channel renders these
/// as `error` events on the same connection; the REST layer maps them onto
/// status codes.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("Friendship not found")]
    NotFriends,

    #[error("Cannot message this user due to a block")]
    Blocked,

    #[error("Message not found")]
    MessageNotFound,

    #[error("Not authorized to update this message")]
    NotReceiver,

    #[error("{0}")]
    Invalid(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}
