pub mod auth;
pub mod blocks;
pub mod error;
pub mod friend_requests;
pub mod friends;
pub mod messages;
pub mod middleware;
pub mod users;
