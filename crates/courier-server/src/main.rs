use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use courier_api::auth::{self, AppState, AppStateInner};
use courier_api::middleware::require_auth;
use courier_api::{blocks, friend_requests, friends, messages, users};
use courier_gateway::connection;
use courier_gateway::delivery::Delivery;
use courier_gateway::registry::Presence;
use courier_types::api::Claims;

#[derive(Clone)]
struct ServerState {
    app: AppState,
    delivery: Delivery,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("COURIER_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("COURIER_DB_PATH").unwrap_or_else(|_| "courier.db".into());
    let host = std::env::var("COURIER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("COURIER_PORT")
        .unwrap_or_else(|_| "5000".into())
        .parse()?;

    // Init database
    let db = Arc::new(courier_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state: the presence registry is owned here and injected into
    // both the delivery router and the REST state
    let presence = Presence::new();
    let delivery = Delivery::new(db.clone(), presence.clone());
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: jwt_secret.clone(),
        presence,
    });

    // Routes
    let public_routes = Router::new()
        .route("/api/users/signup", post(auth::signup))
        .route("/api/users/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route(
            "/api/users/profile",
            get(users::get_profile).put(users::update_profile),
        )
        .route(
            "/api/friend-requests",
            post(friend_requests::send_friend_request).get(friend_requests::list_pending_requests),
        )
        .route(
            "/api/friend-requests/accept/{request_id}",
            post(friend_requests::accept_friend_request),
        )
        .route(
            "/api/friend-requests/decline/{request_id}",
            post(friend_requests::decline_friend_request),
        )
        .route("/api/friends", get(friends::list_friends))
        .route("/api/friends/dashboard", get(friends::dashboard))
        .route("/api/friends/{friend_id}", delete(friends::remove_friend))
        .route(
            "/api/messages/{friend_id}",
            get(messages::get_messages).delete(messages::delete_chat),
        )
        .route("/api/blocks", get(blocks::list_blocked_users))
        .route(
            "/api/blocks/{blocked_id}",
            post(blocks::block_user).delete(blocks::unblock_user),
        )
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state.clone());

    let ws_route = Router::new().route("/ws", get(ws_upgrade)).with_state(ServerState {
        app: app_state,
        delivery,
        jwt_secret,
    });

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Courier server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// The live channel authenticates once at the HTTP upgrade, with the same
/// bearer credential as REST: header for native clients, `?token=` for
/// browsers that cannot set headers on WebSocket requests.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = query.token.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|s| s.to_string())
    });
    let Some(token) = token else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let claims = match decode::<Claims>(
        &token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    ) {
        Ok(data) => data.claims,
        Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
    };

    // Confirm the account still exists before joining the delivery group
    let db = state.app.db.clone();
    let sub = claims.sub.to_string();
    match tokio::task::spawn_blocking(move || db.get_user_by_id(&sub)).await {
        Ok(Ok(Some(_))) => {}
        _ => return StatusCode::UNAUTHORIZED.into_response(),
    }

    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.delivery, claims.sub, claims.username)
    })
    .into_response()
}
