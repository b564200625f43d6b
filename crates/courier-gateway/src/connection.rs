use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use courier_types::events::{ClientCommand, ServerEvent};
use courier_types::models::UserSummary;

use crate::delivery::Delivery;
use crate::error::RoutingError;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a pre-authenticated WebSocket connection. The token was already
/// verified at the HTTP upgrade layer, so we go straight into the event loop.
/// Routing failures are reported as `error` events on this connection and
/// never terminate it.
pub async fn handle_connection(
    socket: WebSocket,
    delivery: Delivery,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, receiver) = socket.split();
    let presence = delivery.presence().clone();

    info!("{} ({}) connected", username, user_id);

    // Send who's already online so the client starts with a presence snapshot
    for uid in presence.online_users().await {
        let event = ServerEvent::UserStatus {
            user_id: uid,
            online: true,
        };
        if send_event(&mut sender, &event).await.is_err() {
            return;
        }
    }

    // Subscribe to status broadcasts before going online, so our own Online
    // edge cannot slip past us
    let status_rx = presence.subscribe();
    let (conn_id, user_rx) = presence.register(user_id).await;

    run_loop(
        sender, receiver, delivery, status_rx, user_rx, conn_id, user_id, username,
    )
    .await;
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    delivery: Delivery,
    mut status_rx: broadcast::Receiver<ServerEvent>,
    mut user_rx: tokio::sync::mpsc::UnboundedReceiver<ServerEvent>,
    conn_id: Uuid,
    user_id: Uuid,
    username: String,
) {
    let presence = delivery.presence().clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward status broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = status_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Status receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client
    let actor = UserSummary {
        id: user_id,
        username: username.clone(),
    };
    let delivery_recv = delivery.clone();
    let presence_recv = presence.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        if let Err(e) = handle_command(&delivery_recv, &actor, cmd).await {
                            report(&presence_recv, user_id, conn_id, &e).await;
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            actor.username,
                            user_id,
                            e,
                            &text[..text.len().min(200)]
                        );
                        presence_recv
                            .send_to_connection(
                                user_id,
                                conn_id,
                                ServerEvent::Error {
                                    message: "Malformed command".to_string(),
                                },
                            )
                            .await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    presence.deregister(user_id, conn_id).await;
    info!("{} ({}) disconnected", username, user_id);
}

/// Route a typed inbound command to its handler.
async fn handle_command(
    delivery: &Delivery,
    actor: &UserSummary,
    cmd: ClientCommand,
) -> Result<(), RoutingError> {
    match cmd {
        ClientCommand::SendMessage {
            friend_id,
            kind,
            content,
            media_url,
        } => {
            delivery
                .send_message(actor.clone(), friend_id, kind, content, media_url)
                .await?;
        }
        ClientCommand::UpdateMessageStatus { message_id, status } => {
            delivery.update_status(actor.id, message_id, status).await?;
        }
        ClientCommand::Typing { friend_id } => {
            delivery.typing(actor.id, friend_id, true).await?;
        }
        ClientCommand::StopTyping { friend_id } => {
            delivery.typing(actor.id, friend_id, false).await?;
        }
    }
    Ok(())
}

async fn report(
    presence: &crate::registry::Presence,
    user_id: Uuid,
    conn_id: Uuid,
    err: &RoutingError,
) {
    if let RoutingError::Internal(e) = err {
        tracing::error!("command failed for {}: {:#}", user_id, e);
    }
    presence
        .send_to_connection(
            user_id,
            conn_id,
            ServerEvent::Error {
                message: err.to_string(),
            },
        )
        .await;
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap();
    sender.send(Message::Text(text.into())).await
}
