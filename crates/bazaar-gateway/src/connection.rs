use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, warn};
use uuid::Uuid;

use bazaar_chat::ChatError;
use bazaar_types::events::{GatewayCommand, GatewayEvent};
use bazaar_types::models::User;

use crate::Gateway;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Per-connection auth state. `user` is bound exactly once, on successful
/// token redemption; room memberships live in the Dispatcher and are torn
/// down with the session.
struct Session {
    id: Uuid,
    user: Option<User>,
}

/// Handle a single WebSocket connection from accept to disconnect.
///
/// The connection starts unauthenticated; the only accepted first step is an
/// `auth` command redeeming an exchange token. Everything else gets an error
/// event and changes nothing.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway) {
    let (mut sender, mut receiver) = socket.split();

    let (session_id, mut session_rx) = gateway.dispatcher.register().await;
    info!("session {} connected", session_id);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward dispatcher events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = session_rx.recv() => {
                    let Some(event) = result else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("event serialization failed: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
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

    // Read commands from client
    let gateway_recv = gateway.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut session = Session {
            id: session_id,
            user: None,
        };

        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&gateway_recv, &mut session, cmd).await,
                    Err(e) => {
                        warn!(
                            "session {} bad command: {} -- raw: {}",
                            session.id,
                            e,
                            text.get(..text.len().min(200)).unwrap_or(text.as_str())
                        );
                        send_error(&gateway_recv, session.id, "Invalid message data").await;
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

    gateway.dispatcher.remove_session(session_id).await;
    info!("session {} disconnected", session_id);
}

async fn handle_command(gateway: &Gateway, session: &mut Session, cmd: GatewayCommand) {
    let result = match cmd {
        GatewayCommand::Auth { token } => handle_auth(gateway, session, &token).await,
        GatewayCommand::Listen { chat_id } => handle_listen(gateway, session, chat_id).await,
    };

    if let Err(err) = result {
        let message = match err {
            ChatError::Storage(e) => {
                error!("session {} command failed: {:#}", session.id, e);
                "Something went wrong".to_string()
            }
            other => other.to_string(),
        };
        send_error(gateway, session.id, &message).await;
    }
}

/// Redeem the exchange token, bind the user to the session and auto-join the
/// rooms of every chat they currently belong to.
async fn handle_auth(gateway: &Gateway, session: &mut Session, token: &str) -> Result<(), ChatError> {
    if session.user.is_some() {
        // re-auth is not supported within a session
        send_error(gateway, session.id, "Already authenticated").await;
        return Ok(());
    }

    let user_id = gateway.tokens.consume(token).ok_or(ChatError::InvalidToken)?;

    let db = gateway.db.clone();
    let user = tokio::task::spawn_blocking(move || db.get_user(user_id))
        .await
        .map_err(|e| ChatError::Storage(anyhow::anyhow!("blocking task failed: {}", e)))??
        // the account vanished between issue and redeem; surfaced identically
        .ok_or(ChatError::InvalidToken)?;

    let chats = gateway.chats.list_chats(&user).await?;
    let chat_ids: Vec<i64> = chats.iter().map(|chat| chat.id).collect();
    gateway.dispatcher.join_rooms(&chat_ids, session.id).await;

    info!("session {} authenticated as user {}", session.id, user.id);
    session.user = Some(user);
    gateway
        .dispatcher
        .send_to_session(session.id, GatewayEvent::Auth)
        .await;
    Ok(())
}

/// Subscribe to one chat's room, gated on chat membership.
async fn handle_listen(gateway: &Gateway, session: &Session, chat_id: i64) -> Result<(), ChatError> {
    let user = session.user.as_ref().ok_or(ChatError::NotAuthenticated)?;

    let chat = gateway
        .chats
        .find_chat(user, chat_id)
        .await?
        .ok_or(ChatError::NotFound)?;

    gateway.dispatcher.join_room(chat.id, session.id).await;
    Ok(())
}

async fn send_error(gateway: &Gateway, session_id: Uuid, message: &str) {
    gateway
        .dispatcher
        .send_to_session(
            session_id,
            GatewayEvent::Error {
                message: message.to_string(),
            },
        )
        .await;
}
