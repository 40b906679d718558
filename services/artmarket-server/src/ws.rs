//! WebSocket handler
//!
//! The bearer token travels in the `?token=` query parameter and is validated
//! before the upgrade completes; an invalid token never reaches the socket
//! loop. Each connection auto-joins its personal room, manages the rest of
//! its room set over `join_room`/`leave_room`, and receives only the events
//! whose room it joined. A lagging connection drops events and reconciles
//! over REST.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use artmarket_auth::{AuthError, AuthUser};
use artmarket_realtime::{
    ClientMessage, ConnectionRooms, Room, ServerEvent, DEFAULT_MAX_ROOMS,
};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsQuery>,
) -> Result<impl IntoResponse, AuthError> {
    // Validate before the upgrade; handshake failures are plain 401s
    let token = params.token.ok_or(AuthError::MissingToken)?;
    let claims = state.jwt.validate(&token)?;
    let user = AuthUser {
        id: claims.user_id()?,
        username: claims.username,
        role: claims.role,
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user: AuthUser) {
    info!(user = %user.id, username = %user.username, "ws connected");

    let (mut sender, mut receiver) = socket.split();
    let rooms = Arc::new(RwLock::new(ConnectionRooms::new(
        user.id.clone(),
        DEFAULT_MAX_ROOMS,
    )));
    let mut rx = state.hub.subscribe();

    // Forward room-filtered events to this client
    let send_rooms = rooms.clone();
    let send_task = tokio::spawn(async move {
        loop {
            let envelope = match rx.recv().await {
                Ok(envelope) => envelope,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "ws receiver lagged, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if !send_rooms.read().wants(&envelope) {
                continue;
            }
            let payload = serde_json::json!({
                "room": envelope.room.to_string(),
                "event": envelope.event,
            });
            if let Ok(json) = serde_json::to_string(&payload) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                let client_msg = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        debug!(error = %e, "unparseable ws message");
                        continue;
                    }
                };
                handle_client_message(&state, &user, &rooms, client_msg);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    send_task.abort();
    info!(user = %user.id, "ws disconnected");
}

fn handle_client_message(
    state: &AppState,
    user: &AuthUser,
    rooms: &RwLock<ConnectionRooms>,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::JoinRoom { room } => {
            let room = match Room::parse(&room) {
                Ok(room) => room,
                Err(e) => {
                    debug!(error = %e, "join rejected");
                    return;
                }
            };
            // Personal rooms are private
            if matches!(&room, Room::User(id) if id != &user.id) {
                debug!(user = %user.id, "refused join of foreign personal room");
                return;
            }
            match rooms.write().join(room.clone()) {
                Ok(true) => debug!(user = %user.id, room = %room, "joined room"),
                Ok(false) => {}
                Err(e) => warn!(user = %user.id, error = %e, "join failed"),
            }
        }
        ClientMessage::LeaveRoom { room } => {
            if let Ok(room) = Room::parse(&room) {
                rooms.write().leave(&room);
            }
        }
        ClientMessage::TypingStart { conversation_id } => {
            publish_typing(state, user, conversation_id, true);
        }
        ClientMessage::TypingStop { conversation_id } => {
            publish_typing(state, user, conversation_id, false);
        }
    }
}

/// Typing indicators are relayed to the conversation room and never persisted
fn publish_typing(
    state: &AppState,
    user: &AuthUser,
    conversation_id: artmarket_types::ConversationId,
    typing: bool,
) {
    state.hub.publish(
        Room::Conversation(conversation_id.clone()),
        ServerEvent::UserTyping {
            conversation_id,
            user_id: user.id.clone(),
            username: user.username.clone(),
            typing,
        },
    );
}
