use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use ledger::types::{GameId, LedgerSummary, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

use crate::AppState;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAction {
    Buy,
    Sell,
}

// Notification types that can be sent to users
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NotificationType {
    #[serde(rename = "ledger_updated")]
    LedgerUpdated {
        game_id: GameId,
        action: LedgerAction,
        summary: LedgerSummary,
    },
    #[serde(rename = "connection_established")]
    ConnectionEstablished { user_id: UserId, message: String },
    #[serde(rename = "auth_failed")]
    AuthFailed { reason: String },
}

// Global notification manager
pub type NotificationManager = Arc<Mutex<HashMap<UserId, broadcast::Sender<NotificationType>>>>;

// Create a new notification manager
pub fn create_notification_manager() -> NotificationManager {
    Arc::new(Mutex::new(HashMap::new()))
}

// WebSocket handler
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// First message a client sends on the socket
#[derive(Debug, Deserialize)]
struct AuthMessage {
    #[serde(rename = "sessionId")]
    session_id: String,
}

type SocketSender = futures_util::stream::SplitSink<WebSocket, Message>;
type SocketReceiver = futures_util::stream::SplitStream<WebSocket>;

async fn send_json(sender: &mut SocketSender, notification: &NotificationType) -> bool {
    match serde_json::to_string(notification) {
        Ok(text) => sender.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize notification");
            true
        }
    }
}

// Reads the auth message and resolves it to a user, or explains why not
async fn authenticate(receiver: &mut SocketReceiver, state: &AppState) -> Result<UserId, String> {
    let text = match receiver.next().await {
        Some(Ok(Message::Text(text))) => text,
        Some(Ok(Message::Close(_))) | None => {
            return Err("connection closed before authentication".to_string());
        }
        Some(Err(e)) => return Err(format!("socket error: {}", e)),
        Some(Ok(_)) => return Err("expected a text message".to_string()),
    };

    let auth: AuthMessage =
        serde_json::from_str(&text).map_err(|e| format!("invalid message format: {}", e))?;

    state
        .storage
        .get_user_by_session_id(&auth.session_id)
        .map(|user| user.user_id)
        .ok_or_else(|| "invalid session ID".to_string())
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let user_id = match authenticate(&mut receiver, &state).await {
        Ok(user_id) => user_id,
        Err(reason) => {
            tracing::warn!(%reason, "WebSocket authentication failed");
            let _ = send_json(&mut sender, &NotificationType::AuthFailed { reason }).await;
            return;
        }
    };

    // One channel per user; a newer socket replaces an older one
    let (tx, mut rx) = broadcast::channel(100);
    state
        .notification_manager
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(user_id, tx.clone());

    tracing::info!(user_id, "WebSocket subscribed to ledger updates");

    let established = NotificationType::ConnectionEstablished {
        user_id,
        message: "Subscribed to ledger updates".to_string(),
    };

    if send_json(&mut sender, &established).await {
        // Drain client messages until the socket closes
        let incoming = async {
            while let Some(msg) = receiver.next().await {
                match msg {
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(user_id, error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
        };

        let outgoing = async {
            loop {
                match rx.recv().await {
                    Ok(notification) => {
                        if !send_json(&mut sender, &notification).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(user_id, skipped, "WebSocket subscriber lagging");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        tokio::select! {
            _ = incoming => {}
            _ = outgoing => {}
        }
    }

    // Only unregister if a newer socket has not taken our place
    let mut manager = state
        .notification_manager
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if manager.get(&user_id).is_some_and(|current| current.same_channel(&tx)) {
        manager.remove(&user_id);
    }

    tracing::info!(user_id, "WebSocket connection closed");
}

pub fn send_notification_to_user(
    notification_manager: &NotificationManager,
    user_id: UserId,
    notification: NotificationType,
) {
    let manager = notification_manager
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(tx) = manager.get(&user_id) {
        // No receiver just means the user has no socket open right now
        if let Err(e) = tx.send(notification) {
            tracing::debug!("Failed to send notification to user {}: {}", user_id, e);
        }
    }
}

// Tell the user's open sockets that one of their ledgers changed
pub fn send_ledger_update(
    notification_manager: &NotificationManager,
    user_id: UserId,
    game_id: GameId,
    action: LedgerAction,
    summary: LedgerSummary,
) {
    send_notification_to_user(
        notification_manager,
        user_id,
        NotificationType::LedgerUpdated {
            game_id,
            action,
            summary,
        },
    );
}
