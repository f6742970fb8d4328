//! WebSocket connection handler
//!
//! Fans the event bus out to dashboard clients. Every [`BotEvent`] is
//! forwarded as its serde-tagged JSON form; a slow client lags on its own
//! queue without ever blocking the feed or the engine.

use crate::api::server::AppState;
use crate::events::BotEvent;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    info!("[Api] Dashboard client connected");

    // Current connection state immediately, so the client renders without
    // waiting for the next change.
    let hello = BotEvent::ConnectionChange(state.connection.snapshot());
    if let Ok(json) = serde_json::to_string(&hello) {
        let _ = sender.send(Message::Text(json)).await;
    }

    let mut events = state.bus.subscribe();

    // Forward bus events to this client
    let send_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let Ok(json) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(json)).await.is_err() {
                        debug!("[Api] WebSocket send failed, client disconnected");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("[Api] Dashboard client lagged {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Drain the client side until it hangs up
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => {
                    info!("[Api] WebSocket client sent close");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("[Api] WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    info!("[Api] Dashboard client disconnected");
}
