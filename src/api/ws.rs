//! Realtime WebSocket endpoint
//!
//! Each connection registers a device session with the broker, then runs a
//! writer task draining the session's outbound channel and a reader loop
//! handling client messages. Outbound writes respect a per-message
//! deadline so one stuck socket cannot pin the writer.

use crate::api::AppState;
use crate::sync::{service, RealtimeMessage};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use chrono::{DateTime, Utc};
use futures_util::stream::StreamExt;
use futures_util::SinkExt;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: String,
    pub device_id: String,
}

/// Message shape accepted from clients
#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_session(state, query.user_id, query.device_id, socket))
}

async fn handle_session(state: Arc<AppState>, user_id: String, device_id: String, socket: WebSocket) {
    let mut outbound = state.broker.register(&user_id, &device_id);
    let (mut sink, mut stream) = socket.split();
    let send_deadline = state.config.sync.send_deadline;

    // Writer: drain the session channel onto the socket
    let writer_user = user_id.clone();
    let writer_device = device_id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(user_id = %writer_user, "unserializable realtime message: {}", e);
                    continue;
                }
            };
            match tokio::time::timeout(send_deadline, sink.send(Message::Text(text))).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(user_id = %writer_user, device_id = %writer_device, "socket write failed: {}", e);
                    break;
                }
                Err(_) => {
                    warn!(user_id = %writer_user, device_id = %writer_device, "socket write deadline exceeded");
                    break;
                }
            }
        }
    });

    // Reader: handle client messages until disconnect
    let reader_state = state.clone();
    let reader_user = user_id.clone();
    let reader_device = device_id.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => {
                    handle_client_message(&reader_state, &reader_user, &reader_device, &text).await;
                }
                Message::Close(_) => break,
                // Protocol-level ping/pong is handled by the transport
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    state.broker.unregister(&user_id, &device_id);
    info!(user_id, device_id, "realtime session closed");
}

async fn handle_client_message(state: &AppState, user_id: &str, device_id: &str, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(user_id, "ignoring malformed realtime message: {}", e);
            return;
        }
    };

    match message.kind.as_str() {
        "ping" => {
            state
                .broker
                .send_to(user_id, device_id, &RealtimeMessage::pong());
        }
        "sync_request" => {
            let since = message
                .data
                .get("last_sync_time")
                .and_then(|value| {
                    serde_json::from_value::<DateTime<Utc>>(value.clone()).ok()
                })
                .unwrap_or_else(|| DateTime::<Utc>::MIN_UTC);

            match service::delta(state.db.pool(), user_id, device_id, since).await {
                Ok(events) => {
                    debug!(user_id, device_id, count = events.len(), "sync_request delta");
                    for event in events {
                        let message = RealtimeMessage::sync_event(serde_json::json!({
                            "id": event.id,
                            "event_type": event.event_type,
                            "resource_id": event.resource_id,
                            "action": event.action,
                            "device_id": event.device_id,
                            "payload": event.payload,
                            "created_at": event.created_at,
                        }));
                        if !state.broker.send_to(user_id, device_id, &message) {
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!(user_id, device_id, "sync_request delta failed: {}", e);
                }
            }
        }
        other => {
            debug!(user_id, kind = other, "unrecognized realtime message type");
        }
    }
}
