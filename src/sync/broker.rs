//! Realtime broker
//!
//! Per-user registry of connected device sessions. Each session owns a
//! bounded outbound channel; fan-out uses `try_send` so a slow or dead
//! session never delays a fast one. Messages carry a type and timestamp so
//! clients can deduplicate against their own delta fetches.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Wire message exchanged over a realtime session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl RealtimeMessage {
    pub fn new(kind: &str, data: serde_json::Value) -> Self {
        Self {
            kind: kind.to_string(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Initial message after a session registers
    pub fn welcome(user_id: &str, device_id: &str) -> Self {
        Self::new(
            "welcome",
            json!({ "user_id": user_id, "device_id": device_id }),
        )
    }

    pub fn pong() -> Self {
        Self::new("pong", json!({}))
    }

    /// A committed sync event for fan-out
    pub fn sync_event(data: serde_json::Value) -> Self {
        Self::new("sync_event", data)
    }
}

struct Session {
    device_id: String,
    tx: mpsc::Sender<RealtimeMessage>,
}

/// Per-user WebSocket session registry with best-effort fan-out
pub struct Broker {
    sessions: DashMap<String, Vec<Session>>,
    buffer: usize,
}

impl Broker {
    /// `buffer` is the outbound queue depth per session; when it is full
    /// further messages to that session are dropped.
    pub fn new(buffer: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            buffer,
        }
    }

    /// Register a device session and hand back its outbound receiver. The
    /// welcome message is already queued. Registering a device that is
    /// already connected replaces the stale session.
    pub fn register(&self, user_id: &str, device_id: &str) -> mpsc::Receiver<RealtimeMessage> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let _ = tx.try_send(RealtimeMessage::welcome(user_id, device_id));

        let mut sessions = self.sessions.entry(user_id.to_string()).or_default();
        sessions.retain(|s| s.device_id != device_id);
        sessions.push(Session {
            device_id: device_id.to_string(),
            tx,
        });

        info!(user_id, device_id, "realtime session registered");
        rx
    }

    /// Remove a device session; its outbound channel closes when the last
    /// sender is dropped
    pub fn unregister(&self, user_id: &str, device_id: &str) {
        if let Some(mut sessions) = self.sessions.get_mut(user_id) {
            sessions.retain(|s| s.device_id != device_id);
        }
        self.sessions.remove_if(user_id, |_, sessions| sessions.is_empty());
        info!(user_id, device_id, "realtime session removed");
    }

    /// Fan a message out to every session of `user_id` except
    /// `origin_device`. Sessions with a full buffer are skipped. Returns
    /// the number of sessions the message was queued for.
    pub fn broadcast(
        &self,
        user_id: &str,
        origin_device: Option<&str>,
        message: &RealtimeMessage,
    ) -> usize {
        let Some(sessions) = self.sessions.get(user_id) else {
            return 0;
        };

        let mut delivered = 0;
        for session in sessions.iter() {
            if origin_device == Some(session.device_id.as_str()) {
                continue;
            }
            match session.tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    counter!("shelfmark_realtime_dropped_total").increment(1);
                    warn!(
                        user_id,
                        device_id = %session.device_id,
                        "realtime buffer full, message dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(
                        user_id,
                        device_id = %session.device_id,
                        "realtime session gone, message dropped"
                    );
                }
            }
        }

        counter!("shelfmark_realtime_sent_total").increment(delivered as u64);
        delivered
    }

    /// Queue a message for one specific session. Returns false when the
    /// session is gone or its buffer is full.
    pub fn send_to(&self, user_id: &str, device_id: &str, message: &RealtimeMessage) -> bool {
        let Some(sessions) = self.sessions.get(user_id) else {
            return false;
        };
        sessions
            .iter()
            .find(|s| s.device_id == device_id)
            .map(|s| s.tx.try_send(message.clone()).is_ok())
            .unwrap_or(false)
    }

    /// Number of live sessions for a user
    pub fn session_count(&self, user_id: &str) -> usize {
        self.sessions
            .get(user_id)
            .map(|sessions| sessions.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_queues_welcome() {
        let broker = Broker::new(8);
        let mut rx = broker.register("u-1", "d-1");
        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, "welcome");
        assert_eq!(first.data["device_id"], "d-1");
    }

    #[tokio::test]
    async fn test_broadcast_excludes_origin_device() {
        let broker = Broker::new(8);
        let mut d1 = broker.register("u-1", "d-1");
        let mut d2 = broker.register("u-1", "d-2");

        // Drain welcomes
        d1.recv().await.unwrap();
        d2.recv().await.unwrap();

        let message = RealtimeMessage::sync_event(json!({ "resource_id": "b-1" }));
        let delivered = broker.broadcast("u-1", Some("d-1"), &message);
        assert_eq!(delivered, 1);

        let received = d2.recv().await.unwrap();
        assert_eq!(received.kind, "sync_event");

        // The origin device gets nothing
        assert!(d1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_does_not_cross_users() {
        let broker = Broker::new(8);
        let mut other = broker.register("u-2", "d-1");
        other.recv().await.unwrap();

        let delivered = broker.broadcast("u-1", None, &RealtimeMessage::pong());
        assert_eq!(delivered, 0);
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_buffer_drops_instead_of_blocking() {
        let broker = Broker::new(1);
        let mut rx = broker.register("u-1", "d-1");
        // Buffer holds only the welcome; both broadcasts are dropped
        assert_eq!(broker.broadcast("u-1", None, &RealtimeMessage::pong()), 0);
        assert_eq!(broker.broadcast("u-1", None, &RealtimeMessage::pong()), 0);

        assert_eq!(rx.recv().await.unwrap().kind, "welcome");
    }

    #[tokio::test]
    async fn test_send_to_targets_one_session() {
        let broker = Broker::new(8);
        let mut d1 = broker.register("u-1", "d-1");
        let mut d2 = broker.register("u-1", "d-2");
        d1.recv().await.unwrap();
        d2.recv().await.unwrap();

        assert!(broker.send_to("u-1", "d-1", &RealtimeMessage::pong()));
        assert_eq!(d1.recv().await.unwrap().kind, "pong");
        assert!(d2.try_recv().is_err());

        assert!(!broker.send_to("u-1", "d-9", &RealtimeMessage::pong()));
    }

    #[tokio::test]
    async fn test_unregister_removes_session() {
        let broker = Broker::new(8);
        let _rx = broker.register("u-1", "d-1");
        assert_eq!(broker.session_count("u-1"), 1);
        broker.unregister("u-1", "d-1");
        assert_eq!(broker.session_count("u-1"), 0);
        assert_eq!(broker.broadcast("u-1", None, &RealtimeMessage::pong()), 0);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_stale_session() {
        let broker = Broker::new(8);
        let _old = broker.register("u-1", "d-1");
        let mut new = broker.register("u-1", "d-1");
        assert_eq!(broker.session_count("u-1"), 1);

        new.recv().await.unwrap(); // welcome
        broker.broadcast("u-1", None, &RealtimeMessage::pong());
        assert_eq!(new.recv().await.unwrap().kind, "pong");
    }
}
