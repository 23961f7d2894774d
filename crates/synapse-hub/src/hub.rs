use std::collections::HashMap;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use synapse_core::types::thread_of_channel;

use crate::buffer::MessageBuffer;
use crate::normalize::canonical_event_type;

/// Build the standard `{type, channel, payload}` event envelope.
pub fn event(event_type: &str, channel: &str, payload: Value) -> Value {
    json!({
        "type": event_type,
        "channel": channel,
        "payload": payload,
    })
}

/// Per-user WebSocket connection set with normalized broadcast.
///
/// Connections register an mpsc sender of serialized frames; the gateway's
/// per-connection task forwards them onto the socket. When a user has no
/// live connection, thread-addressed messages go to the offline buffer.
pub struct WsHub {
    /// uid → (conn_id → frame sender).
    conns: DashMap<String, HashMap<String, mpsc::Sender<String>>>,
    buffer: MessageBuffer,
}

impl WsHub {
    pub fn new(buffer: MessageBuffer) -> Self {
        Self {
            conns: DashMap::new(),
            buffer,
        }
    }

    pub fn register(&self, uid: &str, conn_id: &str, tx: mpsc::Sender<String>) {
        let mut entry = self.conns.entry(uid.to_string()).or_default();
        entry.insert(conn_id.to_string(), tx);
        info!(uid, conn_id, total = entry.len(), "ws_connect");
    }

    pub fn unregister(&self, uid: &str, conn_id: &str) {
        let mut empty = false;
        if let Some(mut entry) = self.conns.get_mut(uid) {
            entry.remove(conn_id);
            info!(uid, conn_id, total = entry.len(), "ws_disconnect");
            empty = entry.is_empty();
        }
        if empty {
            self.conns.remove_if(uid, |_, v| v.is_empty());
        }
    }

    /// Whether the user currently has at least one live connection.
    pub fn is_connected(&self, uid: &str) -> bool {
        self.conns.get(uid).map(|e| !e.is_empty()).unwrap_or(false)
    }

    /// Replay messages buffered for `(uid, thread_key)` while offline.
    /// Returns the number of messages delivered.
    pub async fn replay_buffered(&self, uid: &str, thread_key: &str) -> usize {
        let pending = self.buffer.drain(uid, thread_key).await;
        let mut delivered = 0;
        for message in &pending {
            delivered += self.broadcast(uid, message.clone()).await;
        }
        delivered
    }

    /// Normalize the event type and fan the message out to every live
    /// connection for `uid`. With no connections, thread-addressed messages
    /// (`channel` of the form `chat:…`) are buffered for later replay.
    ///
    /// Returns the number of connections the message reached.
    pub async fn broadcast(&self, uid: &str, mut message: Value) -> usize {
        let original_type = message
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let normalized = canonical_event_type(&original_type).to_string();
        if normalized != original_type {
            message["type"] = Value::String(normalized.clone());
        }

        let channel = message
            .get("channel")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let senders: Vec<(String, mpsc::Sender<String>)> = self
            .conns
            .get(uid)
            .map(|e| e.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        if senders.is_empty() {
            match thread_of_channel(&channel) {
                Some(thread_key) => {
                    self.buffer.store_pending(uid, thread_key, &message).await;
                    info!(uid, thread_key, event_type = %normalized, "ws_broadcast_buffered");
                }
                None => {
                    debug!(uid, event_type = %normalized, channel = %channel, "ws_broadcast_no_connections");
                }
            }
            return 0;
        }

        let data = message.to_string();
        let mut sent = 0;
        for (conn_id, tx) in senders {
            match tx.send(data.clone()).await {
                Ok(()) => sent += 1,
                Err(e) => error!(uid, conn_id, error = %e, "ws_send_error"),
            }
        }

        // Chunk-level logs stay at debug to avoid drowning the stream.
        if normalized == "llm.stream_delta" {
            let chunk_len = message
                .get("payload")
                .and_then(|p| p.get("chunk"))
                .and_then(Value::as_str)
                .map(str::len)
                .unwrap_or(0);
            debug!(uid, chunk_len, sent, "ws_broadcast_chunk");
        } else {
            info!(uid, event_type = %normalized, channel = %channel, sent, "ws_broadcast");
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use synapse_cache::MemoryCache;

    fn test_hub() -> WsHub {
        WsHub::new(MessageBuffer::new(Arc::new(MemoryCache::new()), 60))
    }

    #[tokio::test]
    async fn broadcast_normalizes_and_delivers() {
        let hub = test_hub();
        let (tx, mut rx) = mpsc::channel(8);
        hub.register("u1", "c1", tx);

        let sent = hub
            .broadcast(
                "u1",
                event("llm_stream_chunk", "chat:u1:ten:t1", json!({"chunk": "Hel"})),
            )
            .await;
        assert_eq!(sent, 1);

        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "llm.stream_delta");
        assert_eq!(frame["payload"]["chunk"], "Hel");
    }

    #[tokio::test]
    async fn offline_thread_messages_are_buffered_and_replayed() {
        let hub = test_hub();
        let sent = hub
            .broadcast(
                "u1",
                event("CARD", "chat:u1:ten:t1", json!({"card_name": "x"})),
            )
            .await;
        assert_eq!(sent, 0);

        // Non-thread channels are dropped, not buffered.
        hub.broadcast("u1", event("tick", "system", json!({}))).await;

        let (tx, mut rx) = mpsc::channel(8);
        hub.register("u1", "c1", tx);
        let replayed = hub.replay_buffered("u1", "t1").await;
        assert_eq!(replayed, 1);

        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "CARD");
    }

    #[tokio::test]
    async fn unregister_drops_connection() {
        let hub = test_hub();
        let (tx, _rx) = mpsc::channel(8);
        hub.register("u1", "c1", tx);
        assert!(hub.is_connected("u1"));
        hub.unregister("u1", "c1");
        assert!(!hub.is_connected("u1"));
    }
}
