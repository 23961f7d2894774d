use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use synapse_cache::CachePort;

/// Per-(user, thread) queue of WS messages that could not be delivered
/// because no connection was live. Stored as a JSON array under a TTL'd
/// cache key and drained in order on reconnect.
pub struct MessageBuffer {
    cache: Arc<dyn CachePort>,
    ttl_secs: u64,
}

impl MessageBuffer {
    pub fn new(cache: Arc<dyn CachePort>, ttl_secs: u64) -> Self {
        Self { cache, ttl_secs }
    }

    fn key(uid: &str, thread_key: &str) -> String {
        format!("ws_buffer:{}:{}", uid, thread_key)
    }

    /// Append a message to the pending queue.
    pub async fn store_pending(&self, uid: &str, thread_key: &str, message: &Value) {
        let key = Self::key(uid, thread_key);
        let mut queue: Vec<Value> = match self.cache.get(&key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(uid, thread_key, error = %e, "buffer read failed, starting fresh");
                Vec::new()
            }
        };
        queue.push(message.clone());
        let serialized = match serde_json::to_string(&queue) {
            Ok(s) => s,
            Err(e) => {
                warn!(uid, thread_key, error = %e, "buffer serialize failed, dropping message");
                return;
            }
        };
        if let Err(e) = self.cache.set_ex(&key, &serialized, self.ttl_secs).await {
            warn!(uid, thread_key, error = %e, "buffer write failed");
        } else {
            debug!(uid, thread_key, queued = queue.len(), "ws message buffered");
        }
    }

    /// Remove and return all pending messages for a thread, oldest first.
    pub async fn drain(&self, uid: &str, thread_key: &str) -> Vec<Value> {
        let key = Self::key(uid, thread_key);
        let queue: Vec<Value> = match self.cache.get(&key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            _ => Vec::new(),
        };
        if !queue.is_empty() {
            let _ = self.cache.delete(&key).await;
            debug!(uid, thread_key, drained = queue.len(), "ws buffer drained");
        }
        queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use synapse_cache::MemoryCache;

    #[tokio::test]
    async fn store_then_drain_preserves_order() {
        let buffer = MessageBuffer::new(Arc::new(MemoryCache::new()), 60);
        buffer.store_pending("u1", "t1", &json!({"n": 1})).await;
        buffer.store_pending("u1", "t1", &json!({"n": 2})).await;

        let drained = buffer.drain("u1", "t1").await;
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0]["n"], 1);
        assert_eq!(drained[1]["n"], 2);

        // Second drain is empty.
        assert!(buffer.drain("u1", "t1").await.is_empty());
    }

    #[tokio::test]
    async fn buffers_are_scoped_per_thread() {
        let buffer = MessageBuffer::new(Arc::new(MemoryCache::new()), 60);
        buffer.store_pending("u1", "t1", &json!({"t": "a"})).await;
        buffer.store_pending("u1", "t2", &json!({"t": "b"})).await;

        assert_eq!(buffer.drain("u1", "t1").await.len(), 1);
        assert_eq!(buffer.drain("u1", "t2").await.len(), 1);
    }
}
