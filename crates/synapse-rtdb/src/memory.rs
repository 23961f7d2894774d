use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{Result, RtdbCallback, RtdbError, RtdbEvent, RtdbPort, RtdbSubscription};

struct Subscription {
    path: String,
    callback: RtdbCallback,
}

struct Inner {
    tree: Mutex<Value>,
    subs: Mutex<HashMap<u64, Subscription>>,
    next_sub_id: AtomicU64,
    next_push_id: AtomicU64,
}

/// In-process RTDB: a JSON tree with child-added subscriptions.
///
/// Callbacks are dispatched from a detached OS thread, matching the real
/// SDK's behavior of invoking listeners off the server loop. Subscribers must
/// therefore route work through the session callback loop exactly as they
/// would in production.
#[derive(Clone)]
pub struct MemoryRtdb {
    inner: Arc<Inner>,
}

impl MemoryRtdb {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tree: Mutex::new(Value::Object(Map::new())),
                subs: Mutex::new(HashMap::new()),
                next_sub_id: AtomicU64::new(1),
                next_push_id: AtomicU64::new(1),
            }),
        }
    }

    fn segments(path: &str) -> Result<Vec<&str>> {
        let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segs.is_empty() {
            return Err(RtdbError::InvalidPath(path.to_string()));
        }
        Ok(segs)
    }

    fn lock_tree(&self) -> Result<std::sync::MutexGuard<'_, Value>> {
        self.inner
            .tree
            .lock()
            .map_err(|e| RtdbError::Poisoned(e.to_string()))
    }

    /// Fire child-added callbacks for subscribers of `parent_path`.
    fn notify(&self, parent_path: &str, key: &str, data: &Value) {
        let callbacks: Vec<RtdbCallback> = {
            let subs = match self.inner.subs.lock() {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "subscription registry poisoned, skipping notify");
                    return;
                }
            };
            subs.values()
                .filter(|s| s.path == parent_path)
                .map(|s| Arc::clone(&s.callback))
                .collect()
        };

        if callbacks.is_empty() {
            return;
        }

        let event = RtdbEvent {
            key: key.to_string(),
            data: data.clone(),
        };
        debug!(path = parent_path, key, n = callbacks.len(), "rtdb child-added dispatch");
        // Detached thread: listeners must behave as if called by the SDK.
        std::thread::spawn(move || {
            for cb in callbacks {
                cb(event.clone());
            }
        });
    }
}

impl Default for MemoryRtdb {
    fn default() -> Self {
        Self::new()
    }
}

fn descend<'a>(root: &'a Value, segs: &[&str]) -> Option<&'a Value> {
    let mut node = root;
    for seg in segs {
        node = node.get(*seg)?;
    }
    Some(node)
}

fn descend_mut<'a>(root: &'a mut Value, segs: &[&str]) -> &'a mut Value {
    let mut node = root;
    for seg in segs {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = node
            .as_object_mut()
            .expect("just coerced to object")
            .entry(seg.to_string())
            .or_insert(Value::Object(Map::new()));
    }
    node
}

#[async_trait]
impl RtdbPort for MemoryRtdb {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let segs = Self::segments(path)?;
        let tree = self.lock_tree()?;
        Ok(descend(&tree, &segs).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        let segs = Self::segments(path)?;
        {
            let mut tree = self.lock_tree()?;
            *descend_mut(&mut tree, &segs) = value.clone();
        }
        if segs.len() > 1 {
            let parent = segs[..segs.len() - 1].join("/");
            self.notify(&parent, segs[segs.len() - 1], &value);
        }
        Ok(())
    }

    async fn update(&self, path: &str, value: Value) -> Result<()> {
        let segs = Self::segments(path)?;
        let patch = match value {
            Value::Object(map) => map,
            other => {
                // Non-object patches degrade to a plain set.
                return self.set(path, other).await;
            }
        };
        let mut tree = self.lock_tree()?;
        let node = descend_mut(&mut tree, &segs);
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let obj = node.as_object_mut().expect("coerced above");
        for (k, v) in patch {
            obj.insert(k, v);
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let segs = Self::segments(path)?;
        let mut tree = self.lock_tree()?;
        if segs.len() == 1 {
            if let Some(obj) = tree.as_object_mut() {
                obj.remove(segs[0]);
            }
            return Ok(());
        }
        if let Some(parent) = descend_mut(&mut tree, &segs[..segs.len() - 1]).as_object_mut() {
            parent.remove(segs[segs.len() - 1]);
        }
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String> {
        // Zero-padded counter keys keep push order lexicographically stable,
        // like Firebase push ids.
        let n = self.inner.next_push_id.fetch_add(1, Ordering::Relaxed);
        let key = format!("pk{:012}", n);
        let child_path = format!("{}/{}", path.trim_end_matches('/'), key);
        self.set(&child_path, value).await?;
        Ok(key)
    }

    async fn get_children_sorted(&self, path: &str, limit: Option<usize>) -> Result<Vec<Value>> {
        let segs = Self::segments(path)?;
        let tree = self.lock_tree()?;
        let mut children: Vec<Value> = match descend(&tree, &segs) {
            Some(Value::Object(map)) => map.values().cloned().collect(),
            _ => Vec::new(),
        };
        children.sort_by(|a, b| {
            let ta = a.get("timestamp").and_then(Value::as_str).unwrap_or("");
            let tb = b.get("timestamp").and_then(Value::as_str).unwrap_or("");
            ta.cmp(tb)
        });
        if let Some(n) = limit {
            if children.len() > n {
                children.drain(..children.len() - n);
            }
        }
        Ok(children)
    }

    fn subscribe(&self, path: &str, callback: RtdbCallback) -> Result<RtdbSubscription> {
        let id = self.inner.next_sub_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut subs = self
                .inner
                .subs
                .lock()
                .map_err(|e| RtdbError::Poisoned(e.to_string()))?;
            subs.insert(
                id,
                Subscription {
                    path: path.trim_matches('/').to_string(),
                    callback,
                },
            );
        }
        debug!(path, sub_id = id, "rtdb subscription installed");

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Ok(RtdbSubscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                if let Ok(mut subs) = inner.subs.lock() {
                    subs.remove(&id);
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_update_delete() {
        let db = MemoryRtdb::new();
        db.set("acme/chats/t1/messages/m1", json!({"id": "m1"}))
            .await
            .unwrap();
        assert_eq!(
            db.get("acme/chats/t1/messages/m1").await.unwrap(),
            Some(json!({"id": "m1"}))
        );

        db.update("acme/chats/t1/messages/m1", json!({"status": "complete"}))
            .await
            .unwrap();
        let merged = db.get("acme/chats/t1/messages/m1").await.unwrap().unwrap();
        assert_eq!(merged["id"], "m1");
        assert_eq!(merged["status"], "complete");

        db.delete("acme/chats/t1/messages/m1").await.unwrap();
        assert_eq!(db.get("acme/chats/t1/messages/m1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn children_sorted_by_timestamp_with_limit() {
        let db = MemoryRtdb::new();
        for (id, ts) in [("a", "2026-01-03"), ("b", "2026-01-01"), ("c", "2026-01-02")] {
            db.set(
                &format!("acme/job_chats/j1/messages/{id}"),
                json!({"id": id, "timestamp": ts}),
            )
            .await
            .unwrap();
        }
        let all = db
            .get_children_sorted("acme/job_chats/j1/messages", None)
            .await
            .unwrap();
        let ids: Vec<&str> = all.iter().map(|v| v["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        let newest_two = db
            .get_children_sorted("acme/job_chats/j1/messages", Some(2))
            .await
            .unwrap();
        let ids: Vec<&str> = newest_two.iter().map(|v| v["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[tokio::test]
    async fn subscription_fires_on_child_added_and_stops_on_close() {
        let db = MemoryRtdb::new();
        let (tx, rx) = std::sync::mpsc::channel::<String>();
        let sub = db
            .subscribe(
                "acme/job_chats/j1/messages",
                Arc::new(move |ev: RtdbEvent| {
                    let _ = tx.send(ev.key);
                }),
            )
            .unwrap();

        db.set("acme/job_chats/j1/messages/m1", json!({"id": "m1"}))
            .await
            .unwrap();
        let got = rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert_eq!(got, "m1");

        sub.close();
        db.set("acme/job_chats/j1/messages/m2", json!({"id": "m2"}))
            .await
            .unwrap();
        assert!(rx
            .recv_timeout(std::time::Duration::from_millis(200))
            .is_err());
    }
}
