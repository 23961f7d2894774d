//! Realtime-database port.
//!
//! The RTDB is both persistence for chat messages and the inter-service
//! event channel between this gateway and the backend worker jobs. The
//! transport (Firebase Admin SDK in production) is out of scope — this crate
//! defines the capability surface the core consumes, plus an in-process tree
//! implementation used by tests and local development.

pub mod error;
pub mod memory;
pub mod message;
pub mod paths;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

pub use error::{Result, RtdbError};
pub use memory::MemoryRtdb;
pub use message::{format_assistant_message, inner_text, MessageType, RtdbMessage};

/// A new child record appearing under a subscribed path.
///
/// Callbacks may fire on SDK-owned threads — subscribers must hand real work
/// to their own executor (the session callback loop) and return quickly.
#[derive(Debug, Clone)]
pub struct RtdbEvent {
    /// Child key under the subscribed path.
    pub key: String,
    pub data: Value,
}

pub type RtdbCallback = Arc<dyn Fn(RtdbEvent) + Send + Sync>;

/// Handle keeping a child-added subscription alive. Dropping it (or calling
/// [`RtdbSubscription::close`]) detaches the callback.
pub struct RtdbSubscription {
    closer: Option<Box<dyn FnOnce() + Send>>,
}

impl RtdbSubscription {
    pub fn new(closer: impl FnOnce() + Send + 'static) -> Self {
        Self {
            closer: Some(Box::new(closer)),
        }
    }

    pub fn close(mut self) {
        if let Some(closer) = self.closer.take() {
            closer();
        }
    }
}

impl Drop for RtdbSubscription {
    fn drop(&mut self) {
        if let Some(closer) = self.closer.take() {
            closer();
        }
    }
}

/// Hierarchical realtime tree addressed by `/`-separated string paths.
#[async_trait]
pub trait RtdbPort: Send + Sync {
    /// Read the value at `path`, `None` if absent.
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Replace the value at `path`.
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// Shallow-merge an object into the value at `path` (creating it if
    /// absent). Non-object existing values are replaced.
    async fn update(&self, path: &str, value: Value) -> Result<()>;

    /// Remove the subtree at `path`.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Append a child with a generated key; returns the key.
    async fn push(&self, path: &str, value: Value) -> Result<String>;

    /// Children of `path` sorted by their `timestamp` field, oldest first.
    /// `limit` keeps the newest N when `Some`.
    async fn get_children_sorted(&self, path: &str, limit: Option<usize>) -> Result<Vec<Value>>;

    /// Register a child-added callback for `path`. Existing children are not
    /// replayed — callers snapshot with [`RtdbPort::get_children_sorted`]
    /// first.
    fn subscribe(&self, path: &str, callback: RtdbCallback) -> Result<RtdbSubscription>;
}
