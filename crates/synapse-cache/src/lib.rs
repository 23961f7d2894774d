//! Opaque TTL key/value cache port.
//!
//! Backs two concerns: session-context snapshots and the WS offline message
//! buffer. The canonical source of truth is always the tenant store or the
//! RTDB — stale reads here are acceptable and a miss falls through.

pub mod error;
pub mod memory;

use async_trait::async_trait;

pub use error::{CacheError, Result};
pub use memory::MemoryCache;

/// TTL key/value capability. Values are opaque strings (callers serialize).
#[async_trait]
pub trait CachePort: Send + Sync {
    /// Fetch a value, `None` on miss or expiry.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value with a TTL in seconds. `ttl_secs = 0` means no expiry.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Remove a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;
}
