//! WebSocket hub — the fan-out edge.
//!
//! Multiplexes per-user connections, normalizes legacy event names to the
//! canonical dot notation, and buffers thread-addressed messages for
//! disconnected users so the client can replay them on reconnect.

pub mod buffer;
pub mod hub;
pub mod normalize;

pub use buffer::MessageBuffer;
pub use hub::{event, WsHub};
pub use normalize::canonical_event_type;
