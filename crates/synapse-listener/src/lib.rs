//! RTDB follow-up listener and intermediation state machine.
//!
//! A per-thread listener consumes the worker job's RTDB channel and routes
//! each record to the LLM context (system log), the WebSocket (UI event), or
//! the intermediation direct-dialog mode. Intermediation lets the worker
//! application talk to the user through the same thread, bypassing the LLM,
//! until a close condition fires.

pub mod engine;
pub mod error;
pub mod install;
pub mod reactivate;

pub use engine::{
    handle_event, respond_during_intermediation, start_intermediation, stop_intermediation,
    IntermediationReason, ListenerDeps,
};
pub use error::{ListenerError, Result};
pub use install::{install_listener, uninstall_listener};
pub use reactivate::check_intermediation_on_load;
