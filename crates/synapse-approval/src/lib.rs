//! Approval card protocol.
//!
//! A tool call that needs a human decision suspends on a one-shot future
//! keyed `user:thread:card_message_id`, shows the user a card, persists the
//! pending state in the RTDB, and resumes on the user's click or on timeout.

pub mod broker;
pub mod cards;
pub mod error;

pub use broker::{ApprovalBroker, ApprovalOutcome, ApprovalRequest};
pub use cards::{build_approval_card, build_text_modification_card, truncate_preview};
pub use error::{ApprovalError, Result};
