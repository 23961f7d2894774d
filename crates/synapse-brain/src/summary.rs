//! Conversation summarization for the token budget.
//!
//! A non-streaming call to the cheap model with an empty tool list turns the
//! whole history into a bounded summary; the brain then swaps the summary in
//! and clears the history in one step. The user-visible stream is never
//! interrupted by this.

use std::sync::Arc;

use tracing::{info, warn};

use synapse_provider::{ChatRequest, LlmProvider};

use crate::brain::Brain;
use crate::error::Result;

const SUMMARY_SYSTEM: &str = "You are a conversation summarizer. Produce a compact \
factual summary of the conversation below for use as standing context: user goals, \
decisions made, open items, and key figures. No preamble, no commentary.";

/// Summarize the brain's current history. Returns the summary text.
pub async fn generate_conversation_summary(
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    brain: &Brain,
    max_tokens: u32,
) -> Result<String> {
    let transcript = {
        let history = brain.history();
        let raw = history.to_raw_messages();
        raw.iter()
            .map(|m| {
                format!(
                    "{}: {}",
                    m["role"].as_str().unwrap_or("?").to_uppercase(),
                    render_content(&m["content"])
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    let mut req = ChatRequest::simple(
        model,
        SUMMARY_SYSTEM,
        &format!("Summarize this conversation:\n\n{}", transcript),
    );
    req.max_tokens = max_tokens;

    let resp = provider.send(&req).await?;
    info!(
        thread = %brain.thread_key,
        tokens_out = resp.tokens_out,
        "conversation summary generated"
    );
    Ok(resp.content)
}

/// Apply the budget trigger: summarize, then atomically rebuild the prompt
/// around the summary and clear the history.
pub async fn summarize_and_reset(
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    brain: &Brain,
    max_tokens: u32,
) -> Result<()> {
    match generate_conversation_summary(provider, model, brain, max_tokens).await {
        Ok(summary) => {
            brain.reset_context_with_summary(summary);
            Ok(())
        }
        Err(e) => {
            // A failed summary must not kill the user's turn; the next turn
            // will retry when the budget check fires again.
            warn!(thread = %brain.thread_key, error = %e, "summarization failed, keeping history");
            Err(e)
        }
    }
}

/// Flatten a content value (string or block list) for the transcript.
fn render_content(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| match b["type"].as_str() {
                Some("text") => b["text"].as_str().map(String::from),
                Some("tool_use") => b["name"].as_str().map(|n| format!("[tool call: {}]", n)),
                Some("tool_result") => Some("[tool result]".to_string()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}
