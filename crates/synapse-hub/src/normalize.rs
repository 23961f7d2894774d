//! Legacy → canonical event-type mapping.
//!
//! Older backend code emitted underscore event names; the frontend expects
//! the dot notation. Normalization happens once, on broadcast, so neither
//! side needs to know about the other's vocabulary.

/// Map a legacy event type to its canonical form. Unknown types pass through
/// unchanged.
pub fn canonical_event_type(event_type: &str) -> &str {
    match event_type {
        // LLM streaming events
        "llm_stream_start" => "llm.stream_start",
        "llm_stream_chunk" => "llm.stream_delta", // chunk → delta
        "llm_stream_delta" => "llm.stream_delta",
        "llm_stream_complete" => "llm.stream_end", // complete → end
        "llm_stream_end" => "llm.stream_end",
        "llm_stream_error" => "llm.error",
        "llm_stream_interrupted" => "llm.error",
        // Tool use events
        "tool_use_start" => "llm.tool_use_start",
        "tool_use_progress" => "llm.tool_use_progress",
        "tool_use_complete" => "llm.tool_use_complete",
        "tool_use_error" => "llm.tool_use_error",
        other => other,
    }
}
