use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::stream::{parse_sse_line, SseParsed, StreamEvent};

/// Parse Anthropic streaming SSE response and emit StreamEvents.
/// Reads from a reqwest byte stream, parses SSE lines, emits events.
pub async fn process_stream(resp: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
    use futures_util::StreamExt;

    let mut state = SseState::default();
    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        // SSE: multiple lines per chunk, split by newlines; keep the
        // incomplete last line in the buffer.
        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            for event in state.feed(line) {
                if tx.send(event).await.is_err() {
                    return; // receiver dropped
                }
            }
        }

        line_buf = remainder;
    }

    let _ = tx
        .send(StreamEvent::Done {
            model: std::mem::take(&mut state.model),
            tokens_in: state.tokens_in,
            tokens_out: state.tokens_out,
            stop_reason: std::mem::take(&mut state.stop_reason),
        })
        .await;
}

/// Accumulates SSE parser state across lines.
#[derive(Default)]
struct SseState {
    current_event: String,
    current_block_type: String,
    tool_use_id: String,
    tool_use_name: String,
    tool_use_input_json: String,
    model: String,
    tokens_in: u32,
    tokens_out: u32,
    stop_reason: String,
}

impl SseState {
    /// Consume one SSE line; returns the StreamEvents it produced.
    fn feed(&mut self, line: &str) -> Vec<StreamEvent> {
        let Some(parsed) = parse_sse_line(line) else {
            return Vec::new();
        };
        match parsed {
            SseParsed::Event(ev) => {
                self.current_event = ev;
                Vec::new()
            }
            SseParsed::Data(data) => self.feed_data(&data),
        }
    }

    fn feed_data(&mut self, data: &str) -> Vec<StreamEvent> {
        match self.current_event.as_str() {
            "message_start" => {
                if let Ok(msg) = serde_json::from_str::<MessageStart>(data) {
                    self.model = msg.message.model;
                    self.tokens_in = msg.message.usage.input_tokens;
                }
                Vec::new()
            }

            "content_block_start" => {
                // Record the block type so deltas know what to emit. For
                // tool_use blocks, announce the tool name immediately.
                if let Ok(start) = serde_json::from_str::<ContentBlockStart>(data) {
                    self.current_block_type = start.content_block.block_type.clone();
                    if start.content_block.block_type == "tool_use" {
                        self.tool_use_id = start.content_block.id.unwrap_or_default();
                        self.tool_use_name = start.content_block.name.unwrap_or_default();
                        self.tool_use_input_json.clear();
                        return vec![StreamEvent::ToolUseStart {
                            name: self.tool_use_name.clone(),
                        }];
                    }
                }
                Vec::new()
            }

            "content_block_delta" => {
                if let Ok(delta) = serde_json::from_str::<ContentBlockDelta>(data) {
                    match delta.delta.delta_type.as_str() {
                        "text_delta" => {
                            if let Some(text) = delta.delta.text {
                                debug!(len = text.len(), "stream text delta");
                                return vec![StreamEvent::TextDelta { text }];
                            }
                        }
                        "input_json_delta" => {
                            if let Some(partial) = delta.delta.partial_json {
                                self.tool_use_input_json.push_str(&partial);
                            }
                        }
                        other => {
                            debug!(delta_type = other, "unhandled delta type");
                        }
                    }
                }
                Vec::new()
            }

            "content_block_stop" => {
                // When a tool_use block closes, emit a ToolUse event with the
                // fully accumulated JSON input.
                if self.current_block_type == "tool_use" {
                    let input = serde_json::from_str::<serde_json::Value>(
                        self.tool_use_input_json.as_str(),
                    )
                    .unwrap_or(serde_json::Value::Object(Default::default()));

                    let event = StreamEvent::ToolUse {
                        id: std::mem::take(&mut self.tool_use_id),
                        name: std::mem::take(&mut self.tool_use_name),
                        input,
                    };
                    self.tool_use_input_json.clear();
                    self.current_block_type.clear();
                    return vec![event];
                }
                self.current_block_type.clear();
                Vec::new()
            }

            "message_delta" => {
                if let Ok(delta) = serde_json::from_str::<MessageDelta>(data) {
                    self.tokens_out = delta.usage.output_tokens;
                    if let Some(reason) = delta.delta.stop_reason {
                        self.stop_reason = reason;
                    }
                }
                Vec::new()
            }

            "error" => {
                warn!(data, "anthropic stream error");
                vec![StreamEvent::Error {
                    message: data.to_string(),
                }]
            }

            // message_stop and unknown events — no action needed
            _ => Vec::new(),
        }
    }
}

// Anthropic SSE data types (private — deserialization only)

#[derive(Deserialize)]
struct MessageStart {
    message: MessageStartInner,
}

#[derive(Deserialize)]
struct MessageStartInner {
    model: String,
    usage: InputUsage,
}

#[derive(Deserialize)]
struct InputUsage {
    input_tokens: u32,
}

#[derive(Deserialize)]
struct ContentBlockStart {
    content_block: ContentBlockMeta,
}

#[derive(Deserialize)]
struct ContentBlockMeta {
    #[serde(rename = "type")]
    block_type: String,
    /// Populated for `tool_use` blocks: the tool call id.
    id: Option<String>,
    /// Populated for `tool_use` blocks: the tool name.
    name: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: DeltaContent,
}

#[derive(Deserialize)]
struct DeltaContent {
    #[serde(rename = "type")]
    delta_type: String,
    /// Populated for `text_delta` events.
    text: Option<String>,
    /// Populated for `input_json_delta` events (tool input streaming).
    partial_json: Option<String>,
}

#[derive(Deserialize)]
struct MessageDelta {
    delta: MessageDeltaInner,
    usage: OutputUsage,
}

#[derive(Deserialize)]
struct MessageDeltaInner {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct OutputUsage {
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(state: &mut SseState, lines: &[&str]) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        for line in lines {
            out.extend(state.feed(line));
        }
        out
    }

    #[test]
    fn text_deltas_stream_through() {
        let mut state = SseState::default();
        let events = feed_all(
            &mut state,
            &[
                "event: content_block_start",
                r#"data: {"content_block":{"type":"text"}}"#,
                "event: content_block_delta",
                r#"data: {"delta":{"type":"text_delta","text":"Hel"}}"#,
                "event: content_block_delta",
                r#"data: {"delta":{"type":"text_delta","text":"lo"}}"#,
            ],
        );
        let texts: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["Hel", "lo"]);
    }

    #[test]
    fn tool_use_accumulates_partial_json() {
        let mut state = SseState::default();
        let events = feed_all(
            &mut state,
            &[
                "event: content_block_start",
                r#"data: {"content_block":{"type":"tool_use","id":"tu1","name":"GET_JOBS"}}"#,
                "event: content_block_delta",
                r#"data: {"delta":{"type":"input_json_delta","partial_json":"{\"depart"}}"#,
                "event: content_block_delta",
                r#"data: {"delta":{"type":"input_json_delta","partial_json":"ment\":\"router\"}"}}"#,
                "event: content_block_stop",
                r#"data: {}"#,
            ],
        );
        assert!(matches!(
            &events[0],
            StreamEvent::ToolUseStart { name } if name == "GET_JOBS"
        ));
        match &events[1] {
            StreamEvent::ToolUse { id, name, input } => {
                assert_eq!(id, "tu1");
                assert_eq!(name, "GET_JOBS");
                assert_eq!(input["department"], "router");
            }
            other => panic!("expected ToolUse, got {:?}", other),
        }
    }

    #[test]
    fn message_delta_captures_usage_and_stop_reason() {
        let mut state = SseState::default();
        feed_all(
            &mut state,
            &[
                "event: message_delta",
                r#"data: {"delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":42}}"#,
            ],
        );
        assert_eq!(state.tokens_out, 42);
        assert_eq!(state.stop_reason, "end_turn");
    }
}
