//! Scripted provider for tests — plays back a queue of per-turn event
//! scripts instead of calling a real API.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError, ToolCall};
use crate::stream::StreamEvent;

/// One scripted model turn.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    pub events: Vec<StreamEvent>,
    /// Keep the stream open this long after the last event — lets tests
    /// exercise cancellation mid-stream.
    pub stall_ms: u64,
}

impl ScriptedTurn {
    /// A turn that streams the given text chunks then ends.
    pub fn text(chunks: &[&str]) -> Self {
        let mut events: Vec<StreamEvent> = chunks
            .iter()
            .map(|c| StreamEvent::TextDelta {
                text: c.to_string(),
            })
            .collect();
        events.push(done("end_turn"));
        Self {
            events,
            stall_ms: 0,
        }
    }

    /// A turn that calls one tool (with optional leading text).
    pub fn tool_call(text: Option<&str>, id: &str, name: &str, input: serde_json::Value) -> Self {
        let mut events = Vec::new();
        if let Some(t) = text {
            events.push(StreamEvent::TextDelta {
                text: t.to_string(),
            });
        }
        events.push(StreamEvent::ToolUseStart {
            name: name.to_string(),
        });
        events.push(StreamEvent::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input,
        });
        events.push(done("tool_use"));
        Self {
            events,
            stall_ms: 0,
        }
    }
}

fn done(stop_reason: &str) -> StreamEvent {
    StreamEvent::Done {
        model: "scripted".to_string(),
        tokens_in: 10,
        tokens_out: 10,
        stop_reason: stop_reason.to_string(),
    }
}

/// Queue-driven [`LlmProvider`]. Each `send`/`send_stream` pops the next
/// scripted turn; an exhausted queue yields an empty end_turn so runaway
/// loops terminate instead of hanging the test.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    /// Requests observed, for assertions on system prompts / tool choice.
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_turn(&self, turn: ScriptedTurn) {
        self.turns.lock().unwrap().push_back(turn);
    }

    fn next_turn(&self) -> ScriptedTurn {
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedTurn {
                events: vec![done("end_turn")],
                stall_ms: 0,
            })
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.requests.lock().unwrap().push(req.clone());
        let turn = self.next_turn();

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        let mut stop_reason = "end_turn".to_string();
        for event in turn.events {
            match event {
                StreamEvent::TextDelta { text } => content.push_str(&text),
                StreamEvent::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall { id, name, input })
                }
                StreamEvent::Done {
                    stop_reason: reason,
                    ..
                } => stop_reason = reason,
                _ => {}
            }
        }

        Ok(ChatResponse {
            content,
            model: "scripted".to_string(),
            tokens_in: 10,
            tokens_out: 10,
            stop_reason,
            tool_calls,
        })
    }

    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        self.requests.lock().unwrap().push(req.clone());
        let turn = self.next_turn();
        for event in turn.events {
            if tx.send(event).await.is_err() {
                return Ok(());
            }
        }
        if turn.stall_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(turn.stall_ms)).await;
        }
        Ok(())
    }
}
