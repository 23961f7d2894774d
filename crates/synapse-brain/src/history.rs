use serde_json::{json, Value};

use synapse_provider::estimate_tokens;

/// One turn of the conversation.
///
/// Content is either plain text or a list of typed blocks (text, tool_use,
/// tool_result) in the provider's wire shape. The structural invariant:
/// every assistant `tool_use` block is answered by exactly one `tool_result`
/// in the next user turn.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// `"user"` or `"assistant"`.
    pub role: &'static str,
    pub content: Value,
}

/// Ordered chat history for one thread.
#[derive(Debug, Default)]
pub struct ChatHistory {
    entries: Vec<HistoryEntry>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn add_user_text(&mut self, content: &str) {
        self.entries.push(HistoryEntry {
            role: "user",
            content: Value::String(content.to_string()),
        });
    }

    pub fn add_assistant_text(&mut self, content: &str) {
        self.entries.push(HistoryEntry {
            role: "assistant",
            content: Value::String(content.to_string()),
        });
    }

    /// Assistant turn carrying text and/or tool_use blocks.
    pub fn add_assistant_blocks(&mut self, blocks: Vec<Value>) {
        self.entries.push(HistoryEntry {
            role: "assistant",
            content: Value::Array(blocks),
        });
    }

    /// User turn carrying the tool_result blocks answering the previous
    /// assistant turn.
    pub fn add_tool_results(&mut self, blocks: Vec<Value>) {
        self.entries.push(HistoryEntry {
            role: "user",
            content: Value::Array(blocks),
        });
    }

    /// The raw message list handed to the provider.
    pub fn to_raw_messages(&self) -> Vec<Value> {
        self.entries
            .iter()
            .map(|e| json!({ "role": e.role, "content": e.content }))
            .collect()
    }

    /// Estimated token count of the serialized history.
    pub fn token_estimate(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| estimate_tokens(&e.content.to_string()))
            .sum()
    }

    /// Every assistant tool_use id answered by a tool_result in the
    /// following user turn. Used by tests and by history loading to reject
    /// structurally broken transcripts.
    pub fn tool_pairing_is_valid(&self) -> bool {
        for (i, entry) in self.entries.iter().enumerate() {
            let Some(blocks) = entry.content.as_array() else {
                continue;
            };
            let tool_use_ids: Vec<&str> = blocks
                .iter()
                .filter(|b| b["type"] == "tool_use")
                .filter_map(|b| b["id"].as_str())
                .collect();
            if tool_use_ids.is_empty() {
                continue;
            }
            let Some(next) = self.entries.get(i + 1) else {
                return false;
            };
            let answered: Vec<&str> = next
                .content
                .as_array()
                .map(|blocks| {
                    blocks
                        .iter()
                        .filter(|b| b["type"] == "tool_result")
                        .filter_map(|b| b["tool_use_id"].as_str())
                        .collect()
                })
                .unwrap_or_default();
            if tool_use_ids.iter().any(|id| !answered.contains(id)) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_messages_preserve_order_and_roles() {
        let mut h = ChatHistory::new();
        h.add_user_text("hi");
        h.add_assistant_text("hello");
        let raw = h.to_raw_messages();
        assert_eq!(raw[0]["role"], "user");
        assert_eq!(raw[1]["role"], "assistant");
        assert_eq!(raw[1]["content"], "hello");
    }

    #[test]
    fn tool_pairing_valid_when_results_follow() {
        let mut h = ChatHistory::new();
        h.add_user_text("do it");
        h.add_assistant_blocks(vec![
            json!({"type": "text", "text": "on it"}),
            json!({"type": "tool_use", "id": "tu1", "name": "GET_ROUTER_JOBS", "input": {}}),
        ]);
        h.add_tool_results(vec![
            json!({"type": "tool_result", "tool_use_id": "tu1", "content": "[]", "is_error": false}),
        ]);
        assert!(h.tool_pairing_is_valid());
    }

    #[test]
    fn tool_pairing_invalid_when_result_missing() {
        let mut h = ChatHistory::new();
        h.add_assistant_blocks(vec![json!({
            "type": "tool_use", "id": "tu1", "name": "X", "input": {}
        })]);
        assert!(!h.tool_pairing_is_valid());

        h.add_tool_results(vec![json!({
            "type": "tool_result", "tool_use_id": "other", "content": "", "is_error": false
        })]);
        assert!(!h.tool_pairing_is_valid());
    }

    #[test]
    fn token_estimate_grows_with_content() {
        let mut h = ChatHistory::new();
        assert_eq!(h.token_estimate(), 0);
        h.add_user_text(&"x".repeat(4000));
        assert!(h.token_estimate() >= 1000);
    }
}
