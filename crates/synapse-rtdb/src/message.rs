use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Message types carried on worker job channels and thread message lists.
///
/// The wire values are SCREAMING_SNAKE; anything unrecognized is preserved
/// verbatim so new worker types pass through to the UI untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    Message,
    Card,
    Tool,
    FollowMessage,
    CloseIntermediation,
    CardClickedPinnokio,
    WaitingMessage,
    Workflow,
    Cmmd,
    MessagePinnokio,
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Message => "MESSAGE",
            MessageType::Card => "CARD",
            MessageType::Tool => "TOOL",
            MessageType::FollowMessage => "FOLLOW_MESSAGE",
            MessageType::CloseIntermediation => "CLOSE_INTERMEDIATION",
            MessageType::CardClickedPinnokio => "CARD_CLICKED_PINNOKIO",
            MessageType::WaitingMessage => "WAITING_MESSAGE",
            MessageType::Workflow => "WORKFLOW",
            MessageType::Cmmd => "CMMD",
            MessageType::MessagePinnokio => "MESSAGE_PINNOKIO",
            MessageType::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "MESSAGE" => MessageType::Message,
            "CARD" => MessageType::Card,
            "TOOL" => MessageType::Tool,
            "FOLLOW_MESSAGE" => MessageType::FollowMessage,
            "CLOSE_INTERMEDIATION" => MessageType::CloseIntermediation,
            "CARD_CLICKED_PINNOKIO" => MessageType::CardClickedPinnokio,
            "WAITING_MESSAGE" => MessageType::WaitingMessage,
            "WORKFLOW" => MessageType::Workflow,
            "CMMD" => MessageType::Cmmd,
            "MESSAGE_PINNOKIO" => MessageType::MessagePinnokio,
            other => MessageType::Other(other.to_string()),
        }
    }
}

impl Serialize for MessageType {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Ok(MessageType::parse(&s))
    }
}

/// A record as consumed from a worker channel or a thread message list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtdbMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_message_type")]
    pub message_type: MessageType,
    /// String or object; extraction goes through [`inner_text`].
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub local_processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Worker-declared tool list (FOLLOW_MESSAGE / intermediation starts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
}

fn default_message_type() -> MessageType {
    MessageType::Message
}

impl RtdbMessage {
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// The displayable inner text of this record's content.
    pub fn text(&self) -> String {
        inner_text(&self.content)
    }
}

/// Extraction rule shared by the listener and the UI: if `content` is (or
/// parses as) JSON carrying `{message:{argumentText}}`, use that; otherwise
/// the raw string form.
pub fn inner_text(content: &Value) -> String {
    fn argument_text(v: &Value) -> Option<String> {
        v.get("message")?
            .get("argumentText")?
            .as_str()
            .map(String::from)
    }

    match content {
        Value::String(s) => {
            if let Ok(parsed) = serde_json::from_str::<Value>(s) {
                if let Some(text) = argument_text(&parsed) {
                    return text;
                }
            }
            s.clone()
        }
        other => argument_text(other).unwrap_or_else(|| other.to_string()),
    }
}

/// Format an assistant message record for RTDB storage.
///
/// The client expects `content` as a JSON-stringified
/// `{"message":{"argumentText": <text>}}` envelope.
pub fn format_assistant_message(
    content: &str,
    sender_id: &str,
    message_id: Option<&str>,
    metadata: Option<Value>,
) -> Value {
    let id = message_id
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let structured = json!({ "message": { "argumentText": content } });

    let mut record = json!({
        "id": id,
        "content": structured.to_string(),
        "sender_id": sender_id,
        "timestamp": Utc::now().to_rfc3339(),
        "message_type": "MESSAGE",
        "read": false,
        "local_processed": false,
    });
    if let Some(meta) = metadata {
        record["metadata"] = meta;
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_preserves_unknown_values() {
        let t = MessageType::parse("FUTURE_THING");
        assert_eq!(t.as_str(), "FUTURE_THING");
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"FUTURE_THING\"");
    }

    #[test]
    fn inner_text_unwraps_argument_text() {
        let wrapped = json!({"message": {"argumentText": "hello"}});
        assert_eq!(inner_text(&wrapped), "hello");

        let as_string = Value::String(wrapped.to_string());
        assert_eq!(inner_text(&as_string), "hello");

        let plain = Value::String("plain text".into());
        assert_eq!(inner_text(&plain), "plain text");
    }

    #[test]
    fn assistant_message_roundtrips_through_inner_text() {
        let record = format_assistant_message("Bonjour", "synapse", Some("m1"), None);
        assert_eq!(record["id"], "m1");
        assert_eq!(record["message_type"], "MESSAGE");
        assert_eq!(record["read"], false);
        assert_eq!(inner_text(&record["content"]), "Bonjour");
    }
}
