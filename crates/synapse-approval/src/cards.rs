use serde_json::{json, Value};

/// Longest preview shown on a card or returned to the model. Full texts
/// never travel through the card payload.
const PREVIEW_CHARS: usize = 400;

/// Clamp a text to a preview length, marking the cut.
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}… [truncated]", cut)
}

/// Generic approval card: a title, a body, and approve/reject actions.
pub fn build_approval_card(card_type: &str, params: &Value) -> Value {
    json!({
        "card_name": card_type,
        "title": params.get("title").and_then(Value::as_str).unwrap_or("Approval required"),
        "body": params.get("body").cloned().unwrap_or(Value::Null),
        "actions": [
            { "action": "approve", "label": "Approve" },
            { "action": "reject", "label": "Reject" },
        ],
    })
}

/// Text-modification diff card: per-operation summary plus truncated
/// before/after previews.
///
/// `operations_log` entries come from the text updater
/// (`{op_index, section_type, operation, success, error?}`).
pub fn build_text_modification_card(
    context_type: &str,
    original_text: &str,
    updated_text: &str,
    operations_log: &[Value],
) -> Value {
    let summary: Vec<Value> = operations_log
        .iter()
        .map(|op| {
            json!({
                "op_index": op.get("op_index").cloned().unwrap_or(Value::Null),
                "section_type": op.get("section_type").cloned().unwrap_or(Value::Null),
                "operation": op.get("operation").cloned().unwrap_or(Value::Null),
                "success": op.get("success").cloned().unwrap_or(Value::Bool(false)),
                "error": op.get("error").cloned().unwrap_or(Value::Null),
            })
        })
        .collect();

    let no_effective_change = original_text == updated_text;

    json!({
        "card_name": "text_modification",
        "context_type": context_type,
        "title": format!("Review changes to the {} context", context_type),
        "operations": summary,
        "before_preview": truncate_preview(original_text, PREVIEW_CHARS),
        "after_preview": truncate_preview(updated_text, PREVIEW_CHARS),
        "no_effective_change": no_effective_change,
        "actions": [
            { "action": "approve_four_eyes", "label": "Approve" },
            { "action": "reject", "label": "Reject" },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncation_marks_the_cut() {
        let long = "x".repeat(500);
        let preview = truncate_preview(&long, 100);
        assert!(preview.ends_with("… [truncated]"));
        assert!(preview.chars().count() < 130);
        assert_eq!(truncate_preview("short", 100), "short");
    }

    #[test]
    fn text_modification_card_flags_unchanged_text() {
        let card = build_text_modification_card("router", "same", "same", &[]);
        assert_eq!(card["no_effective_change"], true);

        let card = build_text_modification_card("router", "a", "b", &[]);
        assert_eq!(card["no_effective_change"], false);
    }

    #[test]
    fn operations_summary_carries_per_op_outcome() {
        let log = vec![serde_json::json!({
            "op_index": 0,
            "section_type": "end",
            "operation": "add",
            "success": true,
        })];
        let card = build_text_modification_card("company", "a", "ab", &log);
        assert_eq!(card["operations"][0]["operation"], "add");
        assert_eq!(card["operations"][0]["success"], true);
    }
}
