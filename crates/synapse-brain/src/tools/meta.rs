//! Meta tools the workflow loop inspects by name.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolKind, ToolResult};

/// TERMINATE_TASK — mission end. The workflow appends the conclusion to the
/// visible output, records mission completion, and still returns a matching
/// tool_result so the conversation stays structurally valid.
pub struct TerminateTaskTool;

impl TerminateTaskTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TerminateTaskTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for TerminateTaskTool {
    fn name(&self) -> &str {
        "TERMINATE_TASK"
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Meta
    }

    fn description(&self) -> &str {
        "Declare the current mission finished. Call this exactly once, as the \
         last tool of the conversation, with your conclusion for the user and \
         any errors encountered."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "conclusion": {
                    "type": "string",
                    "description": "Final message shown to the user."
                },
                "errors": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Problems that prevented full completion, if any."
                }
            },
            "required": ["conclusion"]
        })
    }

    async fn execute(&self, _input: Value) -> ToolResult {
        ToolResult::success("Mission completion recorded.")
    }
}

/// SUBMIT_WAITING_RESPONSE — forced single call used by the TERMINATE
/// synthesis: the model structures its hand-back to the waiting worker
/// application. The tool itself only validates shape; the caller reads the
/// input blocks.
pub struct SubmitWaitingResponseTool;

impl SubmitWaitingResponseTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SubmitWaitingResponseTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SubmitWaitingResponseTool {
    fn name(&self) -> &str {
        "SUBMIT_WAITING_RESPONSE"
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Meta
    }

    fn description(&self) -> &str {
        "Hand control back to the waiting background application. \
         'response_to_application' is sent verbatim to the worker and MUST end \
         with the word TERMINATE; 'user_summary' is what the user sees."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "response_to_application": {
                    "type": "string",
                    "description": "Message for the worker application; must end with TERMINATE."
                },
                "user_summary": {
                    "type": "string",
                    "description": "Short summary of the exchange for the user."
                },
                "context_notes": {
                    "type": "string",
                    "description": "Optional notes to keep in the conversation context."
                }
            },
            "required": ["response_to_application", "user_summary"]
        })
    }

    async fn execute(&self, input: Value) -> ToolResult {
        let ok = input
            .get("response_to_application")
            .and_then(Value::as_str)
            .map(|s| s.trim_end().to_uppercase().ends_with("TERMINATE"))
            .unwrap_or(false);
        if ok {
            ToolResult::success("Waiting response recorded.")
        } else {
            ToolResult::error("response_to_application must end with TERMINATE")
        }
    }
}
