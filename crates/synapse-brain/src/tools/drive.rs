use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::ports::DriveDocs;

use super::{Tool, ToolDeps, ToolResult};

/// VIEW_DRIVE_DOCUMENT — vision over a stored document: fetch by file id and
/// answer the model's question about its content.
pub struct ViewDriveDocumentTool {
    deps: Arc<ToolDeps>,
}

impl ViewDriveDocumentTool {
    pub fn new(deps: &Arc<ToolDeps>) -> Self {
        Self {
            deps: Arc::clone(deps),
        }
    }
}

#[async_trait]
impl Tool for ViewDriveDocumentTool {
    fn name(&self) -> &str {
        "VIEW_DRIVE_DOCUMENT"
    }

    fn description(&self) -> &str {
        "Inspect a document stored in the tenant's DMS by file id and answer a \
         question about its content (amounts, parties, dates, layout)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_id": {
                    "type": "string",
                    "description": "DMS file identifier."
                },
                "question": {
                    "type": "string",
                    "description": "What to extract or verify in the document."
                }
            },
            "required": ["file_id", "question"]
        })
    }

    async fn execute(&self, input: Value) -> ToolResult {
        let Some(file_id) = input.get("file_id").and_then(Value::as_str) else {
            return ToolResult::error("missing required field 'file_id'");
        };
        let question = input
            .get("question")
            .and_then(Value::as_str)
            .unwrap_or("Describe this document.");

        match self.deps.drive_docs.describe_document(file_id, question).await {
            Ok(answer) => ToolResult::success(answer),
            Err(e) => ToolResult::error(format!("document inspection failed: {e}")),
        }
    }
}
