//! Long-process tools. The invocation only queues work on the worker fleet
//! and returns a receipt; the completion callback re-enters the workflow
//! later through the manager's resume path.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::brain::Brain;
use crate::ports::LptDispatcher;

use super::{Tool, ToolDeps, ToolKind, ToolResult};

async fn dispatch_lpt(
    deps: &ToolDeps,
    brain: &Brain,
    agent: &str,
    input: &Value,
) -> ToolResult {
    let Some(action) = input.get("action").and_then(Value::as_str) else {
        return ToolResult::error("missing required field 'action'");
    };
    let task_title = input
        .get("task_title")
        .and_then(Value::as_str)
        .unwrap_or(action);
    let params = input.get("params").cloned().unwrap_or_else(|| json!({}));

    match deps
        .lpt
        .dispatch(brain.thread_key.as_str(), agent, action, params, task_title)
        .await
    {
        Ok(task_id) => {
            info!(agent, action, task_id, thread = %brain.thread_key, "LPT queued");
            ToolResult::success(
                json!({
                    "status": "queued",
                    "task_id": task_id,
                    "agent": agent,
                    "action": action,
                    "note": "The work is running in the background; its result will \
                             arrive in this conversation when the worker finishes.",
                })
                .to_string(),
            )
        }
        Err(e) => ToolResult::error(format!("worker dispatch failed: {e}")),
    }
}

fn lpt_schema(action_desc: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "action": {"type": "string", "description": action_desc},
            "params": {"type": "object", "description": "Action-specific parameters."},
            "task_title": {"type": "string", "description": "Short human-readable label shown in progress UI."}
        },
        "required": ["action"]
    })
}

/// LPT_FILE_MANAGER — document moves, renames, archive runs on the DMS.
pub struct FileManagerTool {
    deps: Arc<ToolDeps>,
    brain: Arc<Brain>,
}

impl FileManagerTool {
    pub fn new(deps: &Arc<ToolDeps>, brain: &Arc<Brain>) -> Self {
        Self {
            deps: Arc::clone(deps),
            brain: Arc::clone(brain),
        }
    }
}

#[async_trait]
impl Tool for FileManagerTool {
    fn name(&self) -> &str {
        "LPT_FILE_MANAGER"
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Long
    }

    fn description(&self) -> &str {
        "Queue a long-running document-management operation (move, rename, \
         archive, bulk reorganize). Returns immediately with a task id; the \
         result arrives asynchronously."
    }

    fn input_schema(&self) -> Value {
        lpt_schema("File operation: 'move', 'rename', 'archive', 'reorganize'.")
    }

    async fn execute(&self, input: Value) -> ToolResult {
        dispatch_lpt(&self.deps, &self.brain, "file_manager", &input).await
    }
}

/// LPT_ACCOUNTING — posting runs, reconciliation batches, export jobs.
pub struct AccountingTool {
    deps: Arc<ToolDeps>,
    brain: Arc<Brain>,
}

impl AccountingTool {
    pub fn new(deps: &Arc<ToolDeps>, brain: &Arc<Brain>) -> Self {
        Self {
            deps: Arc::clone(deps),
            brain: Arc::clone(brain),
        }
    }
}

#[async_trait]
impl Tool for AccountingTool {
    fn name(&self) -> &str {
        "LPT_ACCOUNTING"
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Long
    }

    fn description(&self) -> &str {
        "Queue a long-running accounting operation (posting batch, \
         reconciliation run, ledger export). Returns immediately with a task \
         id; the result arrives asynchronously."
    }

    fn input_schema(&self) -> Value {
        lpt_schema("Accounting operation: 'post_batch', 'reconcile', 'export'.")
    }

    async fn execute(&self, input: Value) -> ToolResult {
        dispatch_lpt(&self.deps, &self.brain, "accounting", &input).await
    }
}
