//! Checklist tools for scheduled-task execution. Both persist into the
//! execution record, broadcast a workflow event, and append a parallel
//! CMMD-typed RTDB record so clients can replay progress after a reload.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use synapse_core::types::chat_channel;
use synapse_hub::event;
use synapse_rtdb::{paths, RtdbPort};

use crate::brain::Brain;
use crate::ports::ExecutionStore;
use crate::task::{Checklist, StepStatus};

use super::{Tool, ToolDeps, ToolResult};

async fn persist_and_broadcast(
    deps: &ToolDeps,
    brain: &Brain,
    event_type: &str,
    payload: Value,
    checklist: &Checklist,
    execution_id: &str,
) {
    if let Err(e) = deps
        .execution_store
        .save_checklist(execution_id, checklist)
        .await
    {
        warn!(execution_id, error = %e, "checklist persistence failed");
    }

    let channel = chat_channel(&brain.user_id, &brain.tenant_id, &brain.thread_key);
    deps.hub
        .broadcast(brain.user_id.as_str(), event(event_type, &channel, payload.clone()))
        .await;

    // Replay record alongside the chat messages.
    let record_id = Uuid::new_v4().to_string();
    let record_path = paths::thread_message(
        &brain.tenant_id,
        brain.chat_mode(),
        &brain.thread_key,
        &record_id,
    );
    let record = json!({
        "id": record_id,
        "content": json!({ "event": event_type, "payload": payload }).to_string(),
        "sender_id": "synapse",
        "timestamp": Utc::now().to_rfc3339(),
        "message_type": "CMMD",
        "read": false,
    });
    if let Err(e) = deps.rtdb.set(&record_path, record).await {
        warn!(error = %e, "CMMD replay record write failed");
    }
}

/// CREATE_CHECKLIST — establish the mission's step plan.
pub struct CreateChecklistTool {
    deps: Arc<ToolDeps>,
    brain: Arc<Brain>,
}

impl CreateChecklistTool {
    pub fn new(deps: &Arc<ToolDeps>, brain: &Arc<Brain>) -> Self {
        Self {
            deps: Arc::clone(deps),
            brain: Arc::clone(brain),
        }
    }
}

#[async_trait]
impl Tool for CreateChecklistTool {
    fn name(&self) -> &str {
        "CREATE_CHECKLIST"
    }

    fn description(&self) -> &str {
        "Create the mission checklist from your step plan. Call once, before \
         starting the first step."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "steps": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Ordered step titles."
                }
            },
            "required": ["steps"]
        })
    }

    async fn execute(&self, input: Value) -> ToolResult {
        let titles: Vec<String> = match input.get("steps").and_then(Value::as_array) {
            Some(arr) if !arr.is_empty() => arr
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
            _ => return ToolResult::error("'steps' must be a non-empty array of titles"),
        };

        let checklist = Checklist::from_titles(&titles);
        let Some(execution_id) = self.brain.with_active_task(|task| {
            task.checklist = Some(checklist.clone());
            task.execution_id.clone()
        }) else {
            return ToolResult::error("no active task execution on this thread");
        };

        persist_and_broadcast(
            &self.deps,
            &self.brain,
            "WORKFLOW_CHECKLIST",
            json!({
                "execution_id": execution_id,
                "steps": checklist.steps,
            }),
            &checklist,
            &execution_id,
        )
        .await;

        ToolResult::success(
            json!({ "status": "created", "steps_total": checklist.steps.len() }).to_string(),
        )
    }
}

/// UPDATE_STEP — advance one checklist step.
pub struct UpdateStepTool {
    deps: Arc<ToolDeps>,
    brain: Arc<Brain>,
}

impl UpdateStepTool {
    pub fn new(deps: &Arc<ToolDeps>, brain: &Arc<Brain>) -> Self {
        Self {
            deps: Arc::clone(deps),
            brain: Arc::clone(brain),
        }
    }
}

#[async_trait]
impl Tool for UpdateStepTool {
    fn name(&self) -> &str {
        "UPDATE_STEP"
    }

    fn description(&self) -> &str {
        "Record progress on one checklist step: in_progress when you start it, \
         completed/failed/skipped when it ends."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "step_index": {"type": "integer"},
                "status": {
                    "type": "string",
                    "enum": ["pending", "in_progress", "completed", "failed", "skipped"]
                },
                "note": {"type": "string", "description": "Optional outcome note."}
            },
            "required": ["step_index", "status"]
        })
    }

    async fn execute(&self, input: Value) -> ToolResult {
        let Some(index) = input.get("step_index").and_then(Value::as_u64) else {
            return ToolResult::error("missing required field 'step_index'");
        };
        let status: StepStatus = match input
            .get("status")
            .and_then(Value::as_str)
            .and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok())
        {
            Some(s) => s,
            None => return ToolResult::error("invalid 'status'"),
        };
        let note = input.get("note").and_then(Value::as_str).map(String::from);

        let update = self.brain.with_active_task(|task| {
            let Some(checklist) = task.checklist.as_mut() else {
                return Err("no checklist created yet — call CREATE_CHECKLIST first".to_string());
            };
            checklist
                .update_step(index as u32, status, note.clone())
                .map(|()| (checklist.clone(), task.execution_id.clone()))
        });

        let (checklist, execution_id) = match update {
            Some(Ok(pair)) => pair,
            Some(Err(e)) => return ToolResult::error(e),
            None => return ToolResult::error("no active task execution on this thread"),
        };

        persist_and_broadcast(
            &self.deps,
            &self.brain,
            "WORKFLOW_STEP_UPDATE",
            json!({
                "execution_id": execution_id,
                "step_index": index,
                "status": status,
                "note": note,
            }),
            &checklist,
            &execution_id,
        )
        .await;

        ToolResult::success(
            json!({
                "status": "updated",
                "steps_completed": checklist.completed_count(),
                "steps_total": checklist.steps.len(),
            })
            .to_string(),
        )
    }
}
