use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use synapse_approval::{build_approval_card, ApprovalRequest};

use crate::brain::Brain;
use crate::ports::TaskStore;

use super::{Tool, ToolDeps, ToolKind, ToolResult};

/// IANA zones the scheduler accepts directly; anything else must at least
/// look like an Area/Location id.
const KNOWN_TIMEZONES: &[&str] = &[
    "UTC",
    "Europe/Zurich",
    "Europe/Paris",
    "Europe/London",
    "Europe/Berlin",
    "America/New_York",
    "America/Chicago",
    "America/Los_Angeles",
    "America/Montreal",
    "Asia/Singapore",
    "Asia/Tokyo",
    "Asia/Dubai",
    "Australia/Sydney",
];

fn timezone_is_plausible(tz: &str) -> bool {
    if KNOWN_TIMEZONES.contains(&tz) {
        return true;
    }
    // Area/Location shape, ASCII, no spaces.
    let mut parts = tz.splitn(2, '/');
    match (parts.next(), parts.next()) {
        (Some(area), Some(loc)) => {
            !area.is_empty()
                && !loc.is_empty()
                && tz.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '+'))
        }
        _ => false,
    }
}

/// CREATE_TASK — interactive scheduled-task creation. Validates the
/// timezone, runs the tenant's approval workflow when the function table
/// demands it, then persists the definition through the task store.
pub struct CreateTaskTool {
    deps: Arc<ToolDeps>,
    brain: Arc<Brain>,
}

impl CreateTaskTool {
    pub fn new(deps: &Arc<ToolDeps>, brain: &Arc<Brain>) -> Self {
        Self {
            deps: Arc::clone(deps),
            brain: Arc::clone(brain),
        }
    }

    fn approval_required(&self) -> bool {
        self.brain
            .user_context()
            .map(|c| {
                c.approval_rules
                    .get("create_task")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl Tool for CreateTaskTool {
    fn name(&self) -> &str {
        "CREATE_TASK"
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Meta
    }

    fn description(&self) -> &str {
        "Create a scheduled task for this tenant. Provide title, mission, a \
         schedule ('NOW' for a one-shot immediate run, or a cron-like spec) \
         and an IANA timezone. Depending on tenant rules the user may have to \
         approve the task before it is stored."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "mission": {"type": "string", "description": "What the task should accomplish."},
                "schedule": {"type": "string", "description": "'NOW' or a recurrence spec."},
                "timezone": {"type": "string", "description": "IANA timezone id (e.g. 'Europe/Zurich')."}
            },
            "required": ["title", "mission", "schedule", "timezone"]
        })
    }

    async fn execute(&self, input: Value) -> ToolResult {
        let title = match input.get("title").and_then(Value::as_str) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => return ToolResult::error("missing required field 'title'"),
        };
        let mission = match input.get("mission").and_then(Value::as_str) {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => return ToolResult::error("missing required field 'mission'"),
        };
        let schedule = input
            .get("schedule")
            .and_then(Value::as_str)
            .unwrap_or("NOW")
            .to_string();
        let timezone = input
            .get("timezone")
            .and_then(Value::as_str)
            .unwrap_or("UTC")
            .to_string();

        if !timezone_is_plausible(&timezone) {
            return ToolResult::error(format!(
                "'{}' is not a recognizable IANA timezone; use an Area/Location id like 'Europe/Zurich'",
                timezone
            ));
        }

        if self.approval_required() {
            let card = build_approval_card(
                "create_task",
                &json!({
                    "title": format!("Schedule task: {}", title),
                    "body": {
                        "mission": mission,
                        "schedule": schedule,
                        "timezone": timezone,
                    },
                }),
            );
            let outcome = match self
                .deps
                .approval
                .request_approval_with_card(ApprovalRequest {
                    user_id: self.brain.user_id.clone(),
                    tenant_id: self.brain.tenant_id.clone(),
                    thread_key: self.brain.thread_key.clone(),
                    chat_mode: self.brain.chat_mode(),
                    card_type: "create_task".to_string(),
                    card_body: card,
                    timeout: self.deps.approval_timeout,
                    assistant_message_id: None,
                })
                .await
            {
                Ok(o) => o,
                Err(e) => return ToolResult::error(format!("approval request failed: {e}")),
            };
            if !outcome.approved {
                let status = if outcome.timed_out { "timeout" } else { "rejected" };
                return ToolResult::success(
                    json!({ "status": status, "approved": false }).to_string(),
                );
            }
        }

        let mandate_path = self
            .brain
            .user_context()
            .map(|c| c.mandate_path)
            .unwrap_or_default();
        let definition = json!({
            "title": title,
            "mission": mission,
            "schedule": schedule,
            "timezone": timezone,
            "mandate_path": mandate_path,
            "thread_key": self.brain.thread_key.as_str(),
            "created_by": self.brain.user_id.as_str(),
        });

        match self.deps.task_store.create_task(definition).await {
            Ok(task_id) => {
                info!(task_id, title = %title, "scheduled task created");
                ToolResult::success(
                    json!({
                        "status": "created",
                        "task_id": task_id,
                        "schedule": schedule,
                        "timezone": timezone,
                    })
                    .to_string(),
                )
            }
            Err(e) => ToolResult::error(format!("task store rejected the task: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timezone_plausibility() {
        assert!(timezone_is_plausible("UTC"));
        assert!(timezone_is_plausible("Europe/Zurich"));
        assert!(timezone_is_plausible("America/Argentina/Buenos_Aires"));
        assert!(!timezone_is_plausible("Zurich"));
        assert!(!timezone_is_plausible("not a zone"));
    }
}
