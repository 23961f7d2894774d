//! Job-list query tools — read the session's jobs snapshot.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::brain::Brain;

use super::{Tool, ToolResult};

fn department_jobs(brain: &Brain, department: &str, status_filter: Option<&str>) -> ToolResult {
    let jobs = brain.jobs_data();
    let list = jobs
        .jobs
        .get(department)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let filtered: Vec<Value> = match status_filter {
        Some(status) => list
            .into_iter()
            .filter(|j| j.get("status").and_then(Value::as_str) == Some(status))
            .collect(),
        None => list,
    };

    match serde_json::to_string(&json!({
        "department": department,
        "count": filtered.len(),
        "jobs": filtered,
    })) {
        Ok(s) => ToolResult::success(s),
        Err(e) => ToolResult::error(format!("serialization error: {e}")),
    }
}

fn status_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "status": {
                "type": "string",
                "description": "Optional status filter (e.g. 'pending', 'done')."
            }
        }
    })
}

fn status_of(input: &Value) -> Option<String> {
    input
        .get("status")
        .and_then(Value::as_str)
        .map(String::from)
}

pub struct ApBookeeperJobsTool {
    brain: Arc<Brain>,
}

impl ApBookeeperJobsTool {
    pub fn new(brain: &Arc<Brain>) -> Self {
        Self {
            brain: Arc::clone(brain),
        }
    }
}

#[async_trait]
impl Tool for ApBookeeperJobsTool {
    fn name(&self) -> &str {
        "GET_APBOOKEEPER_JOBS"
    }

    fn description(&self) -> &str {
        "List the tenant's accounts-payable bookkeeping jobs, optionally filtered by status."
    }

    fn input_schema(&self) -> Value {
        status_schema()
    }

    async fn execute(&self, input: Value) -> ToolResult {
        department_jobs(&self.brain, "apbookeeper", status_of(&input).as_deref())
    }
}

pub struct RouterJobsTool {
    brain: Arc<Brain>,
}

impl RouterJobsTool {
    pub fn new(brain: &Arc<Brain>) -> Self {
        Self {
            brain: Arc::clone(brain),
        }
    }
}

#[async_trait]
impl Tool for RouterJobsTool {
    fn name(&self) -> &str {
        "GET_ROUTER_JOBS"
    }

    fn description(&self) -> &str {
        "List the tenant's document-routing jobs, optionally filtered by status."
    }

    fn input_schema(&self) -> Value {
        status_schema()
    }

    async fn execute(&self, input: Value) -> ToolResult {
        department_jobs(&self.brain, "router", status_of(&input).as_deref())
    }
}

pub struct BankTransactionsTool {
    brain: Arc<Brain>,
}

impl BankTransactionsTool {
    pub fn new(brain: &Arc<Brain>) -> Self {
        Self {
            brain: Arc::clone(brain),
        }
    }
}

#[async_trait]
impl Tool for BankTransactionsTool {
    fn name(&self) -> &str {
        "GET_BANK_TRANSACTIONS"
    }

    fn description(&self) -> &str {
        "List the tenant's bank transactions awaiting reconciliation, optionally filtered by status."
    }

    fn input_schema(&self) -> Value {
        status_schema()
    }

    async fn execute(&self, input: Value) -> ToolResult {
        department_jobs(&self.brain, "banker", status_of(&input).as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::RwLock;
    use synapse_core::tenant::{JobsData, UserContext};
    use synapse_core::types::ChatMode;

    fn brain_with_jobs() -> Arc<Brain> {
        let jobs = JobsData {
            jobs: json!({
                "router": [
                    {"id": "r1", "status": "pending"},
                    {"id": "r2", "status": "done"},
                ],
            }),
            ..Default::default()
        };
        Arc::new(Brain::new(
            "u1".into(),
            "acme".into(),
            "t1".into(),
            ChatMode::General,
            Arc::new(RwLock::new(Some(UserContext::default()))),
            Arc::new(RwLock::new(jobs)),
        ))
    }

    #[tokio::test]
    async fn router_jobs_filter_by_status() {
        let tool = RouterJobsTool::new(&brain_with_jobs());
        let result = tool.execute(json!({"status": "pending"})).await;
        assert!(!result.is_error);
        let parsed: Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(parsed["count"], 1);
        assert_eq!(parsed["jobs"][0]["id"], "r1");
    }

    #[tokio::test]
    async fn missing_department_yields_empty_list() {
        let tool = BankTransactionsTool::new(&brain_with_jobs());
        let result = tool.execute(json!({})).await;
        let parsed: Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(parsed["count"], 0);
    }
}
