//! Tool system for the agentic workflow.
//!
//! Tools partition into SPT (short, in-process — the result returns to the
//! model in the next turn), LPT (dispatched to a worker; the invocation
//! returns a queued receipt and completion arrives later as a callback), and
//! meta tools the workflow itself inspects (TERMINATE_TASK, UPDATE_CONTEXT,
//! CREATE_TASK).

pub mod checklist;
pub mod context;
pub mod drive;
pub mod jobs;
pub mod lpt;
pub mod meta;
pub mod tasks;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use synapse_approval::ApprovalBroker;
use synapse_core::types::ChatMode;
use synapse_hub::WsHub;
use synapse_provider::ToolDefinition;
use synapse_rtdb::RtdbPort;

use crate::brain::Brain;
use crate::ports::{ContextStore, DriveDocs, ExecutionStore, LptDispatcher, TaskStore};

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Text content returned to the LLM.
    pub content: String,
    /// Whether the tool execution failed.
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// Execution class of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// In-process, synchronous from the model's viewpoint.
    Short,
    /// Dispatched to a worker; returns a queued receipt.
    Long,
    /// Inspected by the workflow loop itself.
    Meta,
}

/// Trait that all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name (e.g. "GET_ROUTER_JOBS").
    fn name(&self) -> &str;
    fn kind(&self) -> ToolKind {
        ToolKind::Short
    }
    fn description(&self) -> &str;
    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> serde_json::Value;
    /// Execute the tool with the given (schema-shaped) input.
    async fn execute(&self, input: serde_json::Value) -> ToolResult;
}

/// Shared ports injected into every tool.
pub struct ToolDeps {
    pub rtdb: Arc<dyn RtdbPort>,
    pub hub: Arc<WsHub>,
    pub approval: Arc<ApprovalBroker>,
    pub context_store: Arc<dyn ContextStore>,
    pub execution_store: Arc<dyn ExecutionStore>,
    pub task_store: Arc<dyn TaskStore>,
    pub drive_docs: Arc<dyn DriveDocs>,
    pub lpt: Arc<dyn LptDispatcher>,
    pub approval_timeout: Duration,
}

/// Resolve the tool set for the brain's current chat mode.
pub fn build_tools(deps: &Arc<ToolDeps>, brain: &Arc<Brain>) -> Vec<Box<dyn Tool>> {
    let mode = brain.chat_mode();
    let mut tools: Vec<Box<dyn Tool>> = vec![
        Box::new(jobs::ApBookeeperJobsTool::new(brain)),
        Box::new(jobs::RouterJobsTool::new(brain)),
        Box::new(jobs::BankTransactionsTool::new(brain)),
        Box::new(context::ReadContextTool::router(deps, brain)),
        Box::new(context::ReadContextTool::accounting(deps, brain)),
        Box::new(context::ReadContextTool::company(deps, brain)),
        Box::new(context::UpdateContextTool::new(deps, brain)),
        Box::new(drive::ViewDriveDocumentTool::new(deps)),
        Box::new(tasks::CreateTaskTool::new(deps, brain)),
        Box::new(lpt::FileManagerTool::new(deps, brain)),
        Box::new(lpt::AccountingTool::new(deps, brain)),
        Box::new(meta::TerminateTaskTool::new()),
    ];

    if mode.is_onboarding_like() {
        tools.push(Box::new(meta::SubmitWaitingResponseTool::new()));
    }

    if mode == ChatMode::TaskExecution {
        tools.push(Box::new(checklist::CreateChecklistTool::new(deps, brain)));
        tools.push(Box::new(checklist::UpdateStepTool::new(deps, brain)));
    }

    tools
}

/// Convert a slice of tools to API-level tool definitions.
pub fn to_definitions(tools: &[Box<dyn Tool>]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|t| ToolDefinition {
            name: t.name().to_string(),
            description: t.description().to_string(),
            input_schema: t.input_schema(),
        })
        .collect()
}

/// Find and execute the named tool. Returns an error ToolResult if unknown.
pub async fn execute_tool(
    tools: &[Box<dyn Tool>],
    name: &str,
    input: serde_json::Value,
) -> ToolResult {
    match tools.iter().find(|t| t.name() == name) {
        Some(tool) => {
            tracing::debug!(tool = name, "executing tool");
            tool.execute(input).await
        }
        None => ToolResult::error(format!("unknown tool: {}", name)),
    }
}

/// Kind lookup for the workflow loop.
pub fn kind_of(tools: &[Box<dyn Tool>], name: &str) -> ToolKind {
    tools
        .iter()
        .find(|t| t.name() == name)
        .map(|t| t.kind())
        .unwrap_or(ToolKind::Short)
}
