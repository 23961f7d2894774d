//! Tenant context tools: three readers plus the approval-gated updater.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use synapse_approval::{build_text_modification_card, truncate_preview, ApprovalRequest};

use crate::brain::{Brain, ContextProposal, ProposalStatus};
use crate::ports::{ContextStore, ContextType};
use crate::text_updater::{apply_operations, Operation};

use super::{Tool, ToolDeps, ToolKind, ToolResult};

/// Reader over one context text. Three instances cover router, accounting,
/// and company.
pub struct ReadContextTool {
    deps: Arc<ToolDeps>,
    brain: Arc<Brain>,
    context_type: ContextType,
    name: &'static str,
    description: &'static str,
}

impl ReadContextTool {
    pub fn router(deps: &Arc<ToolDeps>, brain: &Arc<Brain>) -> Self {
        Self {
            deps: Arc::clone(deps),
            brain: Arc::clone(brain),
            context_type: ContextType::Router,
            name: "GET_ROUTER_PROMPT",
            description: "Read the tenant's document-routing rules, optionally for one service.",
        }
    }

    pub fn accounting(deps: &Arc<ToolDeps>, brain: &Arc<Brain>) -> Self {
        Self {
            deps: Arc::clone(deps),
            brain: Arc::clone(brain),
            context_type: ContextType::Accounting,
            name: "GET_APBOOKEEPER_CONTEXT",
            description: "Read the tenant's accounting context, optionally for one service.",
        }
    }

    pub fn company(deps: &Arc<ToolDeps>, brain: &Arc<Brain>) -> Self {
        Self {
            deps: Arc::clone(deps),
            brain: Arc::clone(brain),
            context_type: ContextType::Company,
            name: "GET_COMPANY_CONTEXT",
            description: "Read the tenant's company profile context.",
        }
    }
}

#[async_trait]
impl Tool for ReadContextTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "service_name": {
                    "type": "string",
                    "description": "Optional service to scope the context to (e.g. 'hr')."
                }
            }
        })
    }

    async fn execute(&self, input: Value) -> ToolResult {
        let Some(ctx) = self.brain.user_context() else {
            return ToolResult::error("no user context loaded for this session");
        };
        let service = input.get("service_name").and_then(Value::as_str);
        match self
            .deps
            .context_store
            .read_context(&ctx.mandate_path, self.context_type, service)
            .await
        {
            Ok(text) => ToolResult::success(text),
            Err(e) => ToolResult::error(format!("context read failed: {e}")),
        }
    }
}

/// UPDATE_CONTEXT — applies the proposed operations, shows the user a diff
/// card, and persists only on approval. The model receives bounded previews
/// and the per-operation log, never the full texts.
pub struct UpdateContextTool {
    deps: Arc<ToolDeps>,
    brain: Arc<Brain>,
}

impl UpdateContextTool {
    pub fn new(deps: &Arc<ToolDeps>, brain: &Arc<Brain>) -> Self {
        Self {
            deps: Arc::clone(deps),
            brain: Arc::clone(brain),
        }
    }
}

#[async_trait]
impl Tool for UpdateContextTool {
    fn name(&self) -> &str {
        "UPDATE_CONTEXT"
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Meta
    }

    fn description(&self) -> &str {
        "Propose changes to a tenant context text (router, accounting, or company). \
         The user reviews a diff card; nothing is persisted unless they approve. \
         Operations target 'beg', 'mid', or 'end' sections; 'mid' needs a 'context' locator."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "context_type": {
                    "type": "string",
                    "enum": ["router", "accounting", "company"],
                },
                "service_name": {
                    "type": "string",
                    "description": "Service scope for router/accounting contexts."
                },
                "operations": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "section_type": {"type": "string", "enum": ["beg", "mid", "end"]},
                            "operation": {"type": "string", "enum": ["add", "replace", "delete"]},
                            "new_content": {"type": "string"},
                            "context": {"type": "string"}
                        },
                        "required": ["section_type", "operation"]
                    }
                }
            },
            "required": ["context_type", "operations"]
        })
    }

    async fn execute(&self, input: Value) -> ToolResult {
        let Some(user_ctx) = self.brain.user_context() else {
            return ToolResult::error("no user context loaded for this session");
        };
        let Some(context_type) = input
            .get("context_type")
            .and_then(Value::as_str)
            .and_then(ContextType::parse)
        else {
            return ToolResult::error("context_type must be router, accounting, or company");
        };
        let service_name = input
            .get("service_name")
            .and_then(Value::as_str)
            .map(String::from);
        let operations: Vec<Operation> = match input.get("operations") {
            Some(ops) => match serde_json::from_value(ops.clone()) {
                Ok(ops) => ops,
                Err(e) => return ToolResult::error(format!("invalid operations: {e}")),
            },
            None => return ToolResult::error("missing required field 'operations'"),
        };

        let original = match self
            .deps
            .context_store
            .read_context(&user_ctx.mandate_path, context_type, service_name.as_deref())
            .await
        {
            Ok(text) => text,
            Err(e) => return ToolResult::error(format!("context read failed: {e}")),
        };

        let update = apply_operations(&original, &operations);
        if !update.success {
            warn!(
                thread = %self.brain.thread_key,
                context = context_type.as_str(),
                "text operations partially failed, requesting approval on current state"
            );
        }

        let mut proposal = ContextProposal::new(
            context_type,
            service_name.clone(),
            original.clone(),
            update.updated_text.clone(),
            update.operations_log.clone(),
        );

        let card = build_text_modification_card(
            context_type.as_str(),
            &original,
            &update.updated_text,
            &update.operations_log,
        );

        self.brain.set_proposal(proposal.clone());

        let outcome = match self
            .deps
            .approval
            .request_approval_with_card(ApprovalRequest {
                user_id: self.brain.user_id.clone(),
                tenant_id: self.brain.tenant_id.clone(),
                thread_key: self.brain.thread_key.clone(),
                chat_mode: self.brain.chat_mode(),
                card_type: "text_modification".to_string(),
                card_body: card,
                timeout: self.deps.approval_timeout,
                assistant_message_id: None,
            })
            .await
        {
            Ok(o) => o,
            Err(e) => {
                self.brain.take_proposal();
                return ToolResult::error(format!("approval request failed: {e}"));
            }
        };

        let ops_summary = truncate_preview(
            &serde_json::to_string(&update.operations_log).unwrap_or_default(),
            600,
        );

        if outcome.timed_out {
            self.brain.take_proposal();
            return ToolResult::success(
                json!({
                    "status": "timeout",
                    "approved": false,
                    "card_message_id": outcome.card_message_id,
                })
                .to_string(),
            );
        }

        if !outcome.approved {
            proposal.status = ProposalStatus::Rejected;
            self.brain.take_proposal();
            return ToolResult::success(
                json!({
                    "status": "rejected",
                    "approved": false,
                    "user_message": outcome.user_message,
                    "operations": ops_summary,
                })
                .to_string(),
            );
        }

        // Approved: persist through the context writer, then drop the
        // proposal.
        proposal.status = ProposalStatus::Approved;
        if let Err(e) = self
            .deps
            .context_store
            .write_context(
                &user_ctx.mandate_path,
                context_type,
                service_name.as_deref(),
                &update.updated_text,
            )
            .await
        {
            self.brain.take_proposal();
            return ToolResult::error(format!("context write failed after approval: {e}"));
        }
        self.brain.take_proposal();

        info!(
            thread = %self.brain.thread_key,
            context = context_type.as_str(),
            proposal = %proposal.proposal_id,
            "context update published"
        );

        ToolResult::success(
            json!({
                "status": "published",
                "approved": true,
                "action": outcome.action,
                "user_message": outcome.user_message,
                "operations": ops_summary,
                "before_preview": truncate_preview(&original, 200),
                "after_preview": truncate_preview(&update.updated_text, 200),
            })
            .to_string(),
        )
    }
}
