//! System prompt assembly.
//!
//! The prompt is rebuilt on mode changes and after summarization. Layout:
//! mode-specific base, tenant identity block, job metrics, the running
//! conversation summary (when one exists), the worker system log, and — in
//! task-execution mode — the mission addendum.

use synapse_core::tenant::{JobsMetrics, UserContext};
use synapse_core::types::ChatMode;

use crate::task::ActiveTaskData;

/// Mode-specific base instructions.
fn base_prompt(mode: ChatMode) -> &'static str {
    match mode {
        ChatMode::General => {
            "You are the tenant's finance operations assistant. Answer using \
             the provided context and tools; prefer tool data over assumptions."
        }
        ChatMode::Onboarding => {
            "You are guiding the tenant through onboarding. A background job \
             is doing the heavy lifting; relay its progress from the job log \
             and ask the user only for what the job cannot discover itself."
        }
        ChatMode::ApBookeeper => {
            "You assist with accounts-payable bookkeeping jobs. Use the job \
             tools to inspect pending items before advising."
        }
        ChatMode::Router => {
            "You assist with document routing decisions. The router context \
             holds the tenant's routing rules; read it before proposing changes."
        }
        ChatMode::Banker => {
            "You assist with bank reconciliation. Use the transaction tools \
             for live data."
        }
        ChatMode::TaskExecution => {
            "You are executing a scheduled mission autonomously. Work through \
             the plan step by step and record progress with the checklist tools."
        }
    }
}

/// Everything the prompt builder needs beyond the mode.
#[derive(Default)]
pub struct PromptInputs<'a> {
    pub user_context: Option<&'a UserContext>,
    pub jobs_metrics: Option<JobsMetrics>,
    pub summary: Option<&'a str>,
    pub system_log: &'a str,
    pub active_task: Option<&'a ActiveTaskData>,
}

pub fn build_system_prompt(mode: ChatMode, inputs: &PromptInputs<'_>) -> String {
    let mut prompt = String::from(base_prompt(mode));

    if let Some(ctx) = inputs.user_context {
        prompt.push_str(&format!(
            "\n\n## Tenant\nCompany: {}\nLanguage: {}\nTimezone: {}\nDMS: {}",
            ctx.company_name, ctx.language, ctx.timezone, ctx.dms_kind
        ));
    }

    if let Some(metrics) = inputs.jobs_metrics {
        prompt.push_str(&format!(
            "\n\n## Pending jobs\nAP bookkeeping: {}\nRouting: {}\nBanking: {}\nTotal: {}",
            metrics.apbookeeper_pending,
            metrics.router_pending,
            metrics.banker_pending,
            metrics.total()
        ));
    }

    if let Some(summary) = inputs.summary {
        prompt.push_str(&format!(
            "\n\n## Conversation so far (summarized)\n{}",
            summary
        ));
    }

    prompt.push_str(inputs.system_log);

    if let Some(task) = inputs.active_task {
        prompt.push_str(&task_addendum(task));
    }

    prompt
}

/// Additive task-execution block embedding the mission and the mandatory
/// workflow: CREATE_CHECKLIST → UPDATE_STEP … → TERMINATE_TASK.
fn task_addendum(task: &ActiveTaskData) -> String {
    let mut out = format!(
        "\n\n## Mission\n{}\n\nExecution plan:\n{}\n",
        task.mission, task.execution_plan
    );
    if let Some(ref report) = task.last_execution_report {
        out.push_str(&format!("\nLast execution report:\n{}\n", report));
    }
    out.push_str(
        "\nWorkflow requirement: first call CREATE_CHECKLIST with your step \
         plan, call UPDATE_STEP as each step starts and finishes, and finish \
         with TERMINATE_TASK carrying your conclusion.",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_includes_tenant_and_metrics() {
        let ctx = UserContext {
            mandate_path: "tenants/acme".into(),
            company_name: "Acme SA".into(),
            language: "fr".into(),
            timezone: "Europe/Zurich".into(),
            dms_kind: "drive".into(),
            ..Default::default()
        };
        let prompt = build_system_prompt(
            ChatMode::General,
            &PromptInputs {
                user_context: Some(&ctx),
                jobs_metrics: Some(JobsMetrics {
                    apbookeeper_pending: 4,
                    router_pending: 0,
                    banker_pending: 1,
                }),
                ..Default::default()
            },
        );
        assert!(prompt.contains("Acme SA"));
        assert!(prompt.contains("AP bookkeeping: 4"));
        assert!(prompt.contains("Total: 5"));
    }

    #[test]
    fn summary_section_appears_after_reset() {
        let prompt = build_system_prompt(
            ChatMode::General,
            &PromptInputs {
                summary: Some("User asked about Q3 invoices."),
                ..Default::default()
            },
        );
        assert!(prompt.contains("Conversation so far (summarized)"));
        assert!(prompt.contains("Q3 invoices"));
    }

    #[test]
    fn task_mode_embeds_mission_and_workflow_requirement() {
        let task = ActiveTaskData {
            task_id: "task1".into(),
            execution_id: "exec1".into(),
            mission: "Reconcile May bank statement".into(),
            mandate_path: "tenants/acme".into(),
            execution_plan: serde_json::json!(["fetch", "match", "report"]),
            last_execution_report: None,
            persist_report: true,
            checklist: None,
            started_at: chrono::Utc::now(),
        };
        let prompt = build_system_prompt(
            ChatMode::TaskExecution,
            &PromptInputs {
                active_task: Some(&task),
                ..Default::default()
            },
        );
        assert!(prompt.contains("Reconcile May bank statement"));
        assert!(prompt.contains("CREATE_CHECKLIST"));
        assert!(prompt.contains("TERMINATE_TASK"));
    }
}
