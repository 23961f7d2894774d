//! Ports consumed by the brain's tools. The production implementations live
//! at the edge (Firestore, worker RPC, vision pipeline); in-process
//! implementations for tests are in [`crate::testing`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which tenant context text a read/write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    Router,
    Accounting,
    Company,
}

impl ContextType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextType::Router => "router",
            ContextType::Accounting => "accounting",
            ContextType::Company => "company",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "router" => Some(ContextType::Router),
            "accounting" => Some(ContextType::Accounting),
            "company" => Some(ContextType::Company),
            _ => None,
        }
    }
}

/// Tenant context texts (router prompt, accounting book, company profile).
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// `service_name` narrows router/accounting contexts to one service
    /// (e.g. `"hr"`); `None` reads the tenant-wide text.
    async fn read_context(
        &self,
        mandate_path: &str,
        context_type: ContextType,
        service_name: Option<&str>,
    ) -> Result<String, String>;

    /// Persist an approved context text. Only called after a positive
    /// approval outcome.
    async fn write_context(
        &self,
        mandate_path: &str,
        context_type: ContextType,
        service_name: Option<&str>,
        text: &str,
    ) -> Result<(), String>;
}

/// Scheduled-task execution records (checklist snapshots, final reports).
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn save_checklist(
        &self,
        execution_id: &str,
        checklist: &crate::task::Checklist,
    ) -> Result<(), String>;

    async fn write_final_report(
        &self,
        task_id: &str,
        execution_id: &str,
        report: &crate::task::ExecutionReport,
    ) -> Result<(), String>;

    /// Remove the running-execution marker once the task has terminated.
    async fn clear_running_execution(&self, task_id: &str, execution_id: &str)
        -> Result<(), String>;
}

/// Scheduled-task definitions created by CREATE_TASK.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a task definition; returns the new task id.
    async fn create_task(&self, definition: Value) -> Result<String, String>;
}

/// Drive-document vision: fetch a document and answer a question about it.
#[async_trait]
pub trait DriveDocs: Send + Sync {
    async fn describe_document(&self, file_id: &str, question: &str) -> Result<String, String>;
}

/// Long-process tool dispatch to the backend worker fleet. The invocation
/// returns a queued receipt; completion arrives later as an RTDB callback.
#[async_trait]
pub trait LptDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        thread_key: &str,
        agent: &str,
        action: &str,
        params: Value,
        task_title: &str,
    ) -> Result<String, String>;
}
