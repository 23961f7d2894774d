use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use synapse_core::tenant::{JobsData, UserContext};
use synapse_core::types::{ChatMode, TenantId, ThreadKey, UserId};
use synapse_provider::estimate_tokens;
use synapse_rtdb::inner_text;

use crate::history::ChatHistory;
use crate::ports::ContextType;
use crate::prompt::{build_system_prompt, PromptInputs};
use crate::system_log::SystemLog;
use crate::task::ActiveTaskData;

/// Proposal held while an UPDATE_CONTEXT approval is pending.
#[derive(Debug, Clone)]
pub struct ContextProposal {
    pub proposal_id: String,
    pub context_type: ContextType,
    pub service_name: Option<String>,
    pub original_text: String,
    /// SHA-256 of the original text — detects concurrent edits before
    /// persisting the approved version.
    pub original_hash: String,
    pub updated_text: String,
    pub operations_log: Vec<Value>,
    pub status: ProposalStatus,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalStatus {
    PendingApproval,
    Approved,
    Rejected,
}

impl ContextProposal {
    pub fn new(
        context_type: ContextType,
        service_name: Option<String>,
        original_text: String,
        updated_text: String,
        operations_log: Vec<Value>,
    ) -> Self {
        let original_hash = hex::encode(Sha256::digest(original_text.as_bytes()));
        Self {
            proposal_id: Uuid::new_v4().to_string(),
            context_type,
            service_name,
            original_text,
            original_hash,
            updated_text,
            operations_log,
            status: ProposalStatus::PendingApproval,
            created_at: Utc::now(),
        }
    }
}

/// Per-thread conversational context.
///
/// All interior locks are short-lived and never held across an await —
/// the per-thread invariant (one workflow at a time) keeps real contention
/// to the listener's system-log writes.
pub struct Brain {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub thread_key: ThreadKey,
    chat_mode: Mutex<ChatMode>,
    history: Mutex<ChatHistory>,
    system_log: Mutex<SystemLog>,
    summary: Mutex<Option<String>>,
    pending_waiting_event: Mutex<Option<Value>>,
    active_task: Mutex<Option<ActiveTaskData>>,
    proposal: Mutex<Option<ContextProposal>>,
    /// Mode side-channel records (onboarding profile, job payload).
    onboarding_data: Mutex<Option<Value>>,
    job_data: Mutex<Option<Value>>,
    /// Shared read handles into the owning session's slots.
    user_context: Arc<RwLock<Option<UserContext>>>,
    jobs: Arc<RwLock<JobsData>>,
    /// Set by invalidate_user_context; the next prompt render re-reads the
    /// shared slot unconditionally (the slot itself was refreshed).
    context_stale: AtomicBool,
}

impl Brain {
    pub fn new(
        user_id: UserId,
        tenant_id: TenantId,
        thread_key: ThreadKey,
        chat_mode: ChatMode,
        user_context: Arc<RwLock<Option<UserContext>>>,
        jobs: Arc<RwLock<JobsData>>,
    ) -> Self {
        info!(user = %user_id, tenant = %tenant_id, thread = %thread_key, mode = %chat_mode, "brain created");
        Self {
            user_id,
            tenant_id,
            thread_key,
            chat_mode: Mutex::new(chat_mode),
            history: Mutex::new(ChatHistory::new()),
            system_log: Mutex::new(SystemLog::new()),
            summary: Mutex::new(None),
            pending_waiting_event: Mutex::new(None),
            active_task: Mutex::new(None),
            proposal: Mutex::new(None),
            onboarding_data: Mutex::new(None),
            job_data: Mutex::new(None),
            user_context,
            jobs,
            context_stale: AtomicBool::new(false),
        }
    }

    pub fn chat_mode(&self) -> ChatMode {
        *self.chat_mode.lock().unwrap()
    }

    /// Change the mode; the system prompt follows on the next render.
    pub fn set_chat_mode(&self, mode: ChatMode) {
        let mut guard = self.chat_mode.lock().unwrap();
        if *guard != mode {
            debug!(thread = %self.thread_key, old = %*guard, new = %mode, "chat mode changed");
            *guard = mode;
        }
    }

    pub fn history(&self) -> MutexGuard<'_, ChatHistory> {
        self.history.lock().unwrap()
    }

    /// Rebuild chat history from RTDB message records (oldest first).
    /// Assistant records are recognized by their sender id; everything else
    /// is a user turn. Returns the number of messages loaded.
    pub fn load_history_from_records(&self, records: &[Value]) -> usize {
        let mut history = self.history();
        history.clear();
        let mut loaded = 0;
        for record in records {
            let text = inner_text(record.get("content").unwrap_or(&Value::Null));
            if text.is_empty() {
                continue;
            }
            let sender = record
                .get("sender_id")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if sender == "synapse" || sender == "assistant" {
                history.add_assistant_text(&text);
            } else {
                history.add_user_text(&text);
            }
            loaded += 1;
        }
        loaded
    }

    // ── System prompt ───────────────────────────────────────────────────────

    /// Render the current system prompt from mode, tenant context, metrics,
    /// summary, worker log, and the active task.
    pub fn render_system_prompt(&self) -> String {
        self.context_stale.store(false, Ordering::Relaxed);
        let mode = self.chat_mode();
        let user_context = self.user_context.read().unwrap().clone();
        let metrics = self.jobs.read().unwrap().metrics;
        let summary = self.summary.lock().unwrap().clone();
        let system_log = self.system_log.lock().unwrap().render();
        let active_task = self.active_task.lock().unwrap().clone();

        build_system_prompt(
            mode,
            &PromptInputs {
                user_context: user_context.as_ref(),
                jobs_metrics: Some(metrics),
                summary: summary.as_deref(),
                system_log: &system_log,
                active_task: active_task.as_ref(),
            },
        )
    }

    /// Estimated total context size: history plus rendered system prompt.
    pub fn total_context_tokens(&self) -> u64 {
        let history_tokens = self.history().token_estimate();
        history_tokens + estimate_tokens(&self.render_system_prompt())
    }

    /// Atomically adopt a summary: the prompt gains the summary section and
    /// the history is cleared. The caller's stream is not interrupted.
    pub fn reset_context_with_summary(&self, summary: String) -> usize {
        let cleared = {
            let mut history = self.history();
            let n = history.len();
            history.clear();
            n
        };
        *self.summary.lock().unwrap() = Some(summary);
        info!(thread = %self.thread_key, cleared, "context reset with summary");
        cleared
    }

    pub fn summary(&self) -> Option<String> {
        self.summary.lock().unwrap().clone()
    }

    // ── Worker system log ───────────────────────────────────────────────────

    /// Extend the system prompt with one bounded worker-log entry.
    pub fn append_system_log(&self, id: &str, timestamp: &str, payload: &str) {
        self.system_log
            .lock()
            .unwrap()
            .append_entry(id, timestamp, payload);
    }

    /// Replace a job's log section with a freshly concatenated buffer.
    pub fn set_system_log_section(&self, id: &str, text: &str) {
        self.system_log.lock().unwrap().set_section(id, text);
    }

    pub fn system_log_rendered(&self) -> String {
        self.system_log.lock().unwrap().render()
    }

    // ── Waiting context / proposals / task state ────────────────────────────

    pub fn set_waiting_event(&self, event: Value) {
        *self.pending_waiting_event.lock().unwrap() = Some(event);
    }

    pub fn take_waiting_event(&self) -> Option<Value> {
        self.pending_waiting_event.lock().unwrap().take()
    }

    pub fn set_proposal(&self, proposal: ContextProposal) {
        *self.proposal.lock().unwrap() = Some(proposal);
    }

    pub fn take_proposal(&self) -> Option<ContextProposal> {
        self.proposal.lock().unwrap().take()
    }

    pub fn set_active_task(&self, task: ActiveTaskData) {
        *self.active_task.lock().unwrap() = Some(task);
    }

    pub fn active_task(&self) -> Option<ActiveTaskData> {
        self.active_task.lock().unwrap().clone()
    }

    pub fn with_active_task<R>(
        &self,
        f: impl FnOnce(&mut ActiveTaskData) -> R,
    ) -> Option<R> {
        self.active_task.lock().unwrap().as_mut().map(f)
    }

    pub fn take_active_task(&self) -> Option<ActiveTaskData> {
        self.active_task.lock().unwrap().take()
    }

    pub fn set_onboarding_data(&self, data: Value) {
        *self.onboarding_data.lock().unwrap() = Some(data);
    }

    pub fn onboarding_data(&self) -> Option<Value> {
        self.onboarding_data.lock().unwrap().clone()
    }

    pub fn set_job_data(&self, data: Value) {
        *self.job_data.lock().unwrap() = Some(data);
    }

    pub fn job_data(&self) -> Option<Value> {
        self.job_data.lock().unwrap().clone()
    }

    // ── Shared tenant state ─────────────────────────────────────────────────

    pub fn user_context(&self) -> Option<UserContext> {
        self.user_context.read().unwrap().clone()
    }

    pub fn jobs_data(&self) -> JobsData {
        self.jobs.read().unwrap().clone()
    }

    pub fn mark_context_stale(&self) {
        self.context_stale.store(true, Ordering::Relaxed);
    }

    pub fn context_is_stale(&self) -> bool {
        self.context_stale.load(Ordering::Relaxed)
    }

    /// Language for localized user-facing system messages.
    pub fn language(&self) -> String {
        self.user_context()
            .map(|c| c.language)
            .unwrap_or_else(|| "en".to_string())
    }

    /// Tear down transient state when the thread is flushed.
    pub fn close(&self) {
        self.history().clear();
        self.system_log.lock().unwrap().clear();
        *self.summary.lock().unwrap() = None;
        *self.pending_waiting_event.lock().unwrap() = None;
        *self.proposal.lock().unwrap() = None;
        *self.active_task.lock().unwrap() = None;
        info!(thread = %self.thread_key, "brain closed");
    }
}
