//! HTTP RPC surface. Every handler returns a `{success, …}` envelope and
//! never lets an error cross the boundary as a 5xx with an opaque body.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use synapse_core::types::{ChatMode, TenantId, ThreadKey, UserId};
use synapse_manager::ManagerError;

use crate::app::AppState;

fn envelope(result: Result<Value, ManagerError>) -> Json<Value> {
    match result {
        Ok(value) => Json(value),
        Err(e) => {
            warn!(error = %e, "rpc operation failed");
            Json(json!({ "success": false, "error": e.public_message() }))
        }
    }
}

/// Parse an optional chat-mode string, rejecting unknown values explicitly.
fn parse_mode(mode: &Option<String>) -> Result<Option<ChatMode>, Json<Value>> {
    match mode {
        None => Ok(None),
        Some(s) => s.parse::<ChatMode>().map(Some).map_err(|e| {
            Json(json!({ "success": false, "error": e }))
        }),
    }
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
pub struct InitializeSessionRequest {
    pub user_id: String,
    pub tenant_id: String,
    pub client_uuid: String,
    pub chat_mode: Option<String>,
}

pub async fn initialize_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InitializeSessionRequest>,
) -> Json<Value> {
    let mode = match parse_mode(&req.chat_mode) {
        Ok(m) => m,
        Err(e) => return e,
    };
    envelope(
        state
            .manager
            .initialize_session(
                &UserId::from(req.user_id),
                &TenantId::from(req.tenant_id),
                &req.client_uuid,
                mode,
            )
            .await,
    )
}

#[derive(Deserialize)]
pub struct EnterChatRequest {
    pub user_id: String,
    pub tenant_id: String,
    pub thread_key: String,
    pub chat_mode: Option<String>,
    pub job_status: Option<String>,
}

pub async fn enter_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EnterChatRequest>,
) -> Json<Value> {
    let mode = match parse_mode(&req.chat_mode) {
        Ok(m) => m,
        Err(e) => return e,
    };
    envelope(
        state
            .manager
            .enter_chat(
                &UserId::from(req.user_id),
                &TenantId::from(req.tenant_id),
                &ThreadKey::from(req.thread_key),
                mode,
                req.job_status.as_deref(),
            )
            .await,
    )
}

#[derive(Deserialize)]
pub struct LeaveChatRequest {
    pub user_id: String,
    pub tenant_id: String,
    pub thread_key: Option<String>,
}

pub async fn leave_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LeaveChatRequest>,
) -> Json<Value> {
    let thread = req.thread_key.map(ThreadKey::from);
    envelope(
        state
            .manager
            .leave_chat(
                &UserId::from(req.user_id),
                &TenantId::from(req.tenant_id),
                thread.as_ref(),
            )
            .await,
    )
}

#[derive(Deserialize)]
pub struct SwitchThreadRequest {
    pub user_id: String,
    pub tenant_id: String,
    pub thread_key: String,
}

pub async fn switch_thread(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SwitchThreadRequest>,
) -> Json<Value> {
    envelope(
        state
            .manager
            .switch_thread(
                &UserId::from(req.user_id),
                &TenantId::from(req.tenant_id),
                &ThreadKey::from(req.thread_key),
            )
            .await,
    )
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub user_id: String,
    pub tenant_id: String,
    pub thread_key: String,
    pub message: String,
    pub chat_mode: Option<String>,
    pub system_prompt: Option<String>,
    pub selected_tool: Option<String>,
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendMessageRequest>,
) -> Json<Value> {
    let mode = match parse_mode(&req.chat_mode) {
        Ok(m) => m,
        Err(e) => return e,
    };
    envelope(
        state
            .manager
            .send_message(
                &UserId::from(req.user_id),
                &TenantId::from(req.tenant_id),
                &ThreadKey::from(req.thread_key),
                &req.message,
                mode,
                req.system_prompt,
                req.selected_tool.as_deref(),
            )
            .await,
    )
}

#[derive(Deserialize)]
pub struct LoadChatHistoryRequest {
    pub user_id: String,
    pub tenant_id: String,
    pub thread_key: String,
    #[serde(default)]
    pub history: Vec<Value>,
    pub chat_mode: Option<String>,
}

pub async fn load_chat_history(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoadChatHistoryRequest>,
) -> Json<Value> {
    let mode = match parse_mode(&req.chat_mode) {
        Ok(m) => m,
        Err(e) => return e,
    };
    envelope(
        state
            .manager
            .load_chat_history(
                &UserId::from(req.user_id),
                &TenantId::from(req.tenant_id),
                &ThreadKey::from(req.thread_key),
                &req.history,
                mode,
            )
            .await,
    )
}

#[derive(Deserialize)]
pub struct FlushChatHistoryRequest {
    pub user_id: String,
    pub tenant_id: String,
    pub thread_key: Option<String>,
}

pub async fn flush_chat_history(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FlushChatHistoryRequest>,
) -> Json<Value> {
    let thread = req.thread_key.map(ThreadKey::from);
    envelope(
        state
            .manager
            .flush_chat_history(
                &UserId::from(req.user_id),
                &TenantId::from(req.tenant_id),
                thread.as_ref(),
            )
            .await,
    )
}

#[derive(Deserialize)]
pub struct StopStreamingRequest {
    pub user_id: String,
    pub tenant_id: String,
    pub thread_key: Option<String>,
}

pub async fn stop_streaming(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StopStreamingRequest>,
) -> Json<Value> {
    let thread = req.thread_key.map(ThreadKey::from);
    envelope(
        state
            .manager
            .stop_streaming(
                &UserId::from(req.user_id),
                &TenantId::from(req.tenant_id),
                thread.as_ref(),
            )
            .await,
    )
}

#[derive(Deserialize)]
pub struct StartOnboardingRequest {
    pub user_id: String,
    pub tenant_id: String,
    pub thread_key: String,
}

pub async fn start_onboarding_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartOnboardingRequest>,
) -> Json<Value> {
    envelope(
        state
            .manager
            .start_onboarding_chat(
                &UserId::from(req.user_id),
                &TenantId::from(req.tenant_id),
                &ThreadKey::from(req.thread_key),
            )
            .await,
    )
}

#[derive(Deserialize)]
pub struct StopOnboardingRequest {
    pub user_id: String,
    pub tenant_id: String,
    pub thread_key: String,
    #[serde(default)]
    pub job_ids: Vec<String>,
    pub mandate_path: Option<String>,
}

pub async fn stop_onboarding_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StopOnboardingRequest>,
) -> Json<Value> {
    envelope(
        state
            .manager
            .stop_onboarding_chat(
                &UserId::from(req.user_id),
                &TenantId::from(req.tenant_id),
                &ThreadKey::from(req.thread_key),
                &req.job_ids,
                req.mandate_path.as_deref(),
            )
            .await,
    )
}

#[derive(Deserialize)]
pub struct SendCardResponseRequest {
    pub user_id: String,
    pub tenant_id: String,
    pub thread_key: String,
    pub card_name: String,
    pub card_message_id: String,
    pub action: String,
    pub user_message: Option<String>,
}

pub async fn send_card_response(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendCardResponseRequest>,
) -> Json<Value> {
    envelope(
        state
            .manager
            .send_card_response(
                &UserId::from(req.user_id),
                &TenantId::from(req.tenant_id),
                &ThreadKey::from(req.thread_key),
                &req.card_name,
                &req.card_message_id,
                &req.action,
                req.user_message.as_deref(),
            )
            .await,
    )
}

#[derive(Deserialize)]
pub struct HandleApprovalRequest {
    pub user_id: String,
    pub thread_key: String,
    pub plan_id: String,
    pub approved: bool,
    pub user_comment: Option<String>,
}

pub async fn handle_approval_response(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HandleApprovalRequest>,
) -> Json<Value> {
    envelope(
        state
            .manager
            .handle_approval_response(
                &UserId::from(req.user_id),
                &ThreadKey::from(req.thread_key),
                &req.plan_id,
                req.approved,
                req.user_comment.as_deref(),
            )
            .await,
    )
}

#[derive(Deserialize)]
pub struct InvalidateContextRequest {
    pub user_id: String,
    pub tenant_id: String,
}

pub async fn invalidate_user_context(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InvalidateContextRequest>,
) -> Json<Value> {
    envelope(
        state
            .manager
            .invalidate_user_context(&UserId::from(req.user_id), &TenantId::from(req.tenant_id))
            .await,
    )
}

/// Callback from the worker fleet when an LPT completes.
#[derive(Deserialize)]
pub struct WorkerTaskCompletedRequest {
    pub user_id: String,
    pub tenant_id: String,
    pub thread_key: String,
    pub task_response: Value,
    #[serde(default)]
    pub original_payload: Value,
    #[serde(default)]
    pub user_connected: bool,
}

pub async fn worker_task_completed(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WorkerTaskCompletedRequest>,
) -> Json<Value> {
    envelope(
        state
            .manager
            .resume_after_worker_task(
                &UserId::from(req.user_id),
                &TenantId::from(req.tenant_id),
                &ThreadKey::from(req.thread_key),
                &req.task_response,
                &req.original_payload,
                req.user_connected,
            )
            .await,
    )
}

#[derive(Deserialize)]
pub struct ExecuteScheduledTaskRequest {
    pub user_id: String,
    pub tenant_id: String,
    pub task_id: String,
    pub execution_id: String,
    pub mission: String,
    pub mandate_path: String,
    #[serde(default)]
    pub execution_plan: Value,
    pub last_execution_report: Option<Value>,
    #[serde(default = "default_schedule")]
    pub schedule: String,
}

fn default_schedule() -> String {
    "NOW".to_string()
}

pub async fn execute_scheduled_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExecuteScheduledTaskRequest>,
) -> Json<Value> {
    envelope(
        state
            .manager
            .execute_scheduled_task(
                &UserId::from(req.user_id),
                &TenantId::from(req.tenant_id),
                &req.task_id,
                &req.execution_id,
                &req.mission,
                &req.mandate_path,
                req.execution_plan,
                req.last_execution_report,
                &req.schedule,
            )
            .await,
    )
}
