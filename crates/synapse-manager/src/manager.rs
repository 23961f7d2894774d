use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use synapse_approval::ApprovalBroker;
use synapse_brain::tools::ToolDeps;
use synapse_brain::{
    run_unified_workflow, ActiveTaskData, Brain, WorkflowContext, WorkflowRequest,
};
use synapse_cache::CachePort;
use synapse_core::config::SynapseConfig;
use synapse_core::types::{chat_channel, ChatMode, TenantId, ThreadKey, UserId};
use synapse_hub::{event, WsHub};
use synapse_listener::{
    check_intermediation_on_load, install_listener, respond_during_intermediation,
    uninstall_listener, ListenerDeps,
};
use synapse_provider::LlmProvider;
use synapse_rtdb::{format_assistant_message, paths, RtdbPort};
use synapse_sessions::{Session, TenantStore};

use crate::controller::StreamingController;
use crate::error::{ManagerError, Result};
use crate::worker::{stop_jobs_http, LaunchReceipt, WorkerLauncher};

/// Everything the manager needs injected at construction.
pub struct ManagerDeps {
    pub rtdb: Arc<dyn RtdbPort>,
    pub hub: Arc<WsHub>,
    pub provider: Arc<dyn LlmProvider>,
    pub cache: Arc<dyn CachePort>,
    pub approval: Arc<ApprovalBroker>,
    pub tenant_store: Arc<dyn TenantStore>,
    pub tool_deps: Arc<ToolDeps>,
    pub launcher: Arc<dyn WorkerLauncher>,
    pub config: SynapseConfig,
}

/// RPC facade. Owns the session registry exclusively; every operation is
/// independently safe and idempotent where the contract says so.
pub struct Manager {
    rtdb: Arc<dyn RtdbPort>,
    hub: Arc<WsHub>,
    cache: Arc<dyn CachePort>,
    approval: Arc<ApprovalBroker>,
    tenant_store: Arc<dyn TenantStore>,
    launcher: Arc<dyn WorkerLauncher>,
    config: SynapseConfig,
    sessions: DashMap<(String, String), Arc<Session>>,
    /// Coarse lock guarding session initialization only.
    registry_lock: tokio::sync::Mutex<()>,
    controller: Arc<StreamingController>,
    workflow_ctx: Arc<WorkflowContext>,
    listener_deps: Arc<ListenerDeps>,
    http: reqwest::Client,
}

impl Manager {
    pub fn new(deps: ManagerDeps) -> Self {
        let workflow_ctx = Arc::new(WorkflowContext {
            provider: Arc::clone(&deps.provider),
            rtdb: Arc::clone(&deps.rtdb),
            hub: Arc::clone(&deps.hub),
            tools: Arc::clone(&deps.tool_deps),
            model: deps.config.provider.model.clone(),
            summary_model: deps.config.provider.summary_model.clone(),
            config: deps.config.workflow.clone(),
        });
        let listener_deps = Arc::new(ListenerDeps {
            rtdb: Arc::clone(&deps.rtdb),
            hub: Arc::clone(&deps.hub),
            provider: Arc::clone(&deps.provider),
            model: deps.config.provider.model.clone(),
            callback_ack_timeout: Duration::from_millis(deps.config.workflow.callback_ack_timeout_ms),
        });
        Self {
            rtdb: deps.rtdb,
            hub: deps.hub,
            cache: deps.cache,
            approval: deps.approval,
            tenant_store: deps.tenant_store,
            launcher: deps.launcher,
            config: deps.config,
            sessions: DashMap::new(),
            registry_lock: tokio::sync::Mutex::new(()),
            controller: Arc::new(StreamingController::new()),
            workflow_ctx,
            listener_deps,
            http: reqwest::Client::new(),
        }
    }

    pub fn hub(&self) -> &Arc<WsHub> {
        &self.hub
    }

    fn session_key(user_id: &UserId, tenant_id: &TenantId) -> (String, String) {
        (user_id.0.clone(), tenant_id.0.clone())
    }

    pub fn session(&self, user_id: &UserId, tenant_id: &TenantId) -> Option<Arc<Session>> {
        self.sessions
            .get(&Self::session_key(user_id, tenant_id))
            .map(|e| Arc::clone(e.value()))
    }

    /// The worker channel of an onboarding-like thread is keyed by the
    /// thread itself.
    fn job_id_for(thread_key: &ThreadKey) -> String {
        thread_key.0.clone()
    }

    fn context_cache_key(user_id: &UserId, tenant_id: &TenantId) -> String {
        format!("user_context:{}:{}", user_id, tenant_id)
    }

    // ── Session initialization ──────────────────────────────────────────────

    /// Ensure a fully initialized session exists; reuse/refresh an existing
    /// one. `status` is `created`, `refreshed`, or `reused`.
    async fn ensure_session_initialized(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        client_uuid: Option<&str>,
        chat_mode: Option<ChatMode>,
    ) -> Result<(Arc<Session>, &'static str)> {
        let _guard = self.registry_lock.lock().await;

        let session = self
            .sessions
            .entry(Self::session_key(user_id, tenant_id))
            .or_insert_with(|| Arc::new(Session::new(user_id.clone(), tenant_id.clone())))
            .clone();

        if session.is_initialized() {
            let mut status = "reused";
            if let Some(uuid) = client_uuid.filter(|u| !u.is_empty()) {
                if uuid != session.client_uuid() {
                    debug!(user = %user_id, "client uuid changed, refreshing session data");
                    self.load_session_data(&session, uuid).await?;
                    status = "refreshed";
                }
            }
            if let Some(mode) = chat_mode {
                session.set_chat_mode(mode);
                // Live brains pick up the mode on their next prompt render.
                for brain in session.all_brains() {
                    brain.set_chat_mode(mode);
                }
            }
            return Ok((session, status));
        }

        let uuid = client_uuid
            .filter(|u| !u.is_empty())
            .map(String::from)
            .or_else(|| {
                let stored = session.client_uuid();
                (!stored.is_empty()).then_some(stored)
            })
            .ok_or(ManagerError::MissingClientUuid)?;

        self.load_session_data(&session, &uuid).await?;
        if let Some(mode) = chat_mode {
            session.set_chat_mode(mode);
        }
        Ok((session, "created"))
    }

    /// Reconstruct the tenant profile and job snapshot into the session
    /// slots, caching the profile for diagnostics/invalidation.
    async fn load_session_data(&self, session: &Arc<Session>, client_uuid: &str) -> Result<()> {
        let context = self
            .tenant_store
            .load_user_context(&session.user_id, &session.tenant_id, client_uuid)
            .await
            .map_err(ManagerError::Initialization)?;
        let jobs = self
            .tenant_store
            .load_jobs(&session.tenant_id)
            .await
            .map_err(ManagerError::Initialization)?;

        if let Ok(snapshot) = serde_json::to_string(&context) {
            let key = Self::context_cache_key(&session.user_id, &session.tenant_id);
            if let Err(e) = self.cache.set_ex(&key, &snapshot, 3_600).await {
                warn!(error = %e, "user context cache write failed");
            }
        }

        session.set_client_uuid(client_uuid);
        session.set_user_context(Some(context));
        session.set_jobs(jobs);
        info!(user = %session.user_id, tenant = %session.tenant_id, "session data loaded");
        Ok(())
    }

    pub async fn initialize_session(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        client_uuid: &str,
        chat_mode: Option<ChatMode>,
    ) -> Result<Value> {
        let (session, status) = self
            .ensure_session_initialized(user_id, tenant_id, Some(client_uuid), chat_mode)
            .await?;
        Ok(json!({
            "success": true,
            "session_id": session.session_id.as_str(),
            "status": if status == "reused" { "refreshed" } else { status },
        }))
    }

    // ── Brains ──────────────────────────────────────────────────────────────

    /// Get or lazily create the thread's brain, loading history from the
    /// RTDB. Guarded by the per-thread creation lock so concurrent
    /// enter_chat calls stay idempotent.
    async fn get_or_create_brain(
        &self,
        session: &Arc<Session>,
        thread_key: &ThreadKey,
        chat_mode: ChatMode,
    ) -> Result<(Arc<Brain>, bool)> {
        let creation_lock = session.brain_creation_lock(thread_key);
        let _guard = creation_lock.lock().await;

        if let Some(brain) = session.brain(thread_key) {
            return Ok((brain, false));
        }

        let brain = Arc::new(Brain::new(
            session.user_id.clone(),
            session.tenant_id.clone(),
            thread_key.clone(),
            chat_mode,
            session.user_context_handle(),
            session.jobs_handle(),
        ));

        let records = self
            .rtdb
            .get_children_sorted(
                &paths::thread_messages(&session.tenant_id, chat_mode, thread_key),
                None,
            )
            .await?;
        // Cards and replay commands are UI artifacts, not conversation turns.
        let messages: Vec<Value> = records
            .into_iter()
            .filter(|r| r.get("message_type").and_then(Value::as_str) == Some("MESSAGE"))
            .collect();
        let loaded = brain.load_history_from_records(&messages);
        debug!(thread = %thread_key, loaded, "brain history loaded from RTDB");

        session.insert_brain(thread_key.clone(), Arc::clone(&brain));
        Ok((brain, true))
    }

    /// Install the follow-up listener and evaluate intermediation
    /// reactivation for an onboarding-like thread.
    async fn attach_followup(
        &self,
        session: &Arc<Session>,
        brain: &Arc<Brain>,
        thread_key: &ThreadKey,
        job_status: Option<&str>,
    ) -> Result<()> {
        let job_id = Self::job_id_for(thread_key);
        install_listener(&self.listener_deps, session, brain, thread_key, &job_id).await?;
        brain.set_job_data(json!({ "job_id": job_id, "status": job_status }));
        check_intermediation_on_load(
            &self.listener_deps,
            session,
            brain,
            thread_key,
            &job_id,
            job_status,
        )
        .await?;
        Ok(())
    }

    // ── Chat lifecycle ──────────────────────────────────────────────────────

    pub async fn enter_chat(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        thread_key: &ThreadKey,
        chat_mode: Option<ChatMode>,
        job_status: Option<&str>,
    ) -> Result<Value> {
        let (session, _) = self
            .ensure_session_initialized(user_id, tenant_id, None, chat_mode)
            .await?;
        session.enter_page(thread_key);

        let mode = chat_mode.unwrap_or_else(|| session.chat_mode());
        let (brain, _created) = self.get_or_create_brain(&session, thread_key, mode).await?;

        if mode.is_onboarding_like() {
            self.attach_followup(&session, &brain, thread_key, job_status)
                .await?;
        }

        // Deliver anything buffered while the user was away.
        self.hub
            .replay_buffered(user_id.as_str(), thread_key.as_str())
            .await;

        Ok(json!({ "success": true, "brain_ready": true }))
    }

    pub async fn leave_chat(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        thread_key: Option<&ThreadKey>,
    ) -> Result<Value> {
        let Some(session) = self.session(user_id, tenant_id) else {
            return Ok(json!({
                "success": true,
                "was_on_chat_page": false,
                "was_on_thread": false,
            }));
        };
        let (was_on_page, was_on_thread) = session.leave_page(thread_key);
        Ok(json!({
            "success": true,
            "was_on_chat_page": was_on_page,
            "was_on_thread": was_on_thread,
        }))
    }

    pub async fn switch_thread(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        thread_key: &ThreadKey,
    ) -> Result<Value> {
        if let Some(session) = self.session(user_id, tenant_id) {
            session.switch_thread(thread_key);
        }
        Ok(json!({ "success": true }))
    }

    pub async fn load_chat_history(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        thread_key: &ThreadKey,
        history: &[Value],
        chat_mode: Option<ChatMode>,
    ) -> Result<Value> {
        let (session, _) = self
            .ensure_session_initialized(user_id, tenant_id, None, chat_mode)
            .await?;
        let mode = chat_mode.unwrap_or_else(|| session.chat_mode());

        let (brain, created) = self.get_or_create_brain(&session, thread_key, mode).await?;
        let loaded = brain.load_history_from_records(history);

        if mode.is_onboarding_like() {
            self.attach_followup(&session, &brain, thread_key, None).await?;
        }

        Ok(json!({
            "success": true,
            "status": if created { "created" } else { "updated" },
            "loaded_messages": loaded,
            "active_brains_count": session.brains_count(),
        }))
    }

    pub async fn flush_chat_history(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        thread_key: Option<&ThreadKey>,
    ) -> Result<Value> {
        let Some(session) = self.session(user_id, tenant_id) else {
            return Ok(json!({ "success": true, "threads_cleared": 0 }));
        };

        let cleared = match thread_key {
            Some(thread) => {
                // Running LPT jobs are left alone; only the local streaming
                // task is cancelled so it cannot write into a closed brain.
                self.controller.stop(user_id, tenant_id, thread);
                uninstall_listener(&session, thread);
                usize::from(session.flush_thread(thread))
            }
            None => {
                self.controller.stop_session(user_id, tenant_id);
                session.teardown()
            }
        };

        Ok(json!({ "success": true, "threads_cleared": cleared }))
    }

    pub async fn stop_streaming(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        thread_key: Option<&ThreadKey>,
    ) -> Result<Value> {
        let stopped = match thread_key {
            Some(thread) => usize::from(self.controller.stop(user_id, tenant_id, thread)),
            None => self.controller.stop_session(user_id, tenant_id),
        };
        Ok(json!({ "success": true, "stopped_count": stopped }))
    }

    // ── Messaging ───────────────────────────────────────────────────────────

    pub async fn send_message(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        thread_key: &ThreadKey,
        message: &str,
        chat_mode: Option<ChatMode>,
        system_prompt: Option<String>,
        selected_tool: Option<&str>,
    ) -> Result<Value> {
        let (session, _) = self
            .ensure_session_initialized(user_id, tenant_id, None, chat_mode)
            .await?;
        let brain = session
            .brain(thread_key)
            .ok_or(ManagerError::BrainNotInitialized)?;
        if let Some(mode) = chat_mode {
            brain.set_chat_mode(mode);
        }

        // Direct-dialog mode bypasses the model entirely.
        if session.intermediation_active(thread_key) {
            let handle = session
                .listener(thread_key)
                .ok_or_else(|| ManagerError::ListenerMissing(thread_key.0.clone()))?;
            respond_during_intermediation(
                &self.listener_deps,
                &session,
                &brain,
                &handle,
                thread_key,
                message,
            )
            .await?;
            return Ok(json!({ "success": true, "mode": "intermediation" }));
        }

        let assistant_message_id = Uuid::new_v4().to_string();
        self.write_placeholder(&session, brain.chat_mode(), thread_key, &assistant_message_id, "streaming")
            .await?;

        let initial_content = match selected_tool {
            Some(tool) if !tool.is_empty() => {
                format!("{}\n\n[The user pre-selected the {} tool for this request.]", message, tool)
            }
            _ => message.to_string(),
        };

        let (token, gen) = self.controller.begin(user_id, tenant_id, thread_key).await;
        let ctx = Arc::clone(&self.workflow_ctx);
        let brain_task = Arc::clone(&brain);
        let request = WorkflowRequest {
            initial_content,
            assistant_message_id: assistant_message_id.clone(),
            enable_streaming: true,
            system_prompt_override: system_prompt,
        };
        let (u, t, th) = (user_id.clone(), tenant_id.clone(), thread_key.clone());
        let controller = Arc::clone(&self.controller);
        let handle = tokio::spawn(async move {
            let result = run_unified_workflow(&ctx, &brain_task, request, token).await;
            if let Err(e) = result {
                warn!(thread = %th, error = %e, "workflow failed");
            }
            controller.finish(&u, &t, &th, gen);
        });
        self.controller.attach(user_id, tenant_id, thread_key, handle);

        Ok(json!({
            "success": true,
            "assistant_message_id": assistant_message_id,
            "ws_channel": chat_channel(user_id, tenant_id, thread_key),
        }))
    }

    async fn write_placeholder(
        &self,
        session: &Session,
        mode: ChatMode,
        thread_key: &ThreadKey,
        message_id: &str,
        status: &str,
    ) -> Result<()> {
        let path = paths::thread_message(&session.tenant_id, mode, thread_key, message_id);
        self.rtdb
            .set(
                &path,
                json!({
                    "id": message_id,
                    "content": "",
                    "sender_id": "synapse",
                    "timestamp": Utc::now().to_rfc3339(),
                    "message_type": "MESSAGE",
                    "status": status,
                    "streaming_progress": 0,
                    "read": false,
                    "local_processed": false,
                }),
            )
            .await?;
        Ok(())
    }

    /// Author a server-side assistant message: streamed to the UI when the
    /// user is on the thread, plain RTDB write otherwise.
    async fn write_authored_message(
        &self,
        session: &Session,
        mode: ChatMode,
        thread_key: &ThreadKey,
        text: &str,
    ) -> Result<String> {
        let message_id = Uuid::new_v4().to_string();
        let channel = chat_channel(&session.user_id, &session.tenant_id, thread_key);

        if session.is_user_on_specific_thread(thread_key) {
            self.hub
                .broadcast(
                    session.user_id.as_str(),
                    event("llm.stream_start", &channel, json!({ "message_id": message_id })),
                )
                .await;
            self.hub
                .broadcast(
                    session.user_id.as_str(),
                    event(
                        "llm.stream_delta",
                        &channel,
                        json!({ "message_id": message_id, "chunk": text }),
                    ),
                )
                .await;
            self.hub
                .broadcast(
                    session.user_id.as_str(),
                    event("llm.stream_end", &channel, json!({ "message_id": message_id })),
                )
                .await;
        }

        let path = paths::thread_message(&session.tenant_id, mode, thread_key, &message_id);
        let mut record = format_assistant_message(text, "synapse", Some(&message_id), None);
        record["status"] = json!("complete");
        self.rtdb.set(&path, record).await?;
        Ok(message_id)
    }

    // ── Onboarding ──────────────────────────────────────────────────────────

    pub async fn start_onboarding_chat(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        thread_key: &ThreadKey,
    ) -> Result<Value> {
        let (session, _) = self
            .ensure_session_initialized(user_id, tenant_id, None, Some(ChatMode::Onboarding))
            .await?;
        session.enter_page(thread_key);

        let (brain, _) = self
            .get_or_create_brain(&session, thread_key, ChatMode::Onboarding)
            .await?;

        let history_is_empty = brain.history().is_empty();
        let receipt = if history_is_empty {
            let receipt = self
                .launcher
                .launch_onboarding_job(user_id, tenant_id, thread_key)
                .await
                .map_err(ManagerError::WorkerHttp)?;
            let text = format!(
                "Your onboarding assistant has started working (job {}). \
                 I'll keep you posted here as it progresses.",
                receipt.job_id
            );
            self.write_authored_message(&session, ChatMode::Onboarding, thread_key, &text)
                .await?;
            // Keep the in-memory history in step with the RTDB so a repeat
            // start on this brain is recognized as already launched.
            brain.history().add_assistant_text(&text);
            receipt
        } else {
            LaunchReceipt {
                job_id: Self::job_id_for(thread_key),
                lpt_status: "already_running".to_string(),
                already_launched: true,
            }
        };

        brain.set_onboarding_data(json!({
            "job_id": receipt.job_id,
            "lpt_status": receipt.lpt_status,
        }));
        self.attach_followup(&session, &brain, thread_key, Some(&receipt.lpt_status))
            .await
            .or_else(|e| {
                // A listener problem must not hide the launched job.
                warn!(error = %e, "follow-up attach failed after launch");
                Ok::<(), ManagerError>(())
            })?;

        Ok(json!({
            "success": true,
            "job_id": receipt.job_id,
            "lpt_status": receipt.lpt_status,
            "job_already_launched": receipt.already_launched,
        }))
    }

    pub async fn stop_onboarding_chat(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        thread_key: &ThreadKey,
        job_ids: &[String],
        mandate_path: Option<&str>,
    ) -> Result<Value> {
        let (session, _) = self
            .ensure_session_initialized(user_id, tenant_id, None, None)
            .await?;

        let mandate = mandate_path
            .map(String::from)
            .or_else(|| session.user_context().map(|c| c.mandate_path))
            .filter(|m| !m.is_empty())
            .ok_or(ManagerError::MissingMandatePath)?;

        let status = stop_jobs_http(
            &self.http,
            &self.config.worker.base_url,
            self.config.worker.stop_timeout_secs,
            job_ids,
            &mandate,
        )
        .await;

        // The user gets closure regardless of what the worker said.
        let text = if status == 200 || status == 202 {
            "The onboarding job has been stopped. You can restart it from this thread whenever you like."
                .to_string()
        } else {
            format!(
                "I asked the worker to stop the onboarding job but it answered with status {}. \
                 The job may still be winding down.",
                status
            )
        };
        let mode = session.chat_mode();
        let assistant_message_id = self
            .write_authored_message(&session, mode, thread_key, &text)
            .await?;

        Ok(json!({
            "success": true,
            "http_status": status,
            "assistant_message_id": assistant_message_id,
        }))
    }

    // ── Cards & approvals ───────────────────────────────────────────────────

    pub async fn send_card_response(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        thread_key: &ThreadKey,
        card_name: &str,
        card_message_id: &str,
        action: &str,
        user_message: Option<&str>,
    ) -> Result<Value> {
        // Onboarding-like thread with a live listener: the click belongs to
        // the worker job, not to a local approval.
        if let Some(session) = self.session(user_id, tenant_id) {
            if session.chat_mode().is_onboarding_like() {
                if let Some(handle) = session.listener(thread_key) {
                    let channel_path =
                        paths::job_chat_messages(&session.tenant_id, &handle.job_id);
                    self.rtdb
                        .push(
                            &channel_path,
                            json!({
                                "id": Uuid::new_v4().to_string(),
                                "message_type": "CARD_CLICKED_PINNOKIO",
                                "content": json!({
                                    "card_name": card_name,
                                    "card_message_id": card_message_id,
                                    "action": action,
                                    "user_message": user_message,
                                }).to_string(),
                                "sender_id": user_id.as_str(),
                                "timestamp": Utc::now().to_rfc3339(),
                                "read": false,
                            }),
                        )
                        .await?;
                    return Ok(json!({ "success": true, "mode": "forwarded_to_job" }));
                }
            }
        }

        self.approval.resolve(
            user_id,
            thread_key,
            card_message_id,
            action,
            user_message.unwrap_or_default(),
        )?;
        Ok(json!({ "success": true, "mode": "approval_resolved" }))
    }

    pub async fn handle_approval_response(
        &self,
        user_id: &UserId,
        thread_key: &ThreadKey,
        plan_id: &str,
        approved: bool,
        user_comment: Option<&str>,
    ) -> Result<Value> {
        let action = if approved { "approve" } else { "reject" };
        self.approval
            .resolve(user_id, thread_key, plan_id, action, user_comment.unwrap_or_default())?;
        Ok(json!({ "success": true }))
    }

    // ── Context invalidation ────────────────────────────────────────────────

    pub async fn invalidate_user_context(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
    ) -> Result<Value> {
        let cache_key = Self::context_cache_key(user_id, tenant_id);
        let redis_deleted = self.cache.delete(&cache_key).await.unwrap_or(false);

        let Some(session) = self.session(user_id, tenant_id) else {
            return Ok(json!({
                "success": true,
                "status": "no_session",
                "brains_invalidated": 0,
                "redis_deleted": redis_deleted,
            }));
        };

        // Reload fresh into the shared slot; brains re-render from it on
        // their next use.
        let client_uuid = session.client_uuid();
        if !client_uuid.is_empty() {
            if let Err(e) = self.load_session_data(&session, &client_uuid).await {
                warn!(error = %e, "context reload failed during invalidation");
                session.set_user_context(None);
            }
        } else {
            session.set_user_context(None);
        }

        let brains = session.all_brains();
        for brain in &brains {
            brain.mark_context_stale();
        }

        Ok(json!({
            "success": true,
            "status": "invalidated",
            "brains_invalidated": brains.len(),
            "redis_deleted": redis_deleted,
        }))
    }

    // ── Worker-callback resume (§ long-running tools) ───────────────────────

    /// A worker LPT completed: rebuild state if needed and continue the
    /// conversation with the task result.
    pub async fn resume_after_worker_task(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        thread_key: &ThreadKey,
        task_response: &Value,
        original_payload: &Value,
        user_connected_hint: bool,
    ) -> Result<Value> {
        let (session, _) = self
            .ensure_session_initialized(user_id, tenant_id, None, None)
            .await?;
        let mode = session.chat_mode();
        let (brain, _) = self.get_or_create_brain(&session, thread_key, mode).await?;

        // Planned tasks carry an execution record; the model must log step
        // progress before continuing.
        let planned = original_payload.get("execution_id").is_some() || brain.active_task().is_some();
        let continuation = if planned {
            format!(
                "A background task for the current mission has completed. \
                 MANDATORY: first call UPDATE_STEP for the step this result \
                 belongs to, then continue the mission.\n\nTask result:\n{}",
                task_response
            )
        } else {
            format!("Background work completed with this result:\n{}", task_response)
        };

        let assistant_message_id = Uuid::new_v4().to_string();
        let streaming = session.is_user_on_specific_thread(thread_key);
        debug!(
            thread = %thread_key,
            streaming,
            user_connected_hint,
            "resuming after worker task"
        );

        if streaming {
            // Let the client reserve a slot before any chunk arrives.
            let channel = chat_channel(user_id, tenant_id, thread_key);
            self.hub
                .broadcast(
                    user_id.as_str(),
                    event(
                        "assistant_message_placeholder",
                        &channel,
                        json!({ "message_id": assistant_message_id }),
                    ),
                )
                .await;
            self.write_placeholder(&session, mode, thread_key, &assistant_message_id, "streaming")
                .await?;
        } else {
            self.write_placeholder(&session, mode, thread_key, &assistant_message_id, "thinking")
                .await?;
        }

        let (token, gen) = self.controller.begin(user_id, tenant_id, thread_key).await;
        let ctx = Arc::clone(&self.workflow_ctx);
        let brain_task = Arc::clone(&brain);
        let request = WorkflowRequest {
            initial_content: continuation,
            assistant_message_id: assistant_message_id.clone(),
            enable_streaming: streaming,
            system_prompt_override: None,
        };
        let (u, t, th) = (user_id.clone(), tenant_id.clone(), thread_key.clone());
        let controller = Arc::clone(&self.controller);
        let handle = tokio::spawn(async move {
            if let Err(e) = run_unified_workflow(&ctx, &brain_task, request, token).await {
                warn!(thread = %th, error = %e, "resume workflow failed");
            }
            controller.finish(&u, &t, &th, gen);
        });
        self.controller.attach(user_id, tenant_id, thread_key, handle);

        Ok(json!({
            "success": true,
            "assistant_message_id": assistant_message_id,
            "streaming": streaming,
        }))
    }

    // ── Scheduled task execution ────────────────────────────────────────────

    /// Execute a scheduled task on its dedicated thread (no chat history).
    /// Streaming is enabled iff the user currently has a live connection.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute_scheduled_task(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        task_id: &str,
        execution_id: &str,
        mission: &str,
        mandate_path: &str,
        execution_plan: Value,
        last_execution_report: Option<Value>,
        schedule: &str,
    ) -> Result<Value> {
        let (session, _) = self
            .ensure_session_initialized(user_id, tenant_id, None, None)
            .await?;

        let thread_key: ThreadKey = format!("task_{}", task_id).into();
        let creation_lock = session.brain_creation_lock(&thread_key);
        let brain = {
            let _guard = creation_lock.lock().await;
            match session.brain(&thread_key) {
                Some(brain) => {
                    brain.set_chat_mode(ChatMode::TaskExecution);
                    brain
                }
                None => {
                    let brain = Arc::new(Brain::new(
                        user_id.clone(),
                        tenant_id.clone(),
                        thread_key.clone(),
                        ChatMode::TaskExecution,
                        session.user_context_handle(),
                        session.jobs_handle(),
                    ));
                    session.insert_brain(thread_key.clone(), Arc::clone(&brain));
                    brain
                }
            }
        };

        brain.set_active_task(ActiveTaskData {
            task_id: task_id.to_string(),
            execution_id: execution_id.to_string(),
            mission: mission.to_string(),
            mandate_path: mandate_path.to_string(),
            execution_plan,
            last_execution_report,
            persist_report: schedule != "NOW",
            checklist: None,
            started_at: Utc::now(),
        });

        let streaming = self.hub.is_connected(user_id.as_str());
        let assistant_message_id = Uuid::new_v4().to_string();
        self.write_placeholder(
            &session,
            ChatMode::TaskExecution,
            &thread_key,
            &assistant_message_id,
            if streaming { "streaming" } else { "thinking" },
        )
        .await?;

        let (token, gen) = self.controller.begin(user_id, tenant_id, &thread_key).await;
        let ctx = Arc::clone(&self.workflow_ctx);
        let brain_task = Arc::clone(&brain);
        let request = WorkflowRequest {
            initial_content: format!("Execute the scheduled mission now: {}", mission),
            assistant_message_id: assistant_message_id.clone(),
            enable_streaming: streaming,
            system_prompt_override: None,
        };
        let (u, t, th) = (user_id.clone(), tenant_id.clone(), thread_key.clone());
        let controller = Arc::clone(&self.controller);
        let handle = tokio::spawn(async move {
            if let Err(e) = run_unified_workflow(&ctx, &brain_task, request, token).await {
                warn!(thread = %th, error = %e, "scheduled task workflow failed");
            }
            controller.finish(&u, &t, &th, gen);
        });
        self.controller.attach(user_id, tenant_id, &thread_key, handle);

        Ok(json!({
            "success": true,
            "assistant_message_id": assistant_message_id,
            "thread_key": thread_key.as_str(),
            "streaming": streaming,
        }))
    }
}
