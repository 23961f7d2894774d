use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use synapse_approval::ApprovalBroker;
use synapse_brain::tools::ToolDeps;
use synapse_cache::MemoryCache;
use synapse_core::config::SynapseConfig;
use synapse_hub::{MessageBuffer, WsHub};
use synapse_manager::{Manager, ManagerDeps};
use synapse_provider::AnthropicProvider;
use synapse_rtdb::MemoryRtdb;

use crate::adapters::{
    HttpDriveDocs, HttpLptDispatcher, HttpWorkerLauncher, RtdbContextStore, RtdbExecutionStore,
    RtdbTaskStore, RtdbTenantStore,
};

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub manager: Arc<Manager>,
    pub hub: Arc<WsHub>,
    pub config: SynapseConfig,
}

impl AppState {
    /// Wire the full dependency graph from config. The RTDB transport is
    /// the in-process tree; swap it here when a remote transport lands.
    pub fn build(config: SynapseConfig) -> Self {
        let rtdb = Arc::new(MemoryRtdb::new());
        let cache = Arc::new(MemoryCache::new());
        let hub = Arc::new(WsHub::new(MessageBuffer::new(
            cache.clone(),
            config.workflow.buffer_ttl_secs,
        )));
        let approval = Arc::new(ApprovalBroker::new(rtdb.clone(), hub.clone()));
        let provider = Arc::new(AnthropicProvider::new(
            config.provider.api_key.clone(),
            Some(config.provider.base_url.clone()),
        ));

        let worker_base = config.worker.base_url.clone();
        let tool_deps = Arc::new(ToolDeps {
            rtdb: rtdb.clone(),
            hub: hub.clone(),
            approval: approval.clone(),
            context_store: Arc::new(RtdbContextStore::new(rtdb.clone())),
            execution_store: Arc::new(RtdbExecutionStore::new(rtdb.clone())),
            task_store: Arc::new(RtdbTaskStore::new(rtdb.clone())),
            drive_docs: Arc::new(HttpDriveDocs::new(worker_base.clone())),
            lpt: Arc::new(HttpLptDispatcher::new(worker_base.clone())),
            approval_timeout: std::time::Duration::from_secs(
                config.workflow.approval_timeout_secs,
            ),
        });

        let manager = Arc::new(Manager::new(ManagerDeps {
            rtdb: rtdb.clone(),
            hub: hub.clone(),
            provider,
            cache,
            approval,
            tenant_store: Arc::new(RtdbTenantStore::new(rtdb)),
            tool_deps,
            launcher: Arc::new(HttpWorkerLauncher::new(worker_base)),
            config: config.clone(),
        }));

        Self {
            manager,
            hub,
            config,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health))
        .route("/rpc/initialize_session", post(crate::http::initialize_session))
        .route("/rpc/enter_chat", post(crate::http::enter_chat))
        .route("/rpc/leave_chat", post(crate::http::leave_chat))
        .route("/rpc/switch_thread", post(crate::http::switch_thread))
        .route("/rpc/send_message", post(crate::http::send_message))
        .route("/rpc/load_chat_history", post(crate::http::load_chat_history))
        .route("/rpc/flush_chat_history", post(crate::http::flush_chat_history))
        .route("/rpc/stop_streaming", post(crate::http::stop_streaming))
        .route(
            "/rpc/start_onboarding_chat",
            post(crate::http::start_onboarding_chat),
        )
        .route(
            "/rpc/stop_onboarding_chat",
            post(crate::http::stop_onboarding_chat),
        )
        .route("/rpc/send_card_response", post(crate::http::send_card_response))
        .route(
            "/rpc/handle_approval_response",
            post(crate::http::handle_approval_response),
        )
        .route(
            "/rpc/invalidate_user_context",
            post(crate::http::invalidate_user_context),
        )
        .route("/rpc/worker_task_completed", post(crate::http::worker_task_completed))
        .route(
            "/rpc/execute_scheduled_task",
            post(crate::http::execute_scheduled_task),
        )
        .route("/ws", get(crate::ws::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
