//! End-to-end RPC scenarios over the in-process ports: memory RTDB, memory
//! cache, scripted provider, scripted worker launcher.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use synapse_approval::ApprovalBroker;
use synapse_brain::testing::{
    MemoryContextStore, MemoryExecutionStore, MemoryTaskStore, RecordingLptDispatcher,
    StaticDriveDocs,
};
use synapse_brain::tools::ToolDeps;
use synapse_brain::ports::ContextType;
use synapse_cache::MemoryCache;
use synapse_core::config::SynapseConfig;
use synapse_core::types::{TenantId, ThreadKey, UserId};
use synapse_hub::{MessageBuffer, WsHub};
use synapse_listener::start_intermediation;
use synapse_manager::testing::ScriptedWorkerLauncher;
use synapse_manager::{Manager, ManagerDeps, ManagerError};
use synapse_provider::testing::{ScriptedProvider, ScriptedTurn};
use synapse_provider::LlmProvider;
use synapse_rtdb::{MemoryRtdb, RtdbPort};
use synapse_sessions::testing::FixtureTenantStore;
use synapse_sessions::TenantStore;

struct Harness {
    manager: Manager,
    rtdb: Arc<MemoryRtdb>,
    provider: Arc<ScriptedProvider>,
    context_store: Arc<MemoryContextStore>,
    launcher: Arc<ScriptedWorkerLauncher>,
    ws_rx: mpsc::Receiver<String>,
    user: UserId,
    tenant: TenantId,
}

fn harness(turns: Vec<ScriptedTurn>) -> Harness {
    harness_with_approval_timeout(turns, Duration::from_secs(5))
}

fn harness_with_approval_timeout(turns: Vec<ScriptedTurn>, approval_timeout: Duration) -> Harness {
    let rtdb = Arc::new(MemoryRtdb::new());
    let cache = Arc::new(MemoryCache::new());
    let hub = Arc::new(WsHub::new(MessageBuffer::new(cache.clone(), 60)));
    let approval = Arc::new(ApprovalBroker::new(rtdb.clone(), hub.clone()));
    let provider = Arc::new(ScriptedProvider::new(turns));
    let context_store = Arc::new(MemoryContextStore::new());
    context_store.seed("tenants/acme", ContextType::Router, Some("hr"), "base rules");
    let launcher = Arc::new(ScriptedWorkerLauncher::new());

    let tool_deps = Arc::new(ToolDeps {
        rtdb: rtdb.clone(),
        hub: hub.clone(),
        approval: approval.clone(),
        context_store: context_store.clone(),
        execution_store: Arc::new(MemoryExecutionStore::new()),
        task_store: Arc::new(MemoryTaskStore::new()),
        drive_docs: Arc::new(StaticDriveDocs::new()),
        lpt: Arc::new(RecordingLptDispatcher::new()),
        approval_timeout,
    });

    let mut config = SynapseConfig::default();
    config.workflow.callback_ack_timeout_ms = 500;

    let (tx, ws_rx) = mpsc::channel(512);
    hub.register("u1", "conn1", tx);

    let manager = Manager::new(ManagerDeps {
        rtdb: rtdb.clone(),
        hub,
        provider: provider.clone() as Arc<dyn LlmProvider>,
        cache,
        approval,
        tenant_store: Arc::new(FixtureTenantStore::new("Acme")) as Arc<dyn TenantStore>,
        tool_deps,
        launcher: launcher.clone(),
        config,
    });

    Harness {
        manager,
        rtdb,
        provider,
        context_store,
        launcher,
        ws_rx,
        user: "u1".into(),
        tenant: "acme".into(),
    }
}

async fn wait_until<F>(mut cond: F, what: &str)
where
    F: FnMut() -> bool,
{
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

async fn wait_for_status(rtdb: &MemoryRtdb, path: &str, status: &str) -> Value {
    for _ in 0..400 {
        if let Some(record) = rtdb.get(path).await.unwrap() {
            if record["status"] == status {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("record at {path} never reached status {status}");
}

fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        out.push(serde_json::from_str(&frame).unwrap());
    }
    out
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn happy_path_streamed_reply() {
    let mut h = harness(vec![ScriptedTurn::text(&["Hel", "lo"])]);

    h.manager
        .initialize_session(&h.user, &h.tenant, "client-1", None)
        .await
        .unwrap();
    h.manager
        .enter_chat(&h.user, &h.tenant, &"t1".into(), None, None)
        .await
        .unwrap();

    let result = h
        .manager
        .send_message(&h.user, &h.tenant, &"t1".into(), "Hello", None, None, None)
        .await
        .unwrap();
    assert_eq!(result["success"], true);
    let message_id = result["assistant_message_id"].as_str().unwrap().to_string();
    assert_eq!(result["ws_channel"], "chat:u1:acme:t1");

    let record = wait_for_status(
        &h.rtdb,
        &format!("acme/chats/t1/messages/{message_id}"),
        "complete",
    )
    .await;
    assert_eq!(synapse_rtdb::inner_text(&record["content"]), "Hello");

    let events = drain(&mut h.ws_rx);
    let stream_types: Vec<&str> = events
        .iter()
        .filter(|e| e["payload"]["message_id"] == message_id.as_str())
        .filter_map(|e| e["type"].as_str())
        .collect();
    assert_eq!(
        stream_types,
        vec!["llm.stream_start", "llm.stream_delta", "llm.stream_delta", "llm.stream_end"]
    );
    let chunks: String = events
        .iter()
        .filter(|e| e["type"] == "llm.stream_delta")
        .map(|e| e["payload"]["chunk"].as_str().unwrap())
        .collect();
    assert_eq!(chunks, "Hello");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_message_without_brain_fails() {
    let h = harness(vec![]);
    h.manager
        .initialize_session(&h.user, &h.tenant, "client-1", None)
        .await
        .unwrap();

    let err = h
        .manager
        .send_message(&h.user, &h.tenant, &"t1".into(), "hi", None, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::BrainNotInitialized));
    assert_eq!(err.to_string(), "Brain not initialized");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn enter_chat_is_idempotent() {
    let h = harness(vec![]);
    h.manager
        .initialize_session(&h.user, &h.tenant, "client-1", None)
        .await
        .unwrap();

    h.manager
        .enter_chat(&h.user, &h.tenant, &"t1".into(), None, None)
        .await
        .unwrap();
    let session = h.manager.session(&h.user, &h.tenant).unwrap();
    let brain = session.brain(&"t1".into()).unwrap();
    brain.history().add_user_text("remembered");
    let len_before = brain.history().len();

    h.manager
        .enter_chat(&h.user, &h.tenant, &"t1".into(), None, None)
        .await
        .unwrap();
    let brain_after = session.brain(&"t1".into()).unwrap();
    assert!(Arc::ptr_eq(&brain, &brain_after));
    assert_eq!(brain_after.history().len(), len_before);
    assert_eq!(session.brains_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn initialize_refreshes_on_new_client_uuid() {
    let h = harness(vec![]);
    let first = h
        .manager
        .initialize_session(&h.user, &h.tenant, "client-1", None)
        .await
        .unwrap();
    assert_eq!(first["status"], "created");

    let second = h
        .manager
        .initialize_session(&h.user, &h.tenant, "client-2", None)
        .await
        .unwrap();
    assert_eq!(second["status"], "refreshed");

    // Empty client uuid on a fresh (user, tenant) is rejected.
    let err = h
        .manager
        .initialize_session(&"u9".into(), &h.tenant, "", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::MissingClientUuid));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_context_approval_approved_publishes() {
    let mut h = harness(vec![
        ScriptedTurn::tool_call(
            Some("Proposing a change. "),
            "tu1",
            "UPDATE_CONTEXT",
            json!({
                "context_type": "router",
                "service_name": "hr",
                "operations": [
                    {"section_type": "end", "operation": "add", "new_content": "\n- X"}
                ]
            }),
        ),
        ScriptedTurn::text(&["Change published."]),
    ]);

    h.manager
        .initialize_session(&h.user, &h.tenant, "client-1", None)
        .await
        .unwrap();
    h.manager
        .enter_chat(&h.user, &h.tenant, &"t1".into(), None, None)
        .await
        .unwrap();
    let result = h
        .manager
        .send_message(&h.user, &h.tenant, &"t1".into(), "add X to hr rules", None, None, None)
        .await
        .unwrap();
    let message_id = result["assistant_message_id"].as_str().unwrap().to_string();

    // The workflow suspends on the card. Find it in the RTDB.
    let mut card_id = String::new();
    for _ in 0..400 {
        let records = h
            .rtdb
            .get_children_sorted("acme/chats/t1/messages", None)
            .await
            .unwrap();
        if let Some(card) = records
            .iter()
            .find(|r| r["message_type"] == "CARD" && r["status"] == "pending_approval")
        {
            card_id = card["id"].as_str().unwrap().to_string();
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!card_id.is_empty(), "pending approval card never appeared");

    // A CARD event reached the client too.
    let mut saw_card_event = false;
    for _ in 0..100 {
        if drain(&mut h.ws_rx).iter().any(|e| e["type"] == "CARD") {
            saw_card_event = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(saw_card_event, "CARD ws event never arrived");

    h.manager
        .send_card_response(
            &h.user,
            &h.tenant,
            &"t1".into(),
            "text_modification",
            &card_id,
            "approve_four_eyes",
            Some("ok"),
        )
        .await
        .unwrap();

    wait_for_status(
        &h.rtdb,
        &format!("acme/chats/t1/messages/{message_id}"),
        "complete",
    )
    .await;

    // Persistence went through the context writer.
    let text = h
        .context_store
        .read_sync("tenants/acme", ContextType::Router, Some("hr"))
        .unwrap();
    assert_eq!(text, "base rules\n- X");

    let card = h
        .rtdb
        .get(&format!("acme/chats/t1/messages/{card_id}"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(card["status"], "responded");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_context_approval_timeout_leaves_text_untouched() {
    let h = harness_with_approval_timeout(
        vec![
            ScriptedTurn::tool_call(
                None,
                "tu1",
                "UPDATE_CONTEXT",
                json!({
                    "context_type": "router",
                    "service_name": "hr",
                    "operations": [
                        {"section_type": "end", "operation": "add", "new_content": "\n- X"}
                    ]
                }),
            ),
            ScriptedTurn::text(&["Nobody approved in time."]),
        ],
        Duration::from_millis(300),
    );

    h.manager
        .initialize_session(&h.user, &h.tenant, "client-1", None)
        .await
        .unwrap();
    h.manager
        .enter_chat(&h.user, &h.tenant, &"t1".into(), None, None)
        .await
        .unwrap();
    let result = h
        .manager
        .send_message(&h.user, &h.tenant, &"t1".into(), "add X", None, None, None)
        .await
        .unwrap();
    let message_id = result["assistant_message_id"].as_str().unwrap().to_string();

    wait_for_status(
        &h.rtdb,
        &format!("acme/chats/t1/messages/{message_id}"),
        "complete",
    )
    .await;

    // The card record was patched to timeout; the context never changed.
    let records = h
        .rtdb
        .get_children_sorted("acme/chats/t1/messages", None)
        .await
        .unwrap();
    let card = records
        .iter()
        .find(|r| r["message_type"] == "CARD")
        .expect("card record");
    assert_eq!(card["status"], "timeout");
    assert_eq!(
        h.context_store
            .read_sync("tenants/acme", ContextType::Router, Some("hr"))
            .unwrap(),
        "base rules"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn onboarding_card_flow_with_terminate_reply() {
    let mut h = harness(vec![]);
    h.manager
        .initialize_session(
            &h.user,
            &h.tenant,
            "client-1",
            Some("router_chat".parse().unwrap()),
        )
        .await
        .unwrap();
    h.manager
        .enter_chat(
            &h.user,
            &h.tenant,
            &"t1".into(),
            Some("router_chat".parse().unwrap()),
            Some("running"),
        )
        .await
        .unwrap();

    // Worker pushes a CARD on the job channel (job id == thread key).
    h.rtdb
        .set(
            "acme/job_chats/t1/messages/c1",
            json!({
                "id": "c1",
                "message_type": "CARD",
                "content": "confirm the mapping",
                "timestamp": "2026-02-01T10:00:00Z",
                "sender_id": "worker",
            }),
        )
        .await
        .unwrap();

    let session = h.manager.session(&h.user, &h.tenant).unwrap();
    // The side-channel job record was bound on enter.
    let brain = session.brain(&"t1".into()).unwrap();
    assert_eq!(brain.job_data().unwrap()["job_id"], "t1");

    wait_until(
        || session.intermediation_active(&"t1".into()),
        "intermediation active after worker CARD",
    )
    .await;

    let events = drain(&mut h.ws_rx);
    assert!(events.iter().any(|e| e["type"] == "SYSTEM_MESSAGE_INTERMEDIATION"));
    assert!(events
        .iter()
        .any(|e| e["type"] == "RPC_INTERMEDIATION_STATE" && e["payload"]["action"] == "start"));

    // The TERMINATE synthesis call.
    h.provider.push_turn(ScriptedTurn::tool_call(
        None,
        "tu1",
        "SUBMIT_WAITING_RESPONSE",
        json!({
            "response_to_application": "Mapping confirmed. TERMINATE",
            "user_summary": "Confirmed the mapping.",
        }),
    ));

    let reply = h
        .manager
        .send_message(&h.user, &h.tenant, &"t1".into(), "Reply TERMINATE", None, None, None)
        .await
        .unwrap();
    assert_eq!(reply["mode"], "intermediation");

    let records = h
        .rtdb
        .get_children_sorted("acme/job_chats/t1/messages", None)
        .await
        .unwrap();
    let types: Vec<&str> = records
        .iter()
        .filter_map(|r| r["message_type"].as_str())
        .collect();
    assert!(types.contains(&"MESSAGE_PINNOKIO"));
    assert!(types.contains(&"CLOSE_INTERMEDIATION"));
    assert!(!session.intermediation_active(&"t1".into()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_onboarding_launches_job_once() {
    let h = harness(vec![]);
    h.manager
        .initialize_session(&h.user, &h.tenant, "client-1", None)
        .await
        .unwrap();

    let first = h
        .manager
        .start_onboarding_chat(&h.user, &h.tenant, &"onb1".into())
        .await
        .unwrap();
    assert_eq!(first["success"], true);
    assert_eq!(first["job_already_launched"], false);
    assert_eq!(h.launcher.launches.lock().unwrap().len(), 1);

    // The informational assistant message landed in the thread.
    let records = h
        .rtdb
        .get_children_sorted("acme/chats/onb1/messages", None)
        .await
        .unwrap();
    assert!(records
        .iter()
        .any(|r| synapse_rtdb::inner_text(&r["content"]).contains("onboarding assistant")));

    // Second start on the same thread finds the history and skips the launch.
    let second = h
        .manager
        .start_onboarding_chat(&h.user, &h.tenant, &"onb1".into())
        .await
        .unwrap();
    assert_eq!(second["job_already_launched"], true);
    assert_eq!(h.launcher.launches.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn flush_clears_brain_intermediation_and_listener() {
    let h = harness(vec![]);
    h.manager
        .initialize_session(
            &h.user,
            &h.tenant,
            "client-1",
            Some("router_chat".parse().unwrap()),
        )
        .await
        .unwrap();
    h.manager
        .enter_chat(
            &h.user,
            &h.tenant,
            &"t1".into(),
            Some("router_chat".parse().unwrap()),
            None,
        )
        .await
        .unwrap();

    let session = h.manager.session(&h.user, &h.tenant).unwrap();
    let thread: ThreadKey = "t1".into();
    assert!(session.has_listener(&thread));
    let brain = session.brain(&thread).unwrap();
    start_intermediation(
        &manager_listener_deps(&h),
        &session,
        &brain,
        &thread,
        None,
    )
    .await;
    assert!(session.intermediation_active(&thread));

    let result = h
        .manager
        .flush_chat_history(&h.user, &h.tenant, Some(&thread))
        .await
        .unwrap();
    assert_eq!(result["threads_cleared"], 1);
    assert!(session.brain(&thread).is_none());
    assert!(!session.intermediation_active(&thread));
    assert!(!session.has_listener(&thread));
}

/// Rebuild listener deps equivalent to the manager's for direct engine calls.
fn manager_listener_deps(h: &Harness) -> std::sync::Arc<synapse_listener::ListenerDeps> {
    std::sync::Arc::new(synapse_listener::ListenerDeps {
        rtdb: h.rtdb.clone(),
        hub: h.manager.hub().clone(),
        provider: h.provider.clone() as Arc<dyn LlmProvider>,
        model: "scripted".into(),
        callback_ack_timeout: Duration::from_millis(500),
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_streaming_interrupts_and_patches_partial() {
    let h = harness(vec![]);
    h.provider.push_turn(ScriptedTurn {
        events: vec![synapse_provider::StreamEvent::TextDelta {
            text: "partial".into(),
        }],
        stall_ms: 10_000,
    });

    h.manager
        .initialize_session(&h.user, &h.tenant, "client-1", None)
        .await
        .unwrap();
    h.manager
        .enter_chat(&h.user, &h.tenant, &"t1".into(), None, None)
        .await
        .unwrap();
    let result = h
        .manager
        .send_message(&h.user, &h.tenant, &"t1".into(), "go", None, None, None)
        .await
        .unwrap();
    let message_id = result["assistant_message_id"].as_str().unwrap().to_string();

    // Give the stream a moment to produce the first chunk, then stop.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stopped = h
        .manager
        .stop_streaming(&h.user, &h.tenant, Some(&"t1".into()))
        .await
        .unwrap();
    assert_eq!(stopped["stopped_count"], 1);

    let record = wait_for_status(
        &h.rtdb,
        &format!("acme/chats/t1/messages/{message_id}"),
        "interrupted",
    )
    .await;
    assert_eq!(synapse_rtdb::inner_text(&record["content"]), "partial");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resume_after_worker_task_streams_when_user_on_thread() {
    let mut h = harness(vec![ScriptedTurn::text(&["Task folded in."])]);
    h.manager
        .initialize_session(&h.user, &h.tenant, "client-1", None)
        .await
        .unwrap();
    h.manager
        .enter_chat(&h.user, &h.tenant, &"t1".into(), None, None)
        .await
        .unwrap();

    let result = h
        .manager
        .resume_after_worker_task(
            &h.user,
            &h.tenant,
            &"t1".into(),
            &json!({"status": "done", "moved": 12}),
            &json!({"action": "archive"}),
            true,
        )
        .await
        .unwrap();
    assert_eq!(result["streaming"], true);
    let message_id = result["assistant_message_id"].as_str().unwrap().to_string();

    wait_for_status(
        &h.rtdb,
        &format!("acme/chats/t1/messages/{message_id}"),
        "complete",
    )
    .await;

    let events = drain(&mut h.ws_rx);
    let placeholder_pos = events
        .iter()
        .position(|e| e["type"] == "assistant_message_placeholder");
    let first_delta_pos = events
        .iter()
        .position(|e| e["type"] == "llm.stream_delta" && e["payload"]["message_id"] == message_id.as_str());
    assert!(placeholder_pos.is_some());
    assert!(first_delta_pos.is_some());
    assert!(placeholder_pos.unwrap() < first_delta_pos.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalidate_user_context_marks_brains_and_clears_cache() {
    let h = harness(vec![]);
    h.manager
        .initialize_session(&h.user, &h.tenant, "client-1", None)
        .await
        .unwrap();
    h.manager
        .enter_chat(&h.user, &h.tenant, &"t1".into(), None, None)
        .await
        .unwrap();

    let result = h
        .manager
        .invalidate_user_context(&h.user, &h.tenant)
        .await
        .unwrap();
    assert_eq!(result["success"], true);
    assert_eq!(result["status"], "invalidated");
    assert_eq!(result["brains_invalidated"], 1);
    assert_eq!(result["redis_deleted"], true);

    let session = h.manager.session(&h.user, &h.tenant).unwrap();
    let brain = session.brain(&"t1".into()).unwrap();
    assert!(brain.context_is_stale());
    // Context was reloaded fresh, so the session stays usable.
    assert!(session.is_initialized());
}
