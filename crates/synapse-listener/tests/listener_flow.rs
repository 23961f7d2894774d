//! Listener and intermediation scenarios over the in-process RTDB.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use synapse_brain::Brain;
use synapse_cache::MemoryCache;
use synapse_core::tenant::{JobsData, UserContext};
use synapse_core::types::{ChatMode, ThreadKey};
use synapse_hub::{MessageBuffer, WsHub};
use synapse_listener::{
    check_intermediation_on_load, handle_event, install_listener, respond_during_intermediation,
    start_intermediation, stop_intermediation, IntermediationReason, ListenerDeps,
};
use synapse_provider::testing::{ScriptedProvider, ScriptedTurn};
use synapse_provider::LlmProvider;
use synapse_rtdb::{MemoryRtdb, RtdbPort};
use synapse_sessions::{ListenerHandle, Session};

struct Harness {
    deps: Arc<ListenerDeps>,
    session: Arc<Session>,
    brain: Arc<Brain>,
    rtdb: Arc<MemoryRtdb>,
    provider: Arc<ScriptedProvider>,
    ws_rx: mpsc::Receiver<String>,
    thread: ThreadKey,
}

fn harness(mode: ChatMode) -> Harness {
    let rtdb = Arc::new(MemoryRtdb::new());
    let hub = Arc::new(WsHub::new(MessageBuffer::new(
        Arc::new(MemoryCache::new()),
        60,
    )));
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let deps = Arc::new(ListenerDeps {
        rtdb: rtdb.clone(),
        hub: hub.clone(),
        provider: provider.clone() as Arc<dyn LlmProvider>,
        model: "scripted".into(),
        callback_ack_timeout: Duration::from_secs(1),
    });

    let session = Arc::new(Session::new("u1".into(), "acme".into()));
    session.set_user_context(Some(UserContext {
        mandate_path: "tenants/acme".into(),
        company_name: "Acme".into(),
        ..Default::default()
    }));
    session.set_chat_mode(mode);

    let brain = Arc::new(Brain::new(
        "u1".into(),
        "acme".into(),
        "t1".into(),
        mode,
        session.user_context_handle(),
        Arc::new(RwLock::new(JobsData::default())),
    ));
    session.insert_brain("t1".into(), brain.clone());

    let (tx, ws_rx) = mpsc::channel(256);
    hub.register("u1", "conn1", tx);

    Harness {
        deps,
        session,
        brain,
        rtdb,
        provider,
        ws_rx,
        thread: "t1".into(),
    }
}

fn worker_record(id: &str, message_type: &str, content: &str, ts: &str) -> Value {
    json!({
        "id": id,
        "message_type": message_type,
        "content": content,
        "timestamp": ts,
        "sender_id": "worker",
        "read": false,
    })
}

fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        out.push(serde_json::from_str(&frame).unwrap());
    }
    out
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn install_replays_messages_into_system_log_and_dedups() {
    let h = harness(ChatMode::Onboarding);
    for (id, ts, text) in [
        ("m1", "2026-01-01T10:00:00Z", "step one"),
        ("m2", "2026-01-01T10:05:00Z", "step two"),
    ] {
        h.rtdb
            .set(
                &format!("acme/job_chats/job1/messages/{id}"),
                worker_record(id, "MESSAGE", text, ts),
            )
            .await
            .unwrap();
    }

    let installed = install_listener(&h.deps, &h.session, &h.brain, &h.thread, "job1")
        .await
        .unwrap();
    assert!(installed);
    let log = h.brain.system_log_rendered();
    assert!(log.contains("2026-01-01 10:00:00 | step one"));
    assert!(log.contains("step two"));

    // Second install is a no-op (at most one listener per thread).
    let installed_again = install_listener(&h.deps, &h.session, &h.brain, &h.thread, "job1")
        .await
        .unwrap();
    assert!(!installed_again);

    // Replaying an already-processed id through the dispatcher changes nothing.
    let handle = h.session.listener(&h.thread).unwrap();
    let before = handle.log_entries_len();
    handle_event(
        h.deps.clone(),
        h.session.clone(),
        h.brain.clone(),
        handle.clone(),
        h.thread.clone(),
        worker_record("m2", "MESSAGE", "step two", "2026-01-01T10:05:00Z"),
    )
    .await;
    assert_eq!(handle.log_entries_len(), before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn live_worker_message_flows_through_callback_loop() {
    let mut h = harness(ChatMode::Onboarding);
    install_listener(&h.deps, &h.session, &h.brain, &h.thread, "job1")
        .await
        .unwrap();

    h.rtdb
        .set(
            "acme/job_chats/job1/messages/live1",
            worker_record("live1", "MESSAGE", "live progress", "2026-01-01T11:00:00Z"),
        )
        .await
        .unwrap();

    // The event crosses a detached thread and the callback loop.
    let mut waited = 0;
    while !h.brain.system_log_rendered().contains("live progress") && waited < 200 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }
    assert!(h.brain.system_log_rendered().contains("live progress"));
    // Context-path messages are not forwarded to the UI.
    assert!(drain(&mut h.ws_rx)
        .iter()
        .all(|e| e["type"] != "MESSAGE"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn card_starts_intermediation_in_worker_modes_and_message_goes_direct() {
    let mut h = harness(ChatMode::Router);
    let handle = Arc::new(ListenerHandle::new("job1"));
    h.session.set_listener(h.thread.clone(), handle.clone());

    handle_event(
        h.deps.clone(),
        h.session.clone(),
        h.brain.clone(),
        handle.clone(),
        h.thread.clone(),
        worker_record("c1", "CARD", "please confirm", "2026-01-01T11:00:00Z"),
    )
    .await;

    assert!(h.session.intermediation_active(&h.thread));
    let events = drain(&mut h.ws_rx);
    let types: Vec<&str> = events.iter().filter_map(|e| e["type"].as_str()).collect();
    assert!(types.contains(&"CARD"));
    assert!(types.contains(&"SYSTEM_MESSAGE_INTERMEDIATION"));
    assert!(types.contains(&"RPC_INTERMEDIATION_STATE"));
    // Waiting context was stashed for the TERMINATE synthesis.
    assert!(h.brain.system_log_rendered().contains("waiting for user input"));

    // While active, worker MESSAGEs go straight to the UI.
    handle_event(
        h.deps.clone(),
        h.session.clone(),
        h.brain.clone(),
        handle.clone(),
        h.thread.clone(),
        worker_record("m9", "MESSAGE", "direct question?", "2026-01-01T11:01:00Z"),
    )
    .await;
    let events = drain(&mut h.ws_rx);
    assert!(events.iter().any(|e| e["type"] == "llm_message_direct"
        && e["payload"]["text"] == "direct question?"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_is_idempotent() {
    let mut h = harness(ChatMode::Router);
    let first = start_intermediation(&h.deps, &h.session, &h.brain, &h.thread, None).await;
    assert_eq!(first, "activated");
    drain(&mut h.ws_rx);

    let second = start_intermediation(&h.deps, &h.session, &h.brain, &h.thread, None).await;
    assert_eq!(second, "already_active");
    // No duplicate system message.
    assert!(drain(&mut h.ws_rx).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn terminate_reply_synthesizes_and_closes_the_dialog() {
    let mut h = harness(ChatMode::Router);
    let handle = Arc::new(ListenerHandle::new("job1"));
    h.session.set_listener(h.thread.clone(), handle.clone());
    start_intermediation(&h.deps, &h.session, &h.brain, &h.thread, None).await;
    drain(&mut h.ws_rx);

    // Scripted synthesis turn: the forced SUBMIT_WAITING_RESPONSE call.
    h.provider.push_turn(ScriptedTurn::tool_call(
        None,
        "tu1",
        "SUBMIT_WAITING_RESPONSE",
        json!({
            "response_to_application": "Routing confirmed, proceed. TERMINATE",
            "user_summary": "Confirmed the routing proposal.",
        }),
    ));

    respond_during_intermediation(
        &h.deps,
        &h.session,
        &h.brain,
        &handle,
        &h.thread,
        "Looks good, TERMINATE",
    )
    .await
    .unwrap();

    let records = h
        .rtdb
        .get_children_sorted("acme/job_chats/job1/messages", None)
        .await
        .unwrap();
    let types: Vec<&str> = records
        .iter()
        .filter_map(|r| r["message_type"].as_str())
        .collect();
    assert!(types.contains(&"MESSAGE_PINNOKIO"));
    assert!(types.contains(&"CLOSE_INTERMEDIATION"));
    let relayed = records
        .iter()
        .find(|r| r["message_type"] == "MESSAGE_PINNOKIO")
        .unwrap();
    assert_eq!(relayed["content"], "Routing confirmed, proceed. TERMINATE");

    assert!(!h.session.intermediation_active(&h.thread));
    assert!(h
        .brain
        .system_log_rendered()
        .contains("Confirmed the routing proposal."));
    // The user's message itself never hits the WS.
    let events = drain(&mut h.ws_rx);
    assert!(events
        .iter()
        .all(|e| e["payload"]["text"] != "Looks good, TERMINATE"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn plain_reply_relays_without_closing() {
    let h = harness(ChatMode::Router);
    let handle = Arc::new(ListenerHandle::new("job1"));
    h.session.set_listener(h.thread.clone(), handle.clone());
    start_intermediation(&h.deps, &h.session, &h.brain, &h.thread, None).await;

    respond_during_intermediation(&h.deps, &h.session, &h.brain, &handle, &h.thread, "continue")
        .await
        .unwrap();

    let records = h
        .rtdb
        .get_children_sorted("acme/job_chats/job1/messages", None)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["message_type"], "MESSAGE_PINNOKIO");
    assert_eq!(records[0]["content"], "continue");
    assert!(h.session.intermediation_active(&h.thread));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_broadcasts_localized_reason() {
    let mut h = harness(ChatMode::Router);
    start_intermediation(&h.deps, &h.session, &h.brain, &h.thread, None).await;
    drain(&mut h.ws_rx);

    stop_intermediation(
        &h.deps,
        &h.session,
        &h.brain,
        &h.thread,
        IntermediationReason::CardClick,
    )
    .await;
    let events = drain(&mut h.ws_rx);
    let stop_event = events
        .iter()
        .find(|e| e["type"] == "RPC_INTERMEDIATION_STATE")
        .unwrap();
    assert_eq!(stop_event["payload"]["action"], "stop");
    assert_eq!(stop_event["payload"]["reason"], "card_click");
}

async fn seed_worker_log(rtdb: &MemoryRtdb, entries: &[(&str, &str)]) {
    for (i, (id, message_type)) in entries.iter().enumerate() {
        rtdb.set(
            &format!("acme/job_chats/job1/messages/{id}"),
            worker_record(
                id,
                message_type,
                "",
                &format!("2026-01-01T10:{:02}:00Z", i),
            ),
        )
        .await
        .unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reactivation_requires_trigger_newer_than_close() {
    // Close older than trigger → reactivate.
    let h = harness(ChatMode::Router);
    seed_worker_log(
        &h.rtdb,
        &[("a", "MESSAGE"), ("b", "CLOSE_INTERMEDIATION"), ("c", "CARD")],
    )
    .await;
    let reactivated =
        check_intermediation_on_load(&h.deps, &h.session, &h.brain, &h.thread, "job1", Some("running"))
            .await
            .unwrap();
    assert!(reactivated);
    assert!(h.session.intermediation_active(&h.thread));

    // Close newer than trigger → stay off.
    let h = harness(ChatMode::Router);
    seed_worker_log(
        &h.rtdb,
        &[("a", "CARD"), ("b", "CLOSE_INTERMEDIATION")],
    )
    .await;
    let reactivated =
        check_intermediation_on_load(&h.deps, &h.session, &h.brain, &h.thread, "job1", Some("running"))
            .await
            .unwrap();
    assert!(!reactivated);
    assert!(!h.session.intermediation_active(&h.thread));

    // Finished job → stay off even with a live trigger.
    let h = harness(ChatMode::Router);
    seed_worker_log(&h.rtdb, &[("a", "CARD")]).await;
    let reactivated =
        check_intermediation_on_load(&h.deps, &h.session, &h.brain, &h.thread, "job1", Some("completed"))
            .await
            .unwrap();
    assert!(!reactivated);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unacknowledged_card_is_rebroadcast_on_reactivation() {
    let mut h = harness(ChatMode::Router);
    seed_worker_log(&h.rtdb, &[("m", "MESSAGE"), ("card1", "CARD")]).await;

    let reactivated =
        check_intermediation_on_load(&h.deps, &h.session, &h.brain, &h.thread, "job1", None)
            .await
            .unwrap();
    assert!(reactivated);
    let events = drain(&mut h.ws_rx);
    assert!(events
        .iter()
        .any(|e| e["type"] == "CARD" && e["payload"]["id"] == "card1"));
}
