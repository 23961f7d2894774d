use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use synapse_brain::Brain;
use synapse_core::types::ThreadKey;
use synapse_rtdb::{paths, MessageType, RtdbEvent, RtdbMessage, RtdbPort};
use synapse_sessions::{ListenerHandle, Session};

use crate::engine::{handle_event, ListenerDeps};
use crate::error::Result;

/// Install the follow-up listener for a thread (at most once per thread per
/// session).
///
/// Initialization replays the channel's existing records oldest-first,
/// marks their ids processed, and injects the MESSAGE-typed ones as a single
/// concatenated timestamped log into the brain's system-log area. Only then
/// is the live subscription attached.
pub async fn install_listener(
    deps: &Arc<ListenerDeps>,
    session: &Arc<Session>,
    brain: &Arc<Brain>,
    thread_key: &ThreadKey,
    job_id: &str,
) -> Result<bool> {
    if session.has_listener(thread_key) {
        info!(thread = %thread_key, job_id, "listener already installed");
        return Ok(false);
    }

    let handle = Arc::new(ListenerHandle::new(job_id));
    let channel_path = paths::job_chat_messages(&session.tenant_id, job_id);

    // Replay existing history before subscribing so live events can be
    // deduplicated against it.
    let existing = deps.rtdb.get_children_sorted(&channel_path, None).await?;
    for record in &existing {
        let Some(message) = RtdbMessage::from_value(record) else {
            continue;
        };
        if !message.id.is_empty() {
            handle.mark_processed(&message.id);
        }
        if message.message_type == MessageType::Message {
            let ts = chrono::DateTime::parse_from_rfc3339(&message.timestamp)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|_| message.timestamp.clone());
            handle.push_log_entry(format!("{} | {}", ts, message.text()));
        }
    }
    let buffer = handle.log_buffer();
    if !buffer.is_empty() {
        brain.set_system_log_section(job_id, &buffer);
    }

    // Live subscription. The RTDB invokes this on an SDK-owned thread; all
    // real work hops onto the session callback loop with a bounded ack wait.
    // The loop is created here, in runtime context, never on the SDK thread.
    let cb_loop = session.callback_loop();
    let callback = {
        let deps = Arc::clone(deps);
        let session = Arc::clone(session);
        let brain = Arc::clone(brain);
        let handle = Arc::clone(&handle);
        let thread_key = thread_key.clone();
        Arc::new(move |event: RtdbEvent| {
            let deps_job = Arc::clone(&deps);
            let session_job = Arc::clone(&session);
            let brain_job = Arc::clone(&brain);
            let handle_job = Arc::clone(&handle);
            let thread_job = thread_key.clone();
            let data: Value = event.data;
            let result = cb_loop.schedule_blocking(
                async move {
                    handle_event(deps_job, session_job, brain_job, handle_job, thread_job, data)
                        .await;
                },
                deps.callback_ack_timeout,
            );
            if let Err(e) = result {
                warn!(error = %e, "worker event dropped, callback loop unavailable");
            }
        })
    };

    let subscription = deps.rtdb.subscribe(&channel_path, callback)?;
    handle.attach_subscription(subscription);
    session.set_listener(thread_key.clone(), Arc::clone(&handle));

    info!(
        thread = %thread_key,
        job_id,
        replayed = existing.len(),
        log_entries = handle.log_entries_len(),
        "follow-up listener installed"
    );
    Ok(true)
}

/// Detach and drop a thread's listener. Safe to call when none exists.
pub fn uninstall_listener(session: &Session, thread_key: &ThreadKey) -> bool {
    match session.take_listener(thread_key) {
        Some(handle) => {
            handle.unsubscribe();
            info!(thread = %thread_key, job_id = %handle.job_id, "listener uninstalled");
            true
        }
        None => false,
    }
}
