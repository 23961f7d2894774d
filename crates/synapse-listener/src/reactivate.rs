use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use synapse_brain::Brain;
use synapse_core::types::{chat_channel, ThreadKey};
use synapse_hub::event;
use synapse_rtdb::{paths, MessageType, RtdbMessage, RtdbPort};
use synapse_sessions::Session;

use crate::engine::{start_intermediation, ListenerDeps};
use crate::error::Result;

/// How far back the reactivation scan looks.
const SCAN_LIMIT: usize = 50;

/// Job statuses that still allow a direct dialog. An unspecified status is
/// treated as live.
fn job_status_allows(status: Option<&str>) -> bool {
    match status {
        None => true,
        Some(s) => matches!(s, "running" | "in queue"),
    }
}

/// Load-time check: should intermediation be reactivated for this thread?
///
/// Scans the newest ~50 worker records newest-first for the most recent
/// trigger (`CARD`/`TOOL`/`FOLLOW_MESSAGE`) and the most recent
/// `CLOSE_INTERMEDIATION`. Reactivation happens iff a trigger exists, no
/// close is newer than it (`close_idx > trigger_idx` in newest-first order),
/// and the job status still allows dialog. A reactivating CARD that was
/// never acknowledged by a later `CARD_CLICKED_PINNOKIO` is re-broadcast —
/// the hub buffers it when the user is offline.
pub async fn check_intermediation_on_load(
    deps: &Arc<ListenerDeps>,
    session: &Arc<Session>,
    brain: &Arc<Brain>,
    thread_key: &ThreadKey,
    job_id: &str,
    job_status: Option<&str>,
) -> Result<bool> {
    let channel_path = paths::job_chat_messages(&session.tenant_id, job_id);
    let mut records = deps
        .rtdb
        .get_children_sorted(&channel_path, Some(SCAN_LIMIT))
        .await?;
    records.reverse(); // newest first

    let parsed: Vec<(usize, RtdbMessage, &Value)> = records
        .iter()
        .enumerate()
        .filter_map(|(i, v)| RtdbMessage::from_value(v).map(|m| (i, m, v)))
        .collect();

    let trigger = parsed.iter().find(|(_, m, _)| {
        matches!(
            m.message_type,
            MessageType::Card | MessageType::Tool | MessageType::FollowMessage
        )
    });
    let close_idx = parsed
        .iter()
        .find(|(_, m, _)| m.message_type == MessageType::CloseIntermediation)
        .map(|(i, _, _)| *i);

    let Some((trigger_idx, trigger_msg, trigger_raw)) = trigger else {
        debug!(thread = %thread_key, "no intermediation trigger in recent worker log");
        return Ok(false);
    };

    let close_is_older = match close_idx {
        None => true,
        Some(ci) => ci > *trigger_idx,
    };
    if !close_is_older || !job_status_allows(job_status) {
        debug!(
            thread = %thread_key,
            trigger_idx = *trigger_idx,
            close_idx = ?close_idx,
            job_status = ?job_status,
            "intermediation not reactivated"
        );
        return Ok(false);
    }

    start_intermediation(deps, session, brain, thread_key, trigger_msg.tools.as_ref()).await;

    // Replay an unacknowledged CARD so the user can still act on it.
    if trigger_msg.message_type == MessageType::Card {
        let acknowledged = parsed
            .iter()
            .any(|(i, m, _)| *i < *trigger_idx && m.message_type == MessageType::CardClickedPinnokio);
        if !acknowledged {
            let channel = chat_channel(&session.user_id, &session.tenant_id, thread_key);
            deps.hub
                .broadcast(
                    session.user_id.as_str(),
                    event("CARD", &channel, (*trigger_raw).clone()),
                )
                .await;
        }
    }

    info!(thread = %thread_key, job_id, "intermediation reactivated on load");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_gate() {
        assert!(job_status_allows(None));
        assert!(job_status_allows(Some("running")));
        assert!(job_status_allows(Some("in queue")));
        assert!(!job_status_allows(Some("completed")));
        assert!(!job_status_allows(Some("failed")));
    }
}
