use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use synapse_brain::Brain;
use synapse_core::types::{chat_channel, ThreadKey};
use synapse_hub::{event, WsHub};
use synapse_provider::{ChatRequest, LlmProvider, ToolChoice, ToolDefinition};
use synapse_rtdb::{paths, MessageType, RtdbMessage, RtdbPort};
use synapse_sessions::{ListenerHandle, Session};

use crate::error::Result;

/// User inputs that close the direct dialog when a message ends with them.
const TERMINATION_WORDS: &[&str] = &["TERMINATE", "PENDING", "NEXT"];

/// Why intermediation stopped — carried in the stop events and localized
/// into the user-facing system message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntermediationReason {
    Timeout,
    CardClick,
    TerminationWord,
    UserAction,
}

impl IntermediationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntermediationReason::Timeout => "timeout",
            IntermediationReason::CardClick => "card_click",
            IntermediationReason::TerminationWord => "termination_word",
            IntermediationReason::UserAction => "user_action",
        }
    }

    fn from_payload(text: &str) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("timeout") {
            IntermediationReason::Timeout
        } else if lower.contains("card_click") {
            IntermediationReason::CardClick
        } else if lower.contains("termination_word") {
            IntermediationReason::TerminationWord
        } else {
            IntermediationReason::UserAction
        }
    }
}

/// Collaborators shared by all listener operations.
pub struct ListenerDeps {
    pub rtdb: Arc<dyn RtdbPort>,
    pub hub: Arc<WsHub>,
    pub provider: Arc<dyn LlmProvider>,
    pub model: String,
    /// Bounded wait used when RTDB callback threads hand work to the
    /// session callback loop.
    pub callback_ack_timeout: std::time::Duration,
}

fn thread_channel(session: &Session, thread_key: &ThreadKey) -> String {
    chat_channel(&session.user_id, &session.tenant_id, thread_key)
}

/// Forward a worker record to the UI, preserving its type and fields.
async fn forward_to_ui(
    deps: &ListenerDeps,
    session: &Session,
    thread_key: &ThreadKey,
    message: &RtdbMessage,
    raw: &Value,
) {
    let channel = thread_channel(session, thread_key);
    deps.hub
        .broadcast(
            session.user_id.as_str(),
            event(message.message_type.as_str(), &channel, raw.clone()),
        )
        .await;
}

/// Worker log timestamp format: `YYYY-MM-DD HH:MM:SS`.
fn log_timestamp(raw_ts: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(raw_ts)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| Utc::now().format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Per-event dispatch. Runs on the session's callback loop.
pub async fn handle_event(
    deps: Arc<ListenerDeps>,
    session: Arc<Session>,
    brain: Arc<Brain>,
    handle: Arc<ListenerHandle>,
    thread_key: ThreadKey,
    raw: Value,
) {
    let Some(message) = RtdbMessage::from_value(&raw) else {
        warn!(thread = %thread_key, "unparseable worker record, dropping");
        return;
    };
    debug!(
        thread = %thread_key,
        job = %handle.job_id,
        message_type = message.message_type.as_str(),
        id = %message.id,
        "worker event"
    );

    match message.message_type {
        MessageType::Message => {
            if session.intermediation_active(&thread_key) {
                // Direct dialog: the worker talks straight to the user.
                let channel = thread_channel(&session, &thread_key);
                deps.hub
                    .broadcast(
                        session.user_id.as_str(),
                        event(
                            "llm_message_direct",
                            &channel,
                            json!({
                                "id": message.id,
                                "text": message.text(),
                                "sender_id": message.sender_id,
                                "timestamp": message.timestamp,
                            }),
                        ),
                    )
                    .await;
                return;
            }
            // Context path: dedup, format, re-inject the whole buffer.
            if !message.id.is_empty() && !handle.mark_processed(&message.id) {
                debug!(id = %message.id, "duplicate worker message ignored");
                return;
            }
            let line = format!("{} | {}", log_timestamp(&message.timestamp), message.text());
            let buffer = handle.push_log_entry(line);
            brain.set_system_log_section(&handle.job_id, &buffer);
        }

        MessageType::FollowMessage => {
            forward_to_ui(&deps, &session, &thread_key, &message, &raw).await;
            start_intermediation(&deps, &session, &brain, &thread_key, message.tools.as_ref())
                .await;
        }

        MessageType::Card | MessageType::WaitingMessage => {
            forward_to_ui(&deps, &session, &thread_key, &message, &raw).await;
            let block = format!(
                "[waiting for user input] {} event {} | {}",
                message.message_type.as_str(),
                message.id,
                message.text()
            );
            brain.append_system_log(
                &handle.job_id,
                &log_timestamp(&message.timestamp),
                &block,
            );
            brain.set_waiting_event(raw.clone());
            if brain.chat_mode().card_driven_intermediation() {
                start_intermediation(&deps, &session, &brain, &thread_key, message.tools.as_ref())
                    .await;
            }
        }

        MessageType::Tool => {
            forward_to_ui(&deps, &session, &thread_key, &message, &raw).await;
            if brain.chat_mode().card_driven_intermediation() {
                start_intermediation(&deps, &session, &brain, &thread_key, message.tools.as_ref())
                    .await;
            }
        }

        MessageType::CardClickedPinnokio => {
            forward_to_ui(&deps, &session, &thread_key, &message, &raw).await;
            if session.intermediation_active(&thread_key) {
                stop_intermediation(
                    &deps,
                    &session,
                    &brain,
                    &thread_key,
                    IntermediationReason::CardClick,
                )
                .await;
            }
        }

        MessageType::CloseIntermediation => {
            forward_to_ui(&deps, &session, &thread_key, &message, &raw).await;
            let reason = IntermediationReason::from_payload(&message.text());
            stop_intermediation(&deps, &session, &brain, &thread_key, reason).await;
        }

        // WORKFLOW, CMMD, MESSAGE_PINNOKIO echoes, unknown types: UI only.
        _ => {
            forward_to_ui(&deps, &session, &thread_key, &message, &raw).await;
        }
    }
}

/// Localized intermediation system messages.
fn localized_start(lang: &str) -> &'static str {
    match lang {
        "fr" => "Mode intermédiation activé — l'application vous répond directement.",
        _ => "Intermediation mode activated — the application is now talking to you directly.",
    }
}

fn localized_stop(lang: &str, reason: IntermediationReason) -> String {
    match lang {
        "fr" => format!(
            "Mode intermédiation terminé ({}).",
            match reason {
                IntermediationReason::Timeout => "délai expiré",
                IntermediationReason::CardClick => "carte traitée",
                IntermediationReason::TerminationWord => "mot de clôture",
                IntermediationReason::UserAction => "action utilisateur",
            }
        ),
        _ => format!("Intermediation mode ended ({}).", reason.as_str()),
    }
}

/// Pull a tool-name list out of a worker-declared tool set. Supports a flat
/// name list and the provider-style `[{name, description, …}]`.
pub fn extract_tool_names(tools: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = tools else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map.get("name").and_then(Value::as_str).map(String::from),
            _ => None,
        })
        .collect()
}

/// Flip intermediation on (idempotent). Returns `"already_active"` or
/// `"activated"`.
///
/// The system message is broadcast-only — never written to the RTDB.
pub async fn start_intermediation(
    deps: &ListenerDeps,
    session: &Session,
    brain: &Brain,
    thread_key: &ThreadKey,
    tools: Option<&Value>,
) -> &'static str {
    if session.intermediation_active(thread_key) {
        debug!(thread = %thread_key, "intermediation already active");
        return "already_active";
    }
    session.set_intermediation(thread_key, true);

    let channel = thread_channel(session, thread_key);
    let lang = brain.language();
    deps.hub
        .broadcast(
            session.user_id.as_str(),
            event(
                "SYSTEM_MESSAGE_INTERMEDIATION",
                &channel,
                json!({
                    "id": Uuid::new_v4().to_string(),
                    "text": localized_start(&lang),
                    "action": "start",
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            ),
        )
        .await;
    deps.hub
        .broadcast(
            session.user_id.as_str(),
            event(
                "RPC_INTERMEDIATION_STATE",
                &channel,
                json!({
                    "action": "start",
                    "tools": extract_tool_names(tools),
                }),
            ),
        )
        .await;

    info!(user = %session.user_id, thread = %thread_key, "intermediation started");
    "activated"
}

/// Flip intermediation off and notify the UI with the localized reason.
pub async fn stop_intermediation(
    deps: &ListenerDeps,
    session: &Session,
    brain: &Brain,
    thread_key: &ThreadKey,
    reason: IntermediationReason,
) {
    session.set_intermediation(thread_key, false);

    let channel = thread_channel(session, thread_key);
    let lang = brain.language();
    deps.hub
        .broadcast(
            session.user_id.as_str(),
            event(
                "SYSTEM_MESSAGE_INTERMEDIATION",
                &channel,
                json!({
                    "id": Uuid::new_v4().to_string(),
                    "text": localized_stop(&lang, reason),
                    "action": "stop",
                    "reason": reason.as_str(),
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            ),
        )
        .await;
    deps.hub
        .broadcast(
            session.user_id.as_str(),
            event(
                "RPC_INTERMEDIATION_STATE",
                &channel,
                json!({ "action": "stop", "reason": reason.as_str() }),
            ),
        )
        .await;

    info!(user = %session.user_id, thread = %thread_key, reason = reason.as_str(), "intermediation stopped");
}

/// User message while intermediation is active: relay to the worker channel
/// instead of the model. The message is NOT broadcast over the WS and NOT
/// written to the thread container — the UI already stored it.
pub async fn respond_during_intermediation(
    deps: &ListenerDeps,
    session: &Session,
    brain: &Brain,
    handle: &ListenerHandle,
    thread_key: &ThreadKey,
    text: &str,
) -> Result<()> {
    let trimmed = text.trim_end();
    let upper = trimmed.to_uppercase();
    let termination = TERMINATION_WORDS.iter().find(|w| upper.ends_with(*w));

    let outgoing = if termination == Some(&"TERMINATE") {
        // TERMINATE synthesis: one forced tool call structures the hand-back.
        match synthesize_waiting_response(deps, brain, trimmed).await {
            Ok(Some(synthesis)) => {
                if !synthesis.user_summary.is_empty() {
                    brain.append_system_log(
                        &handle.job_id,
                        &Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                        &format!("[handed back to application] {}", synthesis.user_summary),
                    );
                }
                synthesis.response_to_application
            }
            Ok(None) | Err(_) => {
                warn!(thread = %thread_key, "TERMINATE synthesis unavailable, relaying raw text");
                trimmed.to_string()
            }
        }
    } else {
        trimmed.to_string()
    };

    let channel_path = paths::job_chat_messages(&session.tenant_id, &handle.job_id);
    deps.rtdb
        .push(
            &channel_path,
            json!({
                "id": Uuid::new_v4().to_string(),
                "content": outgoing,
                "sender_id": session.user_id.as_str(),
                "timestamp": Utc::now().to_rfc3339(),
                "message_type": "MESSAGE_PINNOKIO",
                "read": false,
            }),
        )
        .await?;

    if termination.is_some() {
        deps.rtdb
            .push(
                &channel_path,
                json!({
                    "id": Uuid::new_v4().to_string(),
                    "content": "termination_word",
                    "sender_id": session.user_id.as_str(),
                    "timestamp": Utc::now().to_rfc3339(),
                    "message_type": "CLOSE_INTERMEDIATION",
                    "read": false,
                }),
            )
            .await?;
        stop_intermediation(
            deps,
            session,
            brain,
            thread_key,
            IntermediationReason::TerminationWord,
        )
        .await;
    }

    Ok(())
}

struct WaitingSynthesis {
    response_to_application: String,
    user_summary: String,
}

/// One tool-only model call, forced to SUBMIT_WAITING_RESPONSE, producing
/// the structured hand-back for the waiting application.
async fn synthesize_waiting_response(
    deps: &ListenerDeps,
    brain: &Brain,
    user_text: &str,
) -> Result<Option<WaitingSynthesis>> {
    let waiting_context = brain
        .take_waiting_event()
        .map(|e| e.to_string())
        .unwrap_or_default();

    let tool = ToolDefinition {
        name: "SUBMIT_WAITING_RESPONSE".to_string(),
        description: "Structure the hand-back to the waiting background application."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "response_to_application": {"type": "string"},
                "user_summary": {"type": "string"},
                "context_notes": {"type": "string"}
            },
            "required": ["response_to_application", "user_summary"]
        }),
    };

    let mut req = ChatRequest::simple(
        &deps.model,
        format!(
            "{}\n\nThe background application is waiting for input. Event under \
             review:\n{}\n\nCompose the response it expects. \
             'response_to_application' MUST end with the word TERMINATE.",
            brain.render_system_prompt(),
            waiting_context
        ),
        user_text,
    );
    req.tools = vec![tool];
    req.tool_choice = ToolChoice::Forced("SUBMIT_WAITING_RESPONSE".to_string());

    let resp = deps.provider.send(&req).await?;
    let Some(call) = resp
        .tool_calls
        .iter()
        .find(|c| c.name == "SUBMIT_WAITING_RESPONSE")
    else {
        return Ok(None);
    };

    let mut response = call
        .input
        .get("response_to_application")
        .and_then(Value::as_str)
        .unwrap_or(user_text)
        .to_string();
    if !response.trim_end().to_uppercase().ends_with("TERMINATE") {
        response = format!("{} TERMINATE", response.trim_end());
    }
    let user_summary = call
        .input
        .get("user_summary")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(Some(WaitingSynthesis {
        response_to_application: response,
        user_summary,
    }))
}
