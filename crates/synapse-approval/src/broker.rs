use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use synapse_core::types::{chat_channel, ChatMode, TenantId, ThreadKey, UserId};
use synapse_hub::{event, WsHub};
use synapse_rtdb::{paths, RtdbPort};

use crate::error::{ApprovalError, Result};

/// The user's click, as delivered by `send_card_response`.
#[derive(Debug, Clone)]
struct Decision {
    action: String,
    user_message: String,
}

/// What the suspended tool call receives back.
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub approved: bool,
    /// `"approve"`, `"approve_four_eyes"`, `"reject"`, … — empty on timeout.
    pub action: String,
    pub user_message: String,
    pub card_message_id: String,
    pub timed_out: bool,
}

/// Everything needed to show one card and wait for its resolution.
pub struct ApprovalRequest {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub thread_key: ThreadKey,
    pub chat_mode: ChatMode,
    pub card_type: String,
    /// Card body built by one of the [`crate::cards`] builders.
    pub card_body: Value,
    pub timeout: Duration,
    /// Assistant message the card relates to, when streaming.
    pub assistant_message_id: Option<String>,
}

/// Pending one-shot decision map plus the card side effects.
///
/// Keys are `user:thread:card_message_id` (plan-level approvals use the plan
/// id in the last slot). Process-wide singleton owned by the gateway state.
pub struct ApprovalBroker {
    rtdb: Arc<dyn RtdbPort>,
    hub: Arc<WsHub>,
    pending: DashMap<String, oneshot::Sender<Decision>>,
}

impl ApprovalBroker {
    pub fn new(rtdb: Arc<dyn RtdbPort>, hub: Arc<WsHub>) -> Self {
        Self {
            rtdb,
            hub,
            pending: DashMap::new(),
        }
    }

    fn key(user_id: &UserId, thread_key: &ThreadKey, card_message_id: &str) -> String {
        format!("{}:{}:{}", user_id, thread_key, card_message_id)
    }

    /// Whether a pending decision exists for the given card.
    pub fn has_pending(&self, user_id: &UserId, thread_key: &ThreadKey, id: &str) -> bool {
        self.pending.contains_key(&Self::key(user_id, thread_key, id))
    }

    /// Show a card and suspend until the user decides or the timeout fires.
    ///
    /// Side effects, in order: CARD broadcast on the thread channel, pending
    /// card record in the RTDB, sidebar notification. On resolution the
    /// record is patched (`responded`/`timeout`) and the notification
    /// deleted.
    pub async fn request_approval_with_card(&self, req: ApprovalRequest) -> Result<ApprovalOutcome> {
        let card_message_id = Uuid::new_v4().to_string();
        let key = Self::key(&req.user_id, &req.thread_key, &card_message_id);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(key.clone(), tx);

        let channel = chat_channel(&req.user_id, &req.tenant_id, &req.thread_key);
        let timeout_at = Utc::now()
            + chrono::Duration::from_std(req.timeout).unwrap_or_else(|_| chrono::Duration::zero());

        // 1. CARD event to the UI — the card body travels JSON-stringified,
        // matching what the client's card renderer expects.
        let mut payload = json!({
            "card_message_id": card_message_id,
            "card_type": req.card_type,
            "card": req.card_body.to_string(),
        });
        if let Some(ref mid) = req.assistant_message_id {
            payload["assistant_message_id"] = json!(mid);
        }
        self.hub
            .broadcast(req.user_id.as_str(), event("CARD", &channel, payload))
            .await;

        // 2. Pending record in the thread's message list.
        let record_path = paths::thread_message(
            &req.tenant_id,
            req.chat_mode,
            &req.thread_key,
            &card_message_id,
        );
        let record = json!({
            "id": card_message_id,
            "content": req.card_body.to_string(),
            "sender_id": "synapse",
            "timestamp": Utc::now().to_rfc3339(),
            "message_type": "CARD",
            "card_type": req.card_type,
            "status": "pending_approval",
            "timeout_at": timeout_at.to_rfc3339(),
            "read": false,
        });
        if let Err(e) = self.rtdb.set(&record_path, record).await {
            self.pending.remove(&key);
            return Err(e.into());
        }

        // 3. Sidebar notification.
        let notif_id = format!("approval_{}", card_message_id);
        let notif_path = paths::direct_message_notif(&req.user_id, &notif_id);
        let notif = json!({
            "id": notif_id,
            "kind": "approval_card",
            "thread_key": req.thread_key.as_str(),
            "card_message_id": card_message_id,
            "card_type": req.card_type,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Err(e) = self.rtdb.set(&notif_path, notif).await {
            // The card itself is live; a missing sidebar entry is cosmetic.
            warn!(error = %e, "approval notification write failed");
        }

        info!(
            user = %req.user_id,
            thread = %req.thread_key,
            card_message_id,
            card_type = %req.card_type,
            timeout_secs = req.timeout.as_secs(),
            "approval card pending"
        );

        // 4. Wait for the click or the deadline.
        let outcome = match tokio::time::timeout(req.timeout, rx).await {
            Ok(Ok(decision)) => {
                self.rtdb
                    .update(
                        &record_path,
                        json!({
                            "status": "responded",
                            "action": decision.action,
                            "user_message": decision.user_message,
                            "responded_at": Utc::now().to_rfc3339(),
                        }),
                    )
                    .await?;
                ApprovalOutcome {
                    approved: decision.action.starts_with("approve"),
                    action: decision.action,
                    user_message: decision.user_message,
                    card_message_id: card_message_id.clone(),
                    timed_out: false,
                }
            }
            Ok(Err(_)) => {
                self.pending.remove(&key);
                return Err(ApprovalError::ChannelDropped(key));
            }
            Err(_) => {
                self.pending.remove(&key);
                self.rtdb
                    .update(&record_path, json!({ "status": "timeout" }))
                    .await?;
                info!(card_message_id, "approval card timed out");
                ApprovalOutcome {
                    approved: false,
                    action: String::new(),
                    user_message: String::new(),
                    card_message_id: card_message_id.clone(),
                    timed_out: true,
                }
            }
        };

        if let Err(e) = self.rtdb.delete(&notif_path).await {
            warn!(error = %e, "approval notification delete failed");
        }

        Ok(outcome)
    }

    /// Resolve a pending approval. `approved` is derived from the action
    /// prefix by the awaiting side.
    pub fn resolve(
        &self,
        user_id: &UserId,
        thread_key: &ThreadKey,
        card_message_id: &str,
        action: &str,
        user_message: &str,
    ) -> Result<()> {
        let key = Self::key(user_id, thread_key, card_message_id);
        let (_, tx) = self
            .pending
            .remove(&key)
            .ok_or_else(|| ApprovalError::NoPending(key.clone()))?;
        tx.send(Decision {
            action: action.to_string(),
            user_message: user_message.to_string(),
        })
        .map_err(|_| ApprovalError::ChannelDropped(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synapse_cache::MemoryCache;
    use synapse_hub::MessageBuffer;
    use synapse_rtdb::MemoryRtdb;

    fn broker() -> (ApprovalBroker, Arc<MemoryRtdb>) {
        let rtdb = Arc::new(MemoryRtdb::new());
        let hub = Arc::new(WsHub::new(MessageBuffer::new(
            Arc::new(MemoryCache::new()),
            60,
        )));
        (ApprovalBroker::new(rtdb.clone(), hub), rtdb)
    }

    fn request(timeout: Duration) -> ApprovalRequest {
        ApprovalRequest {
            user_id: "u1".into(),
            tenant_id: "acme".into(),
            thread_key: "t1".into(),
            chat_mode: ChatMode::Router,
            card_type: "text_modification".into(),
            card_body: json!({"title": "review"}),
            timeout,
            assistant_message_id: None,
        }
    }

    #[tokio::test]
    async fn approve_resolves_future_and_patches_record() {
        let (broker, rtdb) = broker();
        let broker = Arc::new(broker);

        let waiter = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                broker
                    .request_approval_with_card(request(Duration::from_secs(5)))
                    .await
                    .unwrap()
            })
        };

        // Find the pending record to learn the generated card id.
        let card_id = loop {
            let children = rtdb
                .get_children_sorted("acme/active_chats/t1/messages", None)
                .await
                .unwrap();
            if let Some(first) = children.first() {
                break first["id"].as_str().unwrap().to_string();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        broker
            .resolve(&"u1".into(), &"t1".into(), &card_id, "approve_four_eyes", "ok")
            .unwrap();

        let outcome = waiter.await.unwrap();
        assert!(outcome.approved);
        assert_eq!(outcome.action, "approve_four_eyes");
        assert!(!outcome.timed_out);

        let record = rtdb
            .get(&format!("acme/active_chats/t1/messages/{card_id}"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record["status"], "responded");
        assert_eq!(record["user_message"], "ok");

        // Notification removed on resolution.
        let notif = rtdb
            .get(&format!("clients/u1/direct_message_notif/approval_{card_id}"))
            .await
            .unwrap();
        assert!(notif.is_none());
    }

    #[tokio::test]
    async fn timeout_patches_record_and_reports_unapproved() {
        let (broker, rtdb) = broker();
        let outcome = broker
            .request_approval_with_card(request(Duration::from_millis(50)))
            .await
            .unwrap();
        assert!(!outcome.approved);
        assert!(outcome.timed_out);

        let record = rtdb
            .get(&format!(
                "acme/active_chats/t1/messages/{}",
                outcome.card_message_id
            ))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record["status"], "timeout");
    }

    #[tokio::test]
    async fn resolving_unknown_card_errors() {
        let (broker, _) = broker();
        let err = broker
            .resolve(&"u1".into(), &"t1".into(), "nope", "approve", "")
            .unwrap_err();
        assert!(matches!(err, ApprovalError::NoPending(_)));
    }
}
