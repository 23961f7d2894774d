//! Literal RTDB path templates.
//!
//! `<tenant>/{active_chats|chats}/<thread_key>/messages/<message_id>` for
//! thread messages, `<tenant>/job_chats/<job_id>/messages` for worker
//! channels, `clients/<user>/direct_message_notif/<id>` for sidebar
//! notifications.

use synapse_core::types::{ChatMode, TenantId, ThreadKey, UserId};

/// Container segment for thread messages: worker-backed modes use
/// `active_chats`, everything else `chats`.
pub fn container(mode: ChatMode) -> &'static str {
    if mode.uses_active_chats() {
        "active_chats"
    } else {
        "chats"
    }
}

/// Message list of a thread.
pub fn thread_messages(tenant: &TenantId, mode: ChatMode, thread: &ThreadKey) -> String {
    format!("{}/{}/{}/messages", tenant, container(mode), thread)
}

/// A single thread message record.
pub fn thread_message(
    tenant: &TenantId,
    mode: ChatMode,
    thread: &ThreadKey,
    message_id: &str,
) -> String {
    format!("{}/{}", thread_messages(tenant, mode, thread), message_id)
}

/// Worker job channel message list.
pub fn job_chat_messages(tenant: &TenantId, job_id: &str) -> String {
    format!("{}/job_chats/{}/messages", tenant, job_id)
}

/// A single worker channel record.
pub fn job_chat_message(tenant: &TenantId, job_id: &str, message_id: &str) -> String {
    format!("{}/{}", job_chat_messages(tenant, job_id), message_id)
}

/// Sidebar direct-message notification record.
pub fn direct_message_notif(user: &UserId, notif_id: &str) -> String {
    format!("clients/{}/direct_message_notif/{}", user, notif_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_selection_by_mode() {
        assert_eq!(container(ChatMode::General), "chats");
        assert_eq!(container(ChatMode::Onboarding), "chats");
        assert_eq!(container(ChatMode::ApBookeeper), "active_chats");
        assert_eq!(container(ChatMode::Banker), "active_chats");
    }

    #[test]
    fn templates_are_literal() {
        let tenant = TenantId::from("acme");
        let thread = ThreadKey::from("t1");
        assert_eq!(
            thread_message(&tenant, ChatMode::Router, &thread, "m1"),
            "acme/active_chats/t1/messages/m1"
        );
        assert_eq!(
            job_chat_messages(&tenant, "job42"),
            "acme/job_chats/job42/messages"
        );
        assert_eq!(
            direct_message_notif(&UserId::from("u1"), "n1"),
            "clients/u1/direct_message_notif/n1"
        );
    }
}
