use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable end-user identifier supplied by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Logical company/workspace whose data is namespaced under a top-level
/// RTDB key. One user may belong to several tenants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One conversation within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadKey(pub String);

impl ThreadKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ThreadKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ThreadKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Session identifier (UUIDv7 — time-sortable for easier log correlation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named configuration selecting a prompt builder and a tool set.
///
/// The three worker-backed modes (`ApBookeeper`, `Router`, `Banker`) store
/// their messages under `active_chats` and accept card-driven direct dialog;
/// everything else lives under `chats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    #[default]
    #[serde(rename = "general_chat")]
    General,
    #[serde(rename = "onboarding_chat")]
    Onboarding,
    #[serde(rename = "apbookeeper_chat")]
    ApBookeeper,
    #[serde(rename = "router_chat")]
    Router,
    #[serde(rename = "banker_chat")]
    Banker,
    #[serde(rename = "task_execution")]
    TaskExecution,
}

impl ChatMode {
    /// Wire name as used by clients and the RTDB container selection.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::General => "general_chat",
            ChatMode::Onboarding => "onboarding_chat",
            ChatMode::ApBookeeper => "apbookeeper_chat",
            ChatMode::Router => "router_chat",
            ChatMode::Banker => "banker_chat",
            ChatMode::TaskExecution => "task_execution",
        }
    }

    /// Modes that consume a worker job channel — a follow-up listener is
    /// installed on enter/load for these.
    pub fn is_onboarding_like(&self) -> bool {
        matches!(
            self,
            ChatMode::Onboarding | ChatMode::ApBookeeper | ChatMode::Router | ChatMode::Banker
        )
    }

    /// Modes whose messages live under the `active_chats` container.
    pub fn uses_active_chats(&self) -> bool {
        matches!(
            self,
            ChatMode::ApBookeeper | ChatMode::Router | ChatMode::Banker
        )
    }

    /// Modes where an incoming worker CARD/TOOL starts intermediation.
    /// Plain onboarding only enters intermediation on FOLLOW_MESSAGE.
    pub fn card_driven_intermediation(&self) -> bool {
        matches!(
            self,
            ChatMode::ApBookeeper | ChatMode::Router | ChatMode::Banker
        )
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChatMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "general_chat" => Ok(ChatMode::General),
            "onboarding_chat" => Ok(ChatMode::Onboarding),
            "apbookeeper_chat" => Ok(ChatMode::ApBookeeper),
            "router_chat" => Ok(ChatMode::Router),
            "banker_chat" => Ok(ChatMode::Banker),
            "task_execution" => Ok(ChatMode::TaskExecution),
            other => Err(format!("unknown chat mode: {}", other)),
        }
    }
}

/// Canonical WS channel for thread-scoped events:
/// `chat:<user>:<tenant>:<thread>`.
pub fn chat_channel(user_id: &UserId, tenant_id: &TenantId, thread_key: &ThreadKey) -> String {
    format!("chat:{}:{}:{}", user_id, tenant_id, thread_key)
}

/// Extract the thread portion of a `chat:`-prefixed channel, if any.
///
/// Accepts both the full `chat:<user>:<tenant>:<thread>` form and the legacy
/// `chat:<thread>` form used by older clients.
pub fn thread_of_channel(channel: &str) -> Option<&str> {
    let rest = channel.strip_prefix("chat:")?;
    match rest.rfind(':') {
        Some(idx) => Some(&rest[idx + 1..]),
        None => Some(rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_mode_roundtrip() {
        for mode in [
            ChatMode::General,
            ChatMode::Onboarding,
            ChatMode::ApBookeeper,
            ChatMode::Router,
            ChatMode::Banker,
            ChatMode::TaskExecution,
        ] {
            let parsed: ChatMode = mode.as_str().parse().expect("parse failed");
            assert_eq!(parsed, mode);
        }
    }

    #[test]
    fn unknown_chat_mode_is_rejected() {
        assert!("mystery_chat".parse::<ChatMode>().is_err());
    }

    #[test]
    fn worker_modes_use_active_chats() {
        assert!(ChatMode::Router.uses_active_chats());
        assert!(!ChatMode::Onboarding.uses_active_chats());
        assert!(!ChatMode::General.uses_active_chats());
    }

    #[test]
    fn channel_format_and_thread_extraction() {
        let ch = chat_channel(&"u1".into(), &"ten1".into(), &"t1".into());
        assert_eq!(ch, "chat:u1:ten1:t1");
        assert_eq!(thread_of_channel(&ch), Some("t1"));
        assert_eq!(thread_of_channel("chat:t9"), Some("t9"));
        assert_eq!(thread_of_channel("notify:u1"), None);
    }
}
