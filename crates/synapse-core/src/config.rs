use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Hard cap per inbound WS frame.
pub const MAX_PAYLOAD_BYTES: usize = 128 * 1024;

/// Top-level config (synapse.toml + SYNAPSE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynapseConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

impl Default for SynapseConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            provider: ProviderConfig::default(),
            worker: WorkerConfig::default(),
            workflow: WorkflowConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Anthropic API key. Empty means the gateway refuses to start unless a
    /// custom provider is injected (tests do this).
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Cheap model used for conversation summaries.
    #[serde(default = "default_summary_model")]
    pub summary_model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_anthropic_base_url(),
            model: default_model(),
            summary_model: default_summary_model(),
        }
    }
}

/// Backend worker service reachable over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_base_url")]
    pub base_url: String,
    /// Timeout for the stop endpoint POST.
    #[serde(default = "default_worker_stop_timeout")]
    pub stop_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            base_url: default_worker_base_url(),
            stop_timeout_secs: default_worker_stop_timeout(),
        }
    }
}

/// Knobs of the unified streaming workflow. Defaults are the contract values;
/// tests shrink them to keep runs fast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Maximum agentic turns per invocation.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Context-token threshold that triggers summarization.
    #[serde(default = "default_token_budget")]
    pub token_budget: u64,
    /// Output bound for the summary model call.
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
    /// How long an approval card waits for a user decision.
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_secs: u64,
    /// Bounded wait when an RTDB callback thread hands work to the session
    /// callback loop.
    #[serde(default = "default_callback_ack_timeout")]
    pub callback_ack_timeout_ms: u64,
    /// TTL for WS messages buffered while the user is disconnected.
    #[serde(default = "default_buffer_ttl")]
    pub buffer_ttl_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            token_budget: default_token_budget(),
            summary_max_tokens: default_summary_max_tokens(),
            approval_timeout_secs: default_approval_timeout(),
            callback_ack_timeout_ms: default_callback_ack_timeout(),
            buffer_ttl_secs: default_buffer_ttl(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_summary_model() -> String {
    "claude-haiku-4-5-20251001".to_string()
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_worker_base_url() -> String {
    "http://localhost:8091".to_string()
}
fn default_worker_stop_timeout() -> u64 {
    30
}
fn default_max_turns() -> u32 {
    20
}
fn default_token_budget() -> u64 {
    80_000
}
fn default_summary_max_tokens() -> u32 {
    500
}
fn default_approval_timeout() -> u64 {
    900
}
fn default_callback_ack_timeout() -> u64 {
    1_000
}
fn default_buffer_ttl() -> u64 {
    3_600
}

impl SynapseConfig {
    /// Load config from a TOML file with SYNAPSE_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: SynapseConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("SYNAPSE_").split("_"))
            .extract()
            .map_err(|e| crate::error::SynapseError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.synapse/synapse.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract_values() {
        let cfg = SynapseConfig::default();
        assert_eq!(cfg.workflow.max_turns, 20);
        assert_eq!(cfg.workflow.token_budget, 80_000);
        assert_eq!(cfg.workflow.approval_timeout_secs, 900);
        assert_eq!(cfg.workflow.callback_ack_timeout_ms, 1_000);
        assert_eq!(cfg.worker.stop_timeout_secs, 30);
    }
}
