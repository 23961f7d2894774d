use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynapseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session not initialized for user {user_id}")]
    SessionNotInitialized { user_id: String },

    #[error("Brain not initialized")]
    BrainNotInitialized,

    #[error("Listener not installed for thread {thread_key}")]
    ListenerMissing { thread_key: String },

    #[error("No pending approval for key {key}")]
    NoPendingApproval { key: String },

    #[error("Missing required field: {0}")]
    BadInput(String),

    #[error("RTDB error: {0}")]
    Rtdb(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("Worker HTTP error: {0}")]
    Worker(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SynapseError {
    /// Short error code string carried in RPC result envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            SynapseError::Config(_) => "CONFIG_ERROR",
            SynapseError::SessionNotInitialized { .. } => "SESSION_NOT_INITIALIZED",
            SynapseError::BrainNotInitialized => "BRAIN_NOT_INITIALIZED",
            SynapseError::ListenerMissing { .. } => "LISTENER_MISSING",
            SynapseError::NoPendingApproval { .. } => "NO_PENDING_APPROVAL",
            SynapseError::BadInput(_) => "BAD_INPUT",
            SynapseError::Rtdb(_) => "RTDB_ERROR",
            SynapseError::Cache(_) => "CACHE_ERROR",
            SynapseError::LlmProvider(_) => "LLM_PROVIDER_ERROR",
            SynapseError::Worker(_) => "WORKER_ERROR",
            SynapseError::Serialization(_) => "SERIALIZATION_ERROR",
            SynapseError::Io(_) => "IO_ERROR",
            SynapseError::Timeout { .. } => "TIMEOUT",
            SynapseError::Cancelled => "CANCELLED",
            SynapseError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SynapseError>;
