use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrainError {
    #[error("LLM provider error: {0}")]
    Provider(#[from] synapse_provider::ProviderError),

    #[error("RTDB error: {0}")]
    Rtdb(#[from] synapse_rtdb::RtdbError),

    #[error("approval error: {0}")]
    Approval(#[from] synapse_approval::ApprovalError),

    #[error("store error: {0}")]
    Store(String),

    #[error("invalid tool input: {0}")]
    ToolInput(String),

    #[error("no user context loaded")]
    NoUserContext,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BrainError>;
