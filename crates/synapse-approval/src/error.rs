use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("no pending approval for key {0}")]
    NoPending(String),

    #[error("RTDB error: {0}")]
    Rtdb(#[from] synapse_rtdb::RtdbError),

    #[error("decision channel dropped for key {0}")]
    ChannelDropped(String),
}

pub type Result<T> = std::result::Result<T, ApprovalError>;
