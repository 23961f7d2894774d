use thiserror::Error;

#[derive(Debug, Error)]
pub enum RtdbError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("state poisoned: {0}")]
    Poisoned(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RtdbError>;
