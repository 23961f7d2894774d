use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not initialized: {0}")]
    NotInitialized(String),

    #[error("brain not initialized")]
    BrainNotInitialized,

    #[error("tenant store error: {0}")]
    TenantStore(String),

    #[error("callback loop stopped")]
    CallbackLoopStopped,

    #[error("callback scheduling timed out after {ms}ms")]
    ScheduleTimeout { ms: u64 },
}

pub type Result<T> = std::result::Result<T, SessionError>;
