use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("RTDB error: {0}")]
    Rtdb(#[from] synapse_rtdb::RtdbError),

    #[error("provider error: {0}")]
    Provider(#[from] synapse_provider::ProviderError),

    #[error("listener not installed for thread {0}")]
    NotInstalled(String),
}

pub type Result<T> = std::result::Result<T, ListenerError>;
