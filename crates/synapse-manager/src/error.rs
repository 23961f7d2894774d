use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Brain not initialized")]
    BrainNotInitialized,

    #[error("client_uuid is required for first initialization")]
    MissingClientUuid,

    #[error("mandate_path is required")]
    MissingMandatePath,

    #[error("session initialization failed: {0}")]
    Initialization(String),

    #[error("no pending approval for {0}")]
    NoPendingApproval(String),

    #[error("listener missing for thread {0}")]
    ListenerMissing(String),

    #[error("RTDB error: {0}")]
    Rtdb(#[from] synapse_rtdb::RtdbError),

    #[error("workflow error: {0}")]
    Workflow(#[from] synapse_brain::BrainError),

    #[error("listener error: {0}")]
    Listener(#[from] synapse_listener::ListenerError),

    #[error("approval error: {0}")]
    Approval(#[from] synapse_approval::ApprovalError),

    #[error("worker HTTP error: {0}")]
    WorkerHttp(String),
}

impl ManagerError {
    /// The user-facing error string for the RPC envelope.
    pub fn public_message(&self) -> String {
        self.to_string()
    }
}

pub type Result<T> = std::result::Result<T, ManagerError>;
