#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("session '{0}' not found")]
    SessionNotFound(String),
    #[error("session '{id}' cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: &'static str,
        to: &'static str,
    },
    #[error("unknown session state '{0}'")]
    InvalidState(String),
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}

pub type StoreResult<T> = Result<T, StoreError>;
