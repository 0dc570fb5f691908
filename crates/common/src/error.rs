use thiserror::Error;

/// Common error types for the relay
#[derive(Debug, Error)]
pub enum HiddenDropError {
    #[error("Target unreachable: {0}")]
    TargetUnreachable(String),

    #[error("Chunk authentication failed")]
    AuthenticationFailure,

    #[error("Malformed chunk: {0}")]
    MalformedChunk(String),

    #[error("Transfer request timed out")]
    NegotiationTimeout,

    #[error("Transfer rejected by recipient")]
    TransferRejected,

    #[error("Transfer to {0} already in progress")]
    AttemptInProgress(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, HiddenDropError>;

impl HiddenDropError {
    pub fn target_unreachable(id: impl Into<String>) -> Self {
        Self::TargetUnreachable(id.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
