use thiserror::Error;

#[derive(Error, Debug)]
pub enum O2CError {
    #[error("Unsupported configuration: {0}")]
    Unsupported(String),
    #[error("Unknown operator: {0}")]
    UnknownOp(String),
    #[error("Invalid model: {0}")]
    InvalidModel(String),
    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Tool invocation failed: {0}")]
    Tool(String),
    #[error("Output mismatch: {0}")]
    CheckFailed(String),
    #[error("Internal invariant violation: {0}")]
    Internal(String),
}

pub type O2CResult<T> = Result<T, O2CError>;

/// Rejection signal raised by operator variants that cannot handle a node.
/// The driver catches it and moves on to the next candidate.
pub fn unsupported<T>(msg: impl Into<String>) -> O2CResult<T> {
    Err(O2CError::Unsupported(msg.into()))
}
