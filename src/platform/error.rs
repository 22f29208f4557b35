//! Crate-wide error type.

use thiserror::Error;

pub type FuzzStateResult<T> = Result<T, FuzzStateError>;

#[derive(Debug, Error)]
pub enum FuzzStateError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {status} from {context}")]
    Status { status: u16, context: String },

    #[error("render error: {0}")]
    Render(String),

    #[error("trace error: {0}")]
    Trace(String),
}
