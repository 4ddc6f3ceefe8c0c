use stepgate_core::{ConnectionId, StatementId};
use stepgate_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid connection: {0}")]
    InvalidConnection(ConnectionId),

    #[error("invalid statement: {0}")]
    InvalidStatement(StatementId),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("{op} takes {expected} arguments, got {actual}")]
    BadArity {
        op: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{op}: argument {index} must be {expected}")]
    BadArgument {
        op: &'static str,
        index: usize,
        expected: &'static str,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}
