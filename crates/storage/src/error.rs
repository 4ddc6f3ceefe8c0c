use stepgate_core::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("statement already finalized")]
    StatementFinalized,

    #[error("statement belongs to a different connection")]
    StatementConnectionMismatch,

    #[error("no SQL statement found in input")]
    EmptyStatement,

    #[error("expected {expected} parameters, got {actual}")]
    ParameterCountMismatch { expected: usize, actual: usize },

    #[error("wrong type for parameter {index}: {value:?}")]
    WrongType { index: usize, value: Value },

    #[error("statement produced a row where completion was expected")]
    UnexpectedRow,

    #[error("{0} exceeds the engine's size limit")]
    TooLarge(&'static str),

    #[error("out of memory")]
    OutOfMemory,
}

impl StorageError {
    /// The engine's result code, for errors that came from the engine.
    pub fn code(&self) -> Option<rusqlite::ErrorCode> {
        match self {
            StorageError::Sqlite(e) => e.sqlite_error_code(),
            _ => None,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(
            self.code(),
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
        )
    }
}
