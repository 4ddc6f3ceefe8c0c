pub mod bulk;
pub mod config;
pub mod connection;
pub mod error;
pub mod intercept;
pub mod log_hook;
mod raw;
pub mod statement;
pub mod update_hook;

pub use bulk::insert_all;
pub use config::{ConnectionConfig, OpenMode, DEFAULT_BUSY_TIMEOUT_MS};
pub use connection::Connection;
pub use error::StorageError;
pub use rusqlite::ErrorCode;
pub use intercept::{BackendIntegration, HandleRef};
pub use statement::{MultiStep, Statement, Step};
