use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use stepgate_core::{ConnectionId, Value};
use stepgate_engine::{Arg, Engine, Reply};
use stepgate_storage::{Connection, ConnectionConfig, StorageError};
use tempfile::TempDir;

/// Connection settings for tests that provoke lock contention: no busy
/// timeout, so a conflicting step reports busy at once.
pub fn fail_fast_config() -> ConnectionConfig {
    ConnectionConfig::default().with_busy_timeout(Duration::ZERO)
}

/// A database file in its own temporary directory, removed on drop.
pub struct TestDatabase {
    _dir: TempDir,
    path: String,
}

impl TestDatabase {
    pub fn new() -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("test.db").to_string_lossy().into_owned();
        Ok(Self { _dir: dir, path })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn exists(&self) -> bool {
        Path::new(&self.path).exists()
    }

    pub fn open(&self) -> Result<Arc<Connection>, StorageError> {
        Connection::open(&self.path, &ConnectionConfig::default())
    }

    pub fn open_with(&self, config: &ConnectionConfig) -> Result<Arc<Connection>, StorageError> {
        Connection::open(&self.path, config)
    }

    /// Open through the engine's `open` operation.
    pub fn open_via(&self, engine: &Engine) -> Result<ConnectionId, Box<dyn std::error::Error>> {
        match engine.call("open", vec![Arg::from(self.path.as_str())])? {
            Reply::Connection(id) => Ok(id),
            other => Err(format!("open replied {other:?}").into()),
        }
    }

    /// Open a connection and create `name (id INTEGER PRIMARY KEY, v)`.
    pub fn with_table(&self, name: &str) -> Result<Arc<Connection>, StorageError> {
        let conn = self.open()?;
        conn.execute(&format!("CREATE TABLE {name} (id INTEGER PRIMARY KEY, v)"))?;
        Ok(conn)
    }
}

/// Number of rows in `table`.
pub fn count(conn: &Arc<Connection>, table: &str) -> Result<i64, StorageError> {
    let stmt = conn.prepare(&format!("SELECT count(*) FROM {table}"))?;
    match stmt.step()? {
        stepgate_storage::Step::Row(row) => Ok(row.first().and_then(Value::as_integer).unwrap_or(0)),
        _ => Ok(0),
    }
}
