use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::InterruptHandle;
use stepgate_core::ConnectionId;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::StorageError;
use crate::intercept;
use crate::raw::{self, RawDb};
use crate::statement::Statement;
use crate::update_hook::UpdateHook;

/// The open engine handle and the state that lives and dies with it.
pub(crate) struct Handle {
    pub(crate) conn: rusqlite::Connection,
    pub(crate) update_hook: Option<UpdateHook>,
}

impl Handle {
    pub(crate) fn raw(&self) -> RawDb {
        unsafe { self.conn.handle() }
    }
}

/// A database connection shared between threads.
///
/// Every engine call goes through the connection lock. Statements keep
/// the connection alive through their own `Arc`, but `close` still shuts
/// the handle and later calls fail with `ConnectionClosed`.
pub struct Connection {
    id: ConnectionId,
    path: String,
    handle: Mutex<Option<Handle>>,
    interrupt: InterruptHandle,
}

impl Connection {
    pub fn open(path: &str, config: &ConnectionConfig) -> Result<Arc<Self>, StorageError> {
        let conn = intercept::open(path, config.open_flags())?;
        conn.busy_timeout(config.busy_timeout())?;
        if config.load_extensions {
            unsafe { conn.load_extension_enable()? };
        }
        let interrupt = conn.get_interrupt_handle();

        let id = ConnectionId::new();
        info!(connection = %id, path, "opened connection");
        Ok(Arc::new(Self {
            id,
            path: path.to_string(),
            handle: Mutex::new(Some(Handle {
                conn,
                update_hook: None,
            })),
            interrupt,
        }))
    }

    pub fn open_in_memory() -> Result<Arc<Self>, StorageError> {
        Self::open(":memory:", &ConnectionConfig::default())
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Run `f` against the open handle while holding the lock. An update
    /// subscriber found dead during `f` is unregistered before the lock is
    /// released.
    pub(crate) fn with_handle<T>(
        &self,
        f: impl FnOnce(&mut Handle) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self.handle.lock();
        let handle = guard.as_mut().ok_or(StorageError::ConnectionClosed)?;
        let result = f(handle);
        handle.reap_update_hook(self.id);
        result
    }

    /// Run one or more statements to completion, discarding any rows.
    pub fn execute(&self, sql: &str) -> Result<(), StorageError> {
        self.with_handle(|handle| unsafe { raw::exec(handle.raw(), sql) })
    }

    pub fn prepare(self: &Arc<Self>, sql: &str) -> Result<Statement, StorageError> {
        Statement::prepare(self, sql)
    }

    /// Close the engine handle. Closing twice is a no-op.
    ///
    /// An open transaction is rolled back first; if that fails the
    /// connection stays open. Close fails while prepared statements on
    /// this connection are still alive.
    pub fn close(&self) -> Result<(), StorageError> {
        let mut guard = self.handle.lock();
        let Some(handle) = guard.take() else {
            return Ok(());
        };

        if !handle.conn.is_autocommit() {
            warn!(connection = %self.id, "closing inside a transaction, rolling back");
            if let Err(e) = unsafe { raw::exec(handle.raw(), "ROLLBACK") } {
                *guard = Some(handle);
                return Err(e);
            }
        }

        let Handle { conn, update_hook } = handle;
        match conn.close() {
            Ok(()) => {
                info!(connection = %self.id, "closed connection");
                Ok(())
            }
            Err((conn, e)) => {
                warn!(connection = %self.id, error = %e, "close failed, connection stays open");
                // A failed close has already removed the engine hooks.
                let update_hook = update_hook.and_then(|hook| hook.restore(&conn, self.id));
                *guard = Some(Handle { conn, update_hook });
                Err(e.into())
            }
        }
    }

    /// Rows modified by the most recent insert, update or delete.
    pub fn changes(&self) -> Result<u64, StorageError> {
        self.with_handle(|handle| Ok(handle.conn.changes() as u64))
    }

    pub fn last_insert_rowid(&self) -> Result<i64, StorageError> {
        self.with_handle(|handle| Ok(handle.conn.last_insert_rowid()))
    }

    pub fn is_autocommit(&self) -> Result<bool, StorageError> {
        self.with_handle(|handle| Ok(handle.conn.is_autocommit()))
    }

    /// Ask the engine to abort whatever is running on this connection.
    /// Does not take the connection lock.
    pub fn interrupt(&self) {
        debug!(connection = %self.id, "interrupt requested");
        self.interrupt.interrupt();
    }

    pub fn serialize(&self, schema: &str) -> Result<Vec<u8>, StorageError> {
        self.with_handle(|handle| unsafe { raw::serialize(handle.raw(), schema) })
    }

    pub fn deserialize(&self, schema: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.with_handle(|handle| unsafe { raw::deserialize(handle.raw(), schema, bytes) })
    }

    pub fn set_load_extension(&self, enabled: bool) -> Result<(), StorageError> {
        self.with_handle(|handle| {
            if enabled {
                unsafe { handle.conn.load_extension_enable()? };
            } else {
                handle.conn.load_extension_disable()?;
            }
            Ok(())
        })
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpenMode;

    #[test]
    fn file_database_persists_across_connections() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("persist.db");
        let path = path.to_str().ok_or("non-utf8 temp path")?;

        let conn = Connection::open(path, &ConnectionConfig::default())?;
        assert_eq!(conn.path(), path);
        conn.execute("CREATE TABLE t (v); INSERT INTO t VALUES (1);")?;
        conn.close()?;

        let reopened = Connection::open(path, &ConnectionConfig::read_only())?;
        let stmt = reopened.prepare("SELECT v FROM t")?;
        assert_eq!(stmt.step()?, crate::Step::Row(vec![stepgate_core::Value::Integer(1)]));
        Ok(())
    }

    #[test]
    fn read_only_connection_rejects_writes() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ro.db");
        let path = path.to_str().ok_or("non-utf8 temp path")?;
        Connection::open(path, &ConnectionConfig::default())?.execute("CREATE TABLE t (v)")?;

        let config = ConnectionConfig {
            mode: OpenMode::ReadOnly,
            ..ConnectionConfig::default()
        };
        let conn = Connection::open(path, &config)?;
        let err = conn.execute("INSERT INTO t VALUES (1)").err().ok_or("write should fail")?;
        assert_eq!(err.code(), Some(rusqlite::ErrorCode::ReadOnly));
        Ok(())
    }

    #[test]
    fn autocommit_tracks_transactions() -> Result<(), Box<dyn std::error::Error>> {
        let conn = Connection::open_in_memory()?;
        assert!(conn.is_autocommit()?);
        conn.execute("BEGIN")?;
        assert!(!conn.is_autocommit()?);
        conn.execute("ROLLBACK")?;
        assert!(conn.is_autocommit()?);
        Ok(())
    }

    #[test]
    fn unknown_schema_cannot_be_deserialized() -> Result<(), Box<dyn std::error::Error>> {
        let conn = Connection::open_in_memory()?;
        conn.execute("CREATE TABLE t (v)")?;
        let image = conn.serialize("main")?;
        assert!(conn.deserialize("nowhere", &image).is_err());
        assert!(conn.is_open());
        Ok(())
    }

    #[test]
    fn unknown_schema_cannot_be_serialized() -> Result<(), Box<dyn std::error::Error>> {
        let conn = Connection::open_in_memory()?;
        conn.execute("CREATE TABLE t (v)")?;
        let err = conn.serialize("nowhere").err().ok_or("serialize of unknown schema succeeded")?;
        assert_eq!(err.code(), Some(rusqlite::ErrorCode::Unknown));
        assert!(err.to_string().contains("unknown database nowhere"));
        assert!(!conn.serialize("main")?.is_empty());
        Ok(())
    }
}
