use std::sync::Arc;

use stepgate_core::Value;
use tracing::{debug, warn};

use crate::connection::{Connection, Handle};
use crate::error::StorageError;
use crate::raw::{self, RawStmt};
use crate::statement::{Statement, Step, bind_locked, step_locked};

/// Apply `statement` once per row inside a single immediate transaction.
///
/// Either every row is applied and committed, or the transaction is rolled
/// back and the first failure is returned. The connection lock is held for
/// the whole batch.
pub fn insert_all<R>(
    connection: &Arc<Connection>,
    statement: &Statement,
    rows: &[R],
) -> Result<(), StorageError>
where
    R: AsRef<[Value]>,
{
    if rows.is_empty() {
        return Ok(());
    }
    let owner = statement.connection().ok_or(StorageError::StatementFinalized)?;
    if !Arc::ptr_eq(owner, connection) {
        return Err(StorageError::StatementConnectionMismatch);
    }
    let stmt = statement.raw()?;

    connection.with_handle(|handle| {
        let db = handle.raw();
        unsafe { raw::exec(db, "BEGIN IMMEDIATE")? };
        debug!(connection = %connection.id(), rows = rows.len(), "bulk insert started");

        for (n, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            let applied = statement
                .check_arity(row)
                .and_then(|()| unsafe { bind_locked(handle, stmt, row) })
                .and_then(|()| unsafe { expect_done(handle, stmt) });
            if let Err(e) = applied {
                warn!(connection = %connection.id(), row = n, error = %e, "bulk insert abandoned");
                unsafe { rollback(handle, stmt) };
                return Err(e);
            }
        }

        unsafe { raw::reset(stmt) };
        if let Err(e) = unsafe { raw::exec(db, "COMMIT") } {
            warn!(connection = %connection.id(), error = %e, "bulk insert commit failed");
            unsafe { rollback(handle, stmt) };
            return Err(e);
        }
        debug!(connection = %connection.id(), rows = rows.len(), "bulk insert committed");
        Ok(())
    })
}

unsafe fn expect_done(handle: &Handle, stmt: RawStmt) -> Result<(), StorageError> {
    match unsafe { step_locked(handle, stmt)? } {
        Step::Done => Ok(()),
        Step::Busy => Err(raw::busy_error()),
        Step::Row(_) => Err(StorageError::UnexpectedRow),
    }
}

unsafe fn rollback(handle: &Handle, stmt: RawStmt) {
    let db = handle.raw();
    unsafe { raw::reset(stmt) };
    if unsafe { raw::is_autocommit(db) } {
        return;
    }
    if let Err(e) = unsafe { raw::exec(db, "ROLLBACK") } {
        warn!(error = %e, "rollback failed");
    }
}
