use std::ffi::c_int;
use std::sync::Arc;

use rusqlite::ffi;
use stepgate_core::{Row, StatementId, Value, codec};
use tracing::{debug, trace, warn};

use crate::connection::{Connection, Handle};
use crate::error::StorageError;
use crate::intercept;
use crate::raw::{self, RawStmt};

/// Outcome of a single step.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Row(Row),
    Done,
    /// The statement was reset and may be stepped again.
    Busy,
}

/// Outcome of a batched step.
#[derive(Debug, Clone, PartialEq)]
pub enum MultiStep {
    /// The statement completed; these are the remaining rows.
    Done(Vec<Row>),
    /// The batch limit was reached; more rows may follow.
    Rows(Vec<Row>),
    /// The batch was abandoned and the statement reset.
    Busy,
}

struct Prepared {
    raw: RawStmt,
    connection: Arc<Connection>,
}

/// A compiled statement bound to the connection it was prepared on.
pub struct Statement {
    id: StatementId,
    sql: String,
    parameter_count: usize,
    inner: Option<Prepared>,
}

// The raw statement is only touched while the owning connection's lock is
// held, and finalisation requires `&mut self`.
unsafe impl Send for Statement {}
unsafe impl Sync for Statement {}

impl Statement {
    /// Compile the first statement in `sql`. The statement takes its own
    /// reference to `connection` only once compilation succeeded.
    pub fn prepare(connection: &Arc<Connection>, sql: &str) -> Result<Self, StorageError> {
        let (raw, parameter_count) = connection.with_handle(|handle| {
            let (stmt, _) = unsafe { raw::prepare(handle.raw(), sql)? };
            let stmt = stmt.ok_or(StorageError::EmptyStatement)?;
            Ok((stmt, unsafe { raw::parameter_count(stmt) }))
        })?;

        let id = StatementId::new();
        debug!(connection = %connection.id(), statement = %id, "prepared statement");
        Ok(Self {
            id,
            sql: sql.to_string(),
            parameter_count,
            inner: Some(Prepared {
                raw,
                connection: Arc::clone(connection),
            }),
        })
    }

    pub fn id(&self) -> StatementId {
        self.id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    pub fn is_finalized(&self) -> bool {
        self.inner.is_none()
    }

    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.inner.as_ref().map(|p| &p.connection)
    }

    pub(crate) fn raw(&self) -> Result<RawStmt, StorageError> {
        self.inner
            .as_ref()
            .map(|p| p.raw)
            .ok_or(StorageError::StatementFinalized)
    }

    fn with_stmt<T>(
        &self,
        f: impl FnOnce(&mut Handle, RawStmt) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let prepared = self.inner.as_ref().ok_or(StorageError::StatementFinalized)?;
        prepared
            .connection
            .with_handle(|handle| f(handle, prepared.raw))
    }

    /// Reset the statement and bind `values` to its parameters in order.
    pub fn bind(&self, values: &[Value]) -> Result<(), StorageError> {
        self.raw()?;
        self.check_arity(values)?;
        self.with_stmt(|handle, stmt| unsafe { bind_locked(handle, stmt, values) })
    }

    pub(crate) fn check_arity(&self, values: &[Value]) -> Result<(), StorageError> {
        if values.len() != self.parameter_count {
            return Err(StorageError::ParameterCountMismatch {
                expected: self.parameter_count,
                actual: values.len(),
            });
        }
        Ok(())
    }

    pub fn step(&self) -> Result<Step, StorageError> {
        self.with_stmt(|handle, stmt| unsafe { step_locked(handle, stmt) })
    }

    /// Step up to `max_rows` times under a single lock acquisition.
    pub fn multi_step(&self, max_rows: usize) -> Result<MultiStep, StorageError> {
        self.with_stmt(|handle, stmt| {
            let mut rows = Vec::with_capacity(max_rows.min(256));
            for _ in 0..max_rows {
                match unsafe { step_locked(handle, stmt)? } {
                    Step::Row(row) => rows.push(row),
                    Step::Done => return Ok(MultiStep::Done(rows)),
                    Step::Busy => return Ok(MultiStep::Busy),
                }
            }
            Ok(MultiStep::Rows(rows))
        })
    }

    pub fn columns(&self) -> Result<Vec<String>, StorageError> {
        self.with_stmt(|_, stmt| unsafe { raw::column_names(stmt) })
    }

    /// Rewind to the start. Bound parameters are kept.
    pub fn reset(&self) -> Result<(), StorageError> {
        self.with_stmt(|_, stmt| {
            unsafe { raw::reset(stmt) };
            Ok(())
        })
    }

    /// Release the compiled statement and the connection reference.
    /// Calling this again does nothing.
    pub fn finalize(&mut self) {
        let Some(Prepared { raw, connection }) = self.inner.take() else {
            return;
        };
        let result = connection.with_handle(|_| {
            unsafe { raw::finalize(raw) };
            Ok(())
        });
        match result {
            Ok(()) => debug!(statement = %self.id, "finalized statement"),
            Err(e) => warn!(statement = %self.id, error = %e, "statement outlived its engine handle"),
        }
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("id", &self.id)
            .field("sql", &self.sql)
            .field("finalized", &self.is_finalized())
            .finish()
    }
}

/// Reset `stmt`, then bind each value in order. Stops at the first value
/// that cannot be encoded or that the engine rejects.
pub(crate) unsafe fn bind_locked(
    handle: &Handle,
    stmt: RawStmt,
    values: &[Value],
) -> Result<(), StorageError> {
    unsafe { raw::reset(stmt) };
    for (i, value) in values.iter().enumerate() {
        let bound = codec::encode(value).map_err(|_| StorageError::WrongType {
            index: i,
            value: value.clone(),
        })?;
        let index = c_int::try_from(i + 1).map_err(|_| StorageError::TooLarge("parameter list"))?;
        let rc = unsafe { raw::bind_value(stmt, index, bound) };
        if rc != ffi::SQLITE_OK {
            return Err(unsafe { raw::error_from(handle.raw(), rc) });
        }
    }
    Ok(())
}

/// One intercepted step. Busy and error outcomes reset the statement
/// before returning.
pub(crate) unsafe fn step_locked(handle: &Handle, stmt: RawStmt) -> Result<Step, StorageError> {
    let rc = unsafe { intercept::step(stmt.as_ptr()) };
    trace!(rc, "step");
    match raw::primary_code(rc) {
        ffi::SQLITE_ROW => Ok(Step::Row(unsafe { raw::read_row(stmt) })),
        ffi::SQLITE_DONE => Ok(Step::Done),
        ffi::SQLITE_BUSY => {
            unsafe { raw::reset(stmt) };
            Ok(Step::Busy)
        }
        _ => {
            let err = unsafe { raw::error_from(handle.raw(), rc) };
            unsafe { raw::reset(stmt) };
            Err(err)
        }
    }
}
