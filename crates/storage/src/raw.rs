//! Thin wrappers over the engine's statement-level C interface.
//!
//! Every function here requires that the caller holds the owning
//! connection's lock and that the handles passed in are live.

use std::ffi::{CStr, CString, c_char, c_int, c_uint};
use std::ptr::{self, NonNull};

use rusqlite::ffi;
use stepgate_core::{BoundValue, Row, StorageClass, Value, codec};

use crate::error::StorageError;
use crate::intercept;

pub(crate) type RawDb = *mut ffi::sqlite3;
pub(crate) type RawStmt = NonNull<ffi::sqlite3_stmt>;

const DESERIALIZE_FREEONCLOSE: c_uint = 1;
const DESERIALIZE_RESIZEABLE: c_uint = 2;

/// Extended result codes are enabled on every handle; classification
/// uses the primary code.
pub(crate) fn primary_code(rc: c_int) -> c_int {
    rc & 0xff
}

pub(crate) unsafe fn error_from(db: RawDb, rc: c_int) -> StorageError {
    let message = if primary_code(rc) == ffi::SQLITE_MISUSE {
        "engine was invoked incorrectly".to_string()
    } else {
        unsafe { errmsg(db) }
    };
    StorageError::Sqlite(rusqlite::Error::SqliteFailure(
        ffi::Error::new(rc),
        Some(message),
    ))
}

/// The error reported when a step stays busy after any interception.
pub(crate) fn busy_error() -> StorageError {
    StorageError::Sqlite(rusqlite::Error::SqliteFailure(
        ffi::Error::new(ffi::SQLITE_BUSY),
        Some("database is locked".to_string()),
    ))
}

unsafe fn errmsg(db: RawDb) -> String {
    let message = unsafe { ffi::sqlite3_errmsg(db) };
    if message.is_null() {
        return "no error message available".to_string();
    }
    unsafe { CStr::from_ptr(message) }
        .to_string_lossy()
        .into_owned()
}

/// Compile the first statement in `sql`. Returns `None` when the input
/// holds nothing but whitespace and comments, along with the number of
/// bytes consumed.
pub(crate) unsafe fn prepare(db: RawDb, sql: &str) -> Result<(Option<RawStmt>, usize), StorageError> {
    let len = c_int::try_from(sql.len()).map_err(|_| StorageError::TooLarge("SQL text"))?;
    let head: *const c_char = sql.as_ptr().cast();
    let mut stmt = ptr::null_mut();
    let mut tail: *const c_char = ptr::null();

    let rc = unsafe { ffi::sqlite3_prepare_v2(db, head, len, &mut stmt, &mut tail) };
    if rc != ffi::SQLITE_OK {
        return Err(unsafe { error_from(db, rc) });
    }

    let consumed = if tail.is_null() {
        sql.len()
    } else {
        usize::try_from(unsafe { tail.offset_from(head) }).unwrap_or(sql.len())
    };
    Ok((NonNull::new(stmt), consumed))
}

/// Run every statement in `sql` to completion, discarding rows. Steps go
/// through the busy-retry interceptor.
pub(crate) unsafe fn exec(db: RawDb, sql: &str) -> Result<(), StorageError> {
    let mut rest = sql;
    loop {
        let (stmt, consumed) = unsafe { prepare(db, rest)? };
        let Some(stmt) = stmt else {
            return Ok(());
        };
        rest = rest.get(consumed..).unwrap_or("");

        let result = loop {
            let rc = unsafe { intercept::step(stmt.as_ptr()) };
            match rc {
                ffi::SQLITE_ROW => continue,
                ffi::SQLITE_DONE => break Ok(()),
                _ => break Err(unsafe { error_from(db, rc) }),
            }
        };
        unsafe { ffi::sqlite3_finalize(stmt.as_ptr()) };
        result?;
    }
}

pub(crate) unsafe fn bind_value(stmt: RawStmt, index: c_int, value: BoundValue<'_>) -> c_int {
    let stmt = stmt.as_ptr();
    match value {
        BoundValue::Null => unsafe { ffi::sqlite3_bind_null(stmt, index) },
        BoundValue::Integer(n) => unsafe { ffi::sqlite3_bind_int64(stmt, index, n) },
        BoundValue::Float(f) => unsafe { ffi::sqlite3_bind_double(stmt, index, f) },
        BoundValue::Text(bytes) => {
            let Ok(len) = c_int::try_from(bytes.len()) else {
                return ffi::SQLITE_TOOBIG;
            };
            unsafe {
                ffi::sqlite3_bind_text(stmt, index, bytes.as_ptr().cast(), len, ffi::SQLITE_TRANSIENT())
            }
        }
        BoundValue::Blob(bytes) => {
            let Ok(len) = c_int::try_from(bytes.len()) else {
                return ffi::SQLITE_TOOBIG;
            };
            unsafe {
                ffi::sqlite3_bind_blob(stmt, index, bytes.as_ptr().cast(), len, ffi::SQLITE_TRANSIENT())
            }
        }
    }
}

unsafe fn column_bytes<'a>(ptr: *const u8, len: c_int) -> &'a [u8] {
    match usize::try_from(len) {
        Ok(len) if len > 0 && !ptr.is_null() => unsafe { std::slice::from_raw_parts(ptr, len) },
        _ => &[],
    }
}

unsafe fn read_cell(stmt: *mut ffi::sqlite3_stmt, i: c_int) -> Value {
    let code = unsafe { ffi::sqlite3_column_type(stmt, i) };
    codec::decode_cell(code, |class| match class {
        StorageClass::Null => BoundValue::Null,
        StorageClass::Integer => BoundValue::Integer(unsafe { ffi::sqlite3_column_int64(stmt, i) }),
        StorageClass::Float => BoundValue::Float(unsafe { ffi::sqlite3_column_double(stmt, i) }),
        StorageClass::Text => unsafe {
            let text = ffi::sqlite3_column_text(stmt, i);
            BoundValue::Text(column_bytes(text, ffi::sqlite3_column_bytes(stmt, i)))
        },
        StorageClass::Blob => unsafe {
            let blob = ffi::sqlite3_column_blob(stmt, i);
            BoundValue::Blob(column_bytes(blob.cast(), ffi::sqlite3_column_bytes(stmt, i)))
        },
    })
}

/// Materialise the current row. Only valid right after a step returned
/// `SQLITE_ROW`.
pub(crate) unsafe fn read_row(stmt: RawStmt) -> Row {
    let stmt = stmt.as_ptr();
    let count = unsafe { ffi::sqlite3_column_count(stmt) };
    (0..count).map(|i| unsafe { read_cell(stmt, i) }).collect()
}

pub(crate) unsafe fn column_names(stmt: RawStmt) -> Result<Vec<String>, StorageError> {
    let stmt = stmt.as_ptr();
    let count = unsafe { ffi::sqlite3_column_count(stmt) };
    let mut names = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
    for i in 0..count {
        let name = unsafe { ffi::sqlite3_column_name(stmt, i) };
        if name.is_null() {
            return Err(StorageError::OutOfMemory);
        }
        names.push(unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned());
    }
    Ok(names)
}

pub(crate) unsafe fn parameter_count(stmt: RawStmt) -> usize {
    let count = unsafe { ffi::sqlite3_bind_parameter_count(stmt.as_ptr()) };
    usize::try_from(count).unwrap_or(0)
}

/// Rewind to the start. The return code echoes the last step's error and
/// is not a failure of the reset itself.
pub(crate) unsafe fn reset(stmt: RawStmt) {
    unsafe { ffi::sqlite3_reset(stmt.as_ptr()) };
}

pub(crate) unsafe fn finalize(stmt: RawStmt) {
    unsafe { ffi::sqlite3_finalize(stmt.as_ptr()) };
}

pub(crate) unsafe fn is_autocommit(db: RawDb) -> bool {
    unsafe { ffi::sqlite3_get_autocommit(db) != 0 }
}

/// Copy the named database into a byte buffer. A database with no pages
/// serialises to an empty buffer; an unknown schema is an error.
pub(crate) unsafe fn serialize(db: RawDb, name: &str) -> Result<Vec<u8>, StorageError> {
    let schema = CString::new(name).map_err(rusqlite::Error::from)?;
    if unsafe { ffi::sqlite3_db_filename(db, schema.as_ptr()) }.is_null() {
        return Err(StorageError::Sqlite(rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_ERROR),
            Some(format!("unknown database {name}")),
        )));
    }

    // The engine records the image size before allocating the copy.
    let mut size: ffi::sqlite3_int64 = -1;
    let data = unsafe { ffi::sqlite3_serialize(db, schema.as_ptr(), &mut size, 0) };
    if data.is_null() {
        return match size {
            0 => Ok(Vec::new()),
            n if n > 0 => Err(StorageError::OutOfMemory),
            _ => Err(unsafe { error_from(db, ffi::SQLITE_ERROR) }),
        };
    }
    let len = usize::try_from(size).unwrap_or(0);
    let bytes = unsafe { std::slice::from_raw_parts(data, len) }.to_vec();
    unsafe { ffi::sqlite3_free(data.cast()) };
    Ok(bytes)
}

/// Replace the named database with a copy of `bytes`. The engine owns
/// the copy and frees it on close or on failure.
pub(crate) unsafe fn deserialize(db: RawDb, schema: &str, bytes: &[u8]) -> Result<(), StorageError> {
    let schema = CString::new(schema).map_err(rusqlite::Error::from)?;
    let size = ffi::sqlite3_int64::try_from(bytes.len())
        .map_err(|_| StorageError::TooLarge("database image"))?;

    let buffer: *mut u8 = unsafe { ffi::sqlite3_malloc64(bytes.len() as ffi::sqlite3_uint64) }.cast();
    if buffer.is_null() && !bytes.is_empty() {
        return Err(StorageError::OutOfMemory);
    }
    if !bytes.is_empty() {
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), buffer, bytes.len()) };
    }

    let rc = unsafe {
        ffi::sqlite3_deserialize(
            db,
            schema.as_ptr(),
            buffer,
            size,
            size,
            DESERIALIZE_FREEONCLOSE | DESERIALIZE_RESIZEABLE,
        )
    };
    if rc != ffi::SQLITE_OK {
        return Err(unsafe { error_from(db, rc) });
    }
    Ok(())
}
