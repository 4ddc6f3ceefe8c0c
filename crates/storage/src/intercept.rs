//! Busy-retry interception of the engine's open and step entry points.
//!
//! A backend integration (for example a replacement page store with its
//! own concurrency control) can be installed process-wide. While it is
//! enabled, a step that fails with the busy condition on a connection in
//! autocommit mode is handed to the integration's backoff and retried.
//! Steps issued from inside the backoff itself run uninterpreted.

use std::cell::Cell;
use std::ffi::c_int;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use parking_lot::RwLock;
use rusqlite::{OpenFlags, ffi};
use tracing::{debug, trace};

use crate::error::StorageError;
use crate::raw::{self, RawDb};

/// Hooks supplied by an external storage backend.
pub trait BackendIntegration: Send + Sync {
    /// One-time global setup, run on the first open after installation.
    /// The return value becomes the global enable flag.
    fn bootstrap(&self) -> bool;

    /// Called after every successful open while enabled.
    fn init_connection(&self, _handle: HandleRef<'_>) {}

    /// Called when an autocommit step hit the busy condition. May block
    /// or sleep; the step is retried when this returns.
    fn autocommit_backoff(&self, handle: HandleRef<'_>);
}

/// Borrowed access to a locked engine handle, handed to integration hooks.
#[derive(Clone, Copy)]
pub struct HandleRef<'a> {
    db: RawDb,
    _lock: PhantomData<&'a rusqlite::Connection>,
}

impl HandleRef<'_> {
    pub(crate) fn new(db: RawDb) -> Self {
        Self { db, _lock: PhantomData }
    }

    pub fn is_autocommit(&self) -> bool {
        unsafe { raw::is_autocommit(self.db) }
    }

    /// Run SQL on this handle. Steps issued here are not intercepted.
    pub fn execute(&self, sql: &str) -> Result<(), StorageError> {
        unsafe { raw::exec(self.db, sql) }
    }
}

struct Installed {
    integration: Arc<dyn BackendIntegration>,
    bootstrap: Once,
}

static BACKEND: RwLock<Option<Arc<Installed>>> = parking_lot::const_rwlock(None);
static ENABLED: AtomicBool = AtomicBool::new(false);

pub fn install(integration: Arc<dyn BackendIntegration>) {
    debug!("installing backend integration");
    *BACKEND.write() = Some(Arc::new(Installed {
        integration,
        bootstrap: Once::new(),
    }));
    ENABLED.store(false, Ordering::SeqCst);
}

pub fn uninstall() {
    debug!("removing backend integration");
    *BACKEND.write() = None;
    ENABLED.store(false, Ordering::SeqCst);
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::SeqCst)
}

fn installed() -> Option<Arc<Installed>> {
    BACKEND.read().clone()
}

/// Open a handle, bootstrapping any installed integration first.
pub(crate) fn open(path: &str, flags: OpenFlags) -> Result<rusqlite::Connection, StorageError> {
    let backend = installed();
    if let Some(backend) = &backend {
        backend.bootstrap.call_once(|| {
            let enabled = backend.integration.bootstrap();
            debug!(enabled, "backend integration bootstrapped");
            ENABLED.store(enabled, Ordering::SeqCst);
        });
    }

    let conn = rusqlite::Connection::open_with_flags(path, flags)?;

    if let Some(backend) = backend {
        if is_enabled() {
            let db = unsafe { conn.handle() };
            backend.integration.init_connection(HandleRef::new(db));
        }
    }
    Ok(conn)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepState {
    Idle,
    InProgress,
}

thread_local! {
    static STEP_STATE: Cell<StepState> = const { Cell::new(StepState::Idle) };
}

/// Marks this thread as inside an intercepted step until dropped.
struct StepGuard;

impl StepGuard {
    fn enter() -> Option<Self> {
        STEP_STATE.with(|state| match state.get() {
            StepState::InProgress => None,
            StepState::Idle => {
                state.set(StepState::InProgress);
                Some(StepGuard)
            }
        })
    }
}

impl Drop for StepGuard {
    fn drop(&mut self) {
        STEP_STATE.with(|state| state.set(StepState::Idle));
    }
}

/// Execute one step of `stmt`.
///
/// Nested calls on the same thread (from inside a backoff) go straight to
/// the engine. The retry loop is bounded only by the integration's own
/// backoff behaviour.
pub(crate) unsafe fn step(stmt: *mut ffi::sqlite3_stmt) -> c_int {
    let Some(_guard) = StepGuard::enter() else {
        return unsafe { ffi::sqlite3_step(stmt) };
    };

    let db = unsafe { ffi::sqlite3_db_handle(stmt) };
    loop {
        let autocommit = unsafe { raw::is_autocommit(db) };
        let rc = unsafe { ffi::sqlite3_step(stmt) };
        if raw::primary_code(rc) != ffi::SQLITE_BUSY || !autocommit || !is_enabled() {
            return rc;
        }
        let Some(backend) = installed() else {
            return rc;
        };
        trace!(rc, "busy in autocommit, backing off");
        backend.integration.autocommit_backoff(HandleRef::new(db));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_step_guard_is_refused() {
        let outer = StepGuard::enter();
        assert!(outer.is_some());
        assert!(StepGuard::enter().is_none());
        drop(outer);
        assert!(StepGuard::enter().is_some());
    }

    #[test]
    fn step_state_is_per_thread() -> Result<(), Box<dyn std::error::Error>> {
        let _outer = StepGuard::enter();
        let other = std::thread::spawn(|| StepGuard::enter().is_some())
            .join()
            .map_err(|_| "thread panicked")?;
        assert!(other);
        Ok(())
    }
}
