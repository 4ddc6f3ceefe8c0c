use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use stepgate_storage::{BackendIntegration, HandleRef};
use tracing::debug;

type BackoffAction = Box<dyn FnMut(HandleRef<'_>) + Send>;

/// A backend integration whose behaviour is scripted by the test.
///
/// Backoff runs the scripted action, if any, and otherwise sleeps briefly.
/// Every hook invocation is counted.
pub struct ScriptedBackend {
    enable: bool,
    bootstraps: AtomicUsize,
    inits: AtomicUsize,
    backoffs: AtomicUsize,
    on_backoff: Mutex<Option<BackoffAction>>,
}

impl ScriptedBackend {
    pub fn new(enable: bool) -> Self {
        Self {
            enable,
            bootstraps: AtomicUsize::new(0),
            inits: AtomicUsize::new(0),
            backoffs: AtomicUsize::new(0),
            on_backoff: Mutex::new(None),
        }
    }

    pub fn on_backoff(self, action: impl FnMut(HandleRef<'_>) + Send + 'static) -> Self {
        *self.on_backoff.lock() = Some(Box::new(action));
        self
    }

    pub fn bootstraps(&self) -> usize {
        self.bootstraps.load(Ordering::SeqCst)
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn backoffs(&self) -> usize {
        self.backoffs.load(Ordering::SeqCst)
    }
}

impl BackendIntegration for ScriptedBackend {
    fn bootstrap(&self) -> bool {
        self.bootstraps.fetch_add(1, Ordering::SeqCst);
        self.enable
    }

    fn init_connection(&self, _handle: HandleRef<'_>) {
        self.inits.fetch_add(1, Ordering::SeqCst);
    }

    fn autocommit_backoff(&self, handle: HandleRef<'_>) {
        let n = self.backoffs.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(backoff = n, "scripted backoff");
        match self.on_backoff.lock().as_mut() {
            Some(action) => action(handle),
            None => thread::sleep(Duration::from_millis(1)),
        }
    }
}
