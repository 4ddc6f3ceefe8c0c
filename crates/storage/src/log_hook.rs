//! Process-wide engine diagnostics forwarding.
//!
//! The engine has a single global log callback, so there is one
//! subscriber for the whole process. Replacing it affects every
//! connection.

use std::ffi::c_int;

use parking_lot::Mutex;
use stepgate_core::{DeliveryError, LogEvent, Subscriber, SubscriberId};
use tracing::{debug, warn};

use crate::error::StorageError;

struct LogHookState {
    subscriber: Option<Subscriber<LogEvent>>,
    /// Whether the engine currently points at `forward_log`.
    registered: bool,
}

struct LogHook {
    state: Mutex<LogHookState>,
}

static LOG_HOOK: LogHook = LogHook::new();

impl LogHook {
    const fn new() -> Self {
        Self {
            state: parking_lot::const_mutex(LogHookState {
                subscriber: None,
                registered: false,
            }),
        }
    }

    /// Swap the subscriber. The engine callback is registered on first use
    /// and left in place afterwards; with no subscriber it does nothing.
    fn replace(
        &self,
        subscriber: Option<Subscriber<LogEvent>>,
    ) -> Result<Option<SubscriberId>, StorageError> {
        let mut state = self.state.lock();
        if subscriber.is_some() && !state.registered {
            unsafe { rusqlite::trace::config_log(Some(forward_log))? };
            state.registered = true;
        }
        let previous = std::mem::replace(&mut state.subscriber, subscriber);
        Ok(previous.map(|s| s.id()))
    }

    fn deliver_or_clear(&self, event: LogEvent) {
        let mut state = self.state.lock();
        let Some(subscriber) = &state.subscriber else {
            return;
        };
        match subscriber.deliver(event) {
            Ok(()) => {}
            Err(DeliveryError::Full) => {}
            Err(DeliveryError::Unreachable) => {
                warn!(subscriber = %subscriber.id(), "log subscriber unreachable, clearing log hook");
                // The engine callback stays registered but is inert with no
                // subscriber. Only `teardown` unregisters it.
                state.subscriber = None;
            }
        }
    }

    fn subscriber(&self) -> Option<SubscriberId> {
        self.state.lock().subscriber.as_ref().map(|s| s.id())
    }

    fn teardown(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        if state.registered {
            unsafe { rusqlite::trace::config_log(None)? };
            state.registered = false;
        }
        state.subscriber = None;
        Ok(())
    }
}

// Runs on whichever thread the engine logs from; must not call back into
// the engine.
fn forward_log(code: c_int, message: &str) {
    LOG_HOOK.deliver_or_clear(LogEvent {
        code,
        message: message.to_string(),
    });
}

/// Route engine diagnostics to `subscriber`, replacing any previous one.
pub fn set_log_hook(subscriber: Subscriber<LogEvent>) -> Result<(), StorageError> {
    let id = subscriber.id();
    let previous = LOG_HOOK.replace(Some(subscriber))?;
    debug!(subscriber = %id, ?previous, "log hook set");
    Ok(())
}

pub fn clear_log_hook() -> Result<(), StorageError> {
    LOG_HOOK.replace(None)?;
    Ok(())
}

pub fn log_subscriber() -> Option<SubscriberId> {
    LOG_HOOK.subscriber()
}

pub fn has_log_hook() -> bool {
    log_subscriber().is_some()
}

/// Unregister the engine callback and drop the subscriber. Call when no
/// other thread is using the engine, e.g. on shutdown.
pub fn teardown() -> Result<(), StorageError> {
    LOG_HOOK.teardown()
}
