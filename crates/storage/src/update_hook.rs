//! Per-connection data-change notifications.
//!
//! At most one subscriber per connection. When delivery finds the
//! subscriber unreachable the hook goes inert immediately and is
//! unregistered from the engine before the connection lock is released.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rusqlite::hooks::Action;
use stepgate_core::{ChangeEvent, ChangeKind, ConnectionId, DeliveryError, Subscriber, SubscriberId};
use tracing::{debug, warn};

use crate::connection::{Connection, Handle};
use crate::error::StorageError;

pub(crate) struct UpdateHook {
    subscriber: Subscriber<ChangeEvent>,
    detached: Arc<AtomicBool>,
}

impl UpdateHook {
    pub(crate) fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// Register the same subscriber again, unless it was detached.
    pub(crate) fn restore(self, conn: &rusqlite::Connection, connection: ConnectionId) -> Option<Self> {
        if self.is_detached() {
            return None;
        }
        Some(register(conn, connection, self.subscriber))
    }
}

fn change_kind(action: Action) -> Option<ChangeKind> {
    match action {
        Action::SQLITE_INSERT => Some(ChangeKind::Insert),
        Action::SQLITE_UPDATE => Some(ChangeKind::Update),
        Action::SQLITE_DELETE => Some(ChangeKind::Delete),
        _ => None,
    }
}

/// Install the engine callback that feeds `subscriber`.
pub(crate) fn register(
    conn: &rusqlite::Connection,
    connection: ConnectionId,
    subscriber: Subscriber<ChangeEvent>,
) -> UpdateHook {
    let detached = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&detached);
    let sink = subscriber.clone();

    conn.update_hook(Some(
        move |action: Action, database: &str, table: &str, row_id: i64| {
            if flag.load(Ordering::Acquire) {
                return;
            }
            let Some(kind) = change_kind(action) else {
                return;
            };
            let event = ChangeEvent {
                kind,
                database: database.to_string(),
                table: table.to_string(),
                row_id,
            };
            match sink.deliver(event) {
                Ok(()) => {}
                Err(DeliveryError::Full) => {
                    debug!(connection = %connection, "update subscriber mailbox full, event dropped");
                }
                Err(DeliveryError::Unreachable) => {
                    warn!(
                        connection = %connection,
                        subscriber = %sink.id(),
                        "update subscriber unreachable, detaching hook"
                    );
                    flag.store(true, Ordering::Release);
                }
            }
        },
    ));

    UpdateHook {
        subscriber,
        detached,
    }
}

pub(crate) fn unregister(conn: &rusqlite::Connection) {
    conn.update_hook(None::<fn(Action, &str, &str, i64)>);
}

impl Handle {
    pub(crate) fn reap_update_hook(&mut self, connection: ConnectionId) {
        if self.update_hook.as_ref().is_some_and(UpdateHook::is_detached) {
            unregister(&self.conn);
            if let Some(hook) = self.update_hook.take() {
                debug!(connection = %connection, subscriber = %hook.subscriber.id(), "update hook removed");
            }
        }
    }
}

impl Connection {
    /// Deliver every insert, update and delete on this connection to
    /// `subscriber`, replacing any previous subscriber.
    pub fn set_update_hook(&self, subscriber: Subscriber<ChangeEvent>) -> Result<(), StorageError> {
        let connection = self.id();
        self.with_handle(|handle| {
            let subscriber_id = subscriber.id();
            handle.update_hook = Some(register(&handle.conn, connection, subscriber));
            debug!(connection = %connection, subscriber = %subscriber_id, "update hook set");
            Ok(())
        })
    }

    pub fn clear_update_hook(&self) -> Result<(), StorageError> {
        self.with_handle(|handle| {
            unregister(&handle.conn);
            handle.update_hook = None;
            Ok(())
        })
    }

    /// The current update subscriber, if any. A closed connection has none.
    pub fn update_subscriber(&self) -> Option<SubscriberId> {
        let connection = self.id();
        self.with_handle(|handle| {
            handle.reap_update_hook(connection);
            Ok(handle.update_hook.as_ref().map(|hook| hook.subscriber.id()))
        })
        .ok()
        .flatten()
    }

    pub fn has_update_hook(&self) -> bool {
        self.update_subscriber().is_some()
    }
}
