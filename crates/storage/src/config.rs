use std::time::Duration;

use rusqlite::OpenFlags;
use serde::{Deserialize, Serialize};

/// Engine-level busy wait applied to every handle before any backend
/// backoff policy engages.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
    #[default]
    ReadWriteCreate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub mode: OpenMode,
    /// Interpret the path as a `file:` URI.
    pub uri: bool,
    pub busy_timeout_ms: u64,
    pub load_extensions: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            mode: OpenMode::default(),
            uri: false,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            load_extensions: false,
        }
    }
}

impl ConnectionConfig {
    pub fn read_only() -> Self {
        Self {
            mode: OpenMode::ReadOnly,
            ..Self::default()
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// The engine's own mutex is disabled: callers are serialised by the
    /// connection lock instead.
    pub fn open_flags(&self) -> OpenFlags {
        let mut flags = match self.mode {
            OpenMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
            OpenMode::ReadWrite => OpenFlags::SQLITE_OPEN_READ_WRITE,
            OpenMode::ReadWriteCreate => {
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
        };
        flags |= OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.uri {
            flags |= OpenFlags::SQLITE_OPEN_URI;
        }
        flags
    }
}
