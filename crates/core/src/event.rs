use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// A row-level data change observed on one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub database: String,
    pub table: String,
    pub row_id: i64,
}

/// A diagnostic message emitted by the engine, process-wide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub code: i32,
    pub message: String,
}

macro_rules! msgpack_codec {
    ($name:ident) => {
        impl $name {
            pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
                rmp_serde::to_vec(self)
            }

            pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
                rmp_serde::from_slice(bytes)
            }
        }
    };
}

msgpack_codec!(ChangeEvent);
msgpack_codec!(LogEvent);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_event_msgpack() {
        let event = ChangeEvent {
            kind: ChangeKind::Update,
            database: "main".into(),
            table: "t".into(),
            row_id: 7,
        };
        let bytes = event.to_msgpack().unwrap();
        assert_eq!(ChangeEvent::from_msgpack(&bytes).unwrap(), event);
    }

    #[test]
    fn truncated_log_event_is_rejected() {
        let event = LogEvent { code: 1, message: "no such table: t".into() };
        let bytes = event.to_msgpack().unwrap();
        assert!(LogEvent::from_msgpack(&bytes[..bytes.len() - 3]).is_err());
    }
}
