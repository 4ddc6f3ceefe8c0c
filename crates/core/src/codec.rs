//! Mapping between caller values and the engine's storage classes.

use crate::error::CoreError;
use crate::value::{BoundValue, StorageClass, Value};

/// Convert a caller value into its storage form.
///
/// Integers bind as INTEGER, floats as FLOAT, `Null` as NULL, text and
/// untagged binary as TEXT, tagged blobs as BLOB. Anything else is
/// rejected with the offending value.
pub fn encode(value: &Value) -> Result<BoundValue<'_>, CoreError> {
    match value {
        Value::Integer(n) => Ok(BoundValue::Integer(*n)),
        Value::Float(f) => Ok(BoundValue::Float(*f)),
        Value::Null => Ok(BoundValue::Null),
        Value::Text(s) => Ok(BoundValue::Text(s.as_bytes())),
        Value::Bytes(b) => Ok(BoundValue::Text(b)),
        Value::Blob(b) => Ok(BoundValue::Blob(b)),
        Value::Boolean(_) | Value::List(_) => Err(CoreError::UnsupportedType(value.clone())),
    }
}

/// Convert a cell read from the engine into a caller value.
pub fn decode(storage: BoundValue<'_>) -> Value {
    match storage {
        BoundValue::Null => Value::Null,
        BoundValue::Integer(n) => Value::Integer(n),
        BoundValue::Float(f) => Value::Float(f),
        BoundValue::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => Value::Text(s.to_string()),
            Err(_) => Value::Bytes(bytes.to_vec()),
        },
        BoundValue::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

/// Decode a cell given the engine's raw type code. `read` is only called
/// for recognised storage classes; an unknown code decodes to `Null`.
pub fn decode_cell<'a, F>(code: i32, read: F) -> Value
where
    F: FnOnce(StorageClass) -> BoundValue<'a>,
{
    match StorageClass::from_code(code) {
        Some(class) => decode(read(class)),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_kinds_roundtrip() {
        let values = vec![
            Value::Integer(i64::MIN),
            Value::Integer(42),
            Value::Float(3.5),
            Value::Text("héllo".into()),
            Value::Blob(vec![0, 159, 146, 150]),
            Value::Null,
        ];
        for value in values {
            let bound = encode(&value).unwrap();
            assert_eq!(decode(bound), value, "roundtrip of {value:?}");
        }
    }

    #[test]
    fn untagged_bytes_bind_as_text() {
        let value = Value::Bytes(b"abc".to_vec());
        let bound = encode(&value).unwrap();
        assert_eq!(bound.storage_class(), StorageClass::Text);
        assert_eq!(decode(bound), Value::Text("abc".into()));
    }

    #[test]
    fn invalid_utf8_text_decodes_to_bytes() {
        let raw = [0xff, 0xfe];
        assert_eq!(decode(BoundValue::Text(&raw)), Value::Bytes(raw.to_vec()));
    }

    #[test]
    fn unsupported_kinds_are_rejected() {
        for value in [Value::Boolean(true), Value::List(vec![Value::Integer(1)])] {
            match encode(&value) {
                Err(CoreError::UnsupportedType(rejected)) => assert_eq!(rejected, value),
                other => panic!("expected UnsupportedType, got {other:?}"),
            }
        }
    }

    #[test]
    fn unknown_storage_code_decodes_to_null() {
        let value = decode_cell(42, |_| panic!("reader must not run for unknown codes"));
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn decode_cell_passes_class_to_reader() {
        let value = decode_cell(StorageClass::Float.code(), |class| {
            assert_eq!(class, StorageClass::Float);
            BoundValue::Float(1.25)
        });
        assert_eq!(value, Value::Float(1.25));
    }
}
