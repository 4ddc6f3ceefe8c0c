use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unsupported value type: {0:?}")]
    UnsupportedType(Value),
}
