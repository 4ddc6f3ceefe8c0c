pub mod codec;
pub mod error;
pub mod event;
pub mod ids;
pub mod subscriber;
pub mod value;

pub use error::CoreError;
pub use event::{ChangeEvent, ChangeKind, LogEvent};
pub use ids::*;
pub use subscriber::{DeliveryError, Subscriber};
pub use value::{BoundValue, Row, StorageClass, Value};
