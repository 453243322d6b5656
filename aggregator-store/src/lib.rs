pub mod error;
pub mod event;
pub mod metrics;
pub mod queue;
pub mod retry;
pub mod store;

pub use error::{StoreError, ValidationError};
pub use event::{Event, EventRecord, EventsField, PublishRequest, RawEvent};
pub use queue::{bounded, QueueReceiver, QueueSender, QUEUE_CAPACITY};
pub use store::{rates, now_iso8601, PersistenceLayer, PoolConfig, Stats};
