pub mod consumer;

pub use consumer::{ConsumerWorker, LIVENESS_DEADLINE};
