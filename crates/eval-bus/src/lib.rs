//! Pub/sub and ephemeral coordination state shared by the Dispatcher,
//! Reconciler, and Worker.
//!
//! Provides a trait-based bus abstraction that allows swapping between a
//! real Redis backend and an in-memory test double.

mod bus;
mod dlq;
mod error;
mod message;
mod redis_bus;
mod test_bus;

pub use bus::{Bus, DLQ_MAX_LEN};
pub use dlq::DlqEntry;
pub use error::BusError;
pub use message::{BusMessage, Subscription};
pub use redis_bus::RedisBus;
pub use test_bus::{InMemoryBus, PublishedMessage};
