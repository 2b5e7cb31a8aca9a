//! At-least-once work queue connecting the Gateway (producer) to the
//! Worker pool (consumers).
//!
//! Provides a trait-based queue abstraction that allows swapping between a
//! real Redis backend and an in-memory test double.

mod error;
mod queue;
mod redis_queue;
mod test_queue;
mod work_item;

pub use error::BrokerError;
pub use queue::{Reservation, WorkQueue};
pub use redis_queue::RedisBroker;
pub use test_queue::InMemoryBroker;
pub use work_item::WorkItem;
