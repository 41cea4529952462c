//! Hot event store backends.

mod in_memory;
mod noop;
mod redis;

pub use in_memory::InMemoryHotEventStore;
pub use noop::NoopHotEventStore;
pub use self::redis::{RedisEventRecord, RedisHotEventStore};
