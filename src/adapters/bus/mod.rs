//! Event bus backends.

mod in_memory;
mod noop;
mod redis;

pub use in_memory::InMemoryEventBus;
pub use noop::NoopEventBus;
pub use self::redis::{RedisBusConfig, RedisEventBus};
