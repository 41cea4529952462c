//! Durable event archive backends.

mod in_memory;
mod postgres;

pub use in_memory::InMemoryEventArchive;
pub use postgres::PostgresEventArchive;
