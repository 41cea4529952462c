//! Wire serialization for room events.

mod json;

pub use json::{EncodedEvent, JsonEventSerializer};
