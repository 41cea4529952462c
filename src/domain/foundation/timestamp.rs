//! Timestamp value object for immutable points in time.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Last value handed out by [`Timestamp::monotonic_now`], in microseconds.
static LAST_MONOTONIC_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Immutable point in time, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a timestamp that is never earlier than any previous call
    /// in this process.
    ///
    /// Truncated to microseconds so it survives storage backends that do
    /// not keep nanoseconds. Two calls within the same microsecond are
    /// separated by one microsecond.
    pub fn monotonic_now() -> Self {
        let wall = Utc::now().timestamp_micros();
        let mut last = LAST_MONOTONIC_MICROS.load(Ordering::Relaxed);
        loop {
            let next = if wall > last { wall } else { last + 1 };
            match LAST_MONOTONIC_MICROS.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Self::from_unix_micros(next),
                Err(observed) => last = observed,
            }
        }
    }

    /// Creates a timestamp from a DateTime<Utc>.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the inner DateTime.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Checks if this timestamp is before another.
    pub fn is_before(&self, other: &Timestamp) -> bool {
        self.0 < other.0
    }

    /// Checks if this timestamp is after another.
    pub fn is_after(&self, other: &Timestamp) -> bool {
        self.0 > other.0
    }

    /// Creates a new timestamp by subtracting the given number of seconds.
    pub fn minus_secs(&self, secs: u64) -> Self {
        Self(self.0 - Duration::seconds(secs as i64))
    }

    /// Creates a new timestamp by adding the given number of seconds.
    pub fn plus_secs(&self, secs: u64) -> Self {
        Self(self.0 + Duration::seconds(secs as i64))
    }

    /// Creates a timestamp from Unix microseconds.
    ///
    /// Out-of-range values clamp to the Unix epoch.
    pub fn from_unix_micros(micros: i64) -> Self {
        let secs = micros.div_euclid(1_000_000);
        let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
        Self(Utc.timestamp_opt(secs, nanos).single().unwrap_or_default())
    }

    /// Returns the timestamp as Unix microseconds.
    pub fn as_unix_micros(&self) -> i64 {
        self.0.timestamp_micros()
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_now_creates_current_time() {
        let before = Utc::now();
        let ts = Timestamp::now();
        let after = Utc::now();

        assert!(ts.as_datetime() >= &before);
        assert!(ts.as_datetime() <= &after);
    }

    #[test]
    fn monotonic_now_never_goes_backwards() {
        let mut previous = Timestamp::monotonic_now();
        for _ in 0..1_000 {
            let next = Timestamp::monotonic_now();
            assert!(next.is_after(&previous));
            previous = next;
        }
    }

    #[test]
    fn monotonic_now_is_microsecond_precise() {
        let ts = Timestamp::monotonic_now();
        assert_eq!(Timestamp::from_unix_micros(ts.as_unix_micros()), ts);
    }

    #[test]
    fn minus_secs_moves_backwards() {
        let ts = Timestamp::now();
        let earlier = ts.minus_secs(60);
        assert!(earlier.is_before(&ts));
        assert_eq!(ts.as_unix_micros() - earlier.as_unix_micros(), 60_000_000);
    }

    #[test]
    fn serialization_round_trip() {
        let ts = Timestamp::monotonic_now();
        let json = serde_json::to_string(&ts).unwrap();
        let restored: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(ts, restored);
    }
}
