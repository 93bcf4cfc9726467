//! Correlation id generators
//!
//! Every outstanding transaction needs a uid that is unique for the life of
//! the process. A bare timestamp collides when two requests land in the same
//! millisecond, so all generators here mix in a counter or randomness.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of correlation ids
pub trait UidGenerator: Send + Sync {
    /// Produce the next uid
    fn next_uid(&self) -> String;
}

/// Monotonic counter with a fixed prefix (`tx-1`, `tx-2`, ...)
pub struct CounterUid {
    prefix: String,
    next: AtomicU64,
}

impl CounterUid {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl Default for CounterUid {
    fn default() -> Self {
        Self::new("tx")
    }
}

impl UidGenerator for CounterUid {
    fn next_uid(&self) -> String {
        format!("{}-{}", self.prefix, self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Random v4 UUIDs
#[derive(Default)]
pub struct UuidUid;

impl UidGenerator for UuidUid {
    fn next_uid(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// RFC 3339 timestamp plus a sequence suffix
///
/// Keeps the timestamp readable in agent logs while staying unique under
/// rapid successive calls.
#[derive(Default)]
pub struct TimestampUid {
    seq: AtomicU64,
}

impl UidGenerator for TimestampUid {
    fn next_uid(&self) -> String {
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        format!("{}#{}", now, self.seq.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn assert_unique(generator: &dyn UidGenerator, n: usize) {
        let uids: HashSet<String> = (0..n).map(|_| generator.next_uid()).collect();
        assert_eq!(uids.len(), n);
    }

    #[test]
    fn test_counter_sequence() {
        let generator = CounterUid::new("req");
        assert_eq!(generator.next_uid(), "req-1");
        assert_eq!(generator.next_uid(), "req-2");
    }

    #[test]
    fn test_rapid_calls_stay_unique() {
        assert_unique(&CounterUid::default(), 1000);
        assert_unique(&UuidUid, 1000);
        assert_unique(&TimestampUid::default(), 1000);
    }

    #[test]
    fn test_timestamp_format() {
        let uid = TimestampUid::default().next_uid();
        let (ts, seq) = uid.split_once('#').unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
        assert_eq!(seq, "0");
    }
}
