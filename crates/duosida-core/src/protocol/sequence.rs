//! Request sequence numbering.
//!
//! Every request after the handshake carries a sequence number in field 101.
//! The charger does not echo it back, but it rejects nothing as long as the
//! numbers keep increasing, so each session owns one counter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Sequence number of the first request after the handshake.
///
/// Captured sessions start at 2 and the handshake consumes one number.
pub const FIRST_REQUEST_SEQUENCE: u64 = 3;

/// A thread-safe, monotonically increasing counter for request sequence numbers.
///
/// # Examples
///
/// ```rust
/// use duosida_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::starting_at(3);
/// assert_eq!(counter.next(), 3);
/// assert_eq!(counter.next(), 4);
/// ```
#[derive(Debug)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    /// Creates a counter whose first [`next`](Self::next) returns [`FIRST_REQUEST_SEQUENCE`].
    pub fn new() -> Self {
        Self::starting_at(FIRST_REQUEST_SEQUENCE)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            inner: AtomicU64::new(first),
        }
    }

    /// Returns the next sequence number and advances the counter.
    ///
    /// Wraps from `u64::MAX` to 0 without panicking.
    pub fn next(&self) -> u64 {
        // Relaxed: the value orders requests, it does not publish memory.
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// The number the next call to [`next`](Self::next) will return.
    pub fn peek(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
