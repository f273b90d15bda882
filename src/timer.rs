//! A generic `(value, deadline)` timer pair (spec §4.3 "Timers").
//!
//! `now` is always supplied by the caller (spec §5: no implicit I/O, no
//! internal clock), so a timer is just an `Option<Timed<T>>` that the caller
//! compares against its own monotonic instant.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timed<T> {
    pub value: T,
    pub deadline: Instant,
}

impl<T> Timed<T> {
    pub fn new(value: T, now: Instant, after: Duration) -> Self {
        Timed {
            value,
            deadline: now + after,
        }
    }

    /// Has this timer's deadline passed?
    pub fn expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Replace the deadline, keeping the value.
    pub fn reset(&mut self, now: Instant, after: Duration) {
        self.deadline = now + after;
    }

    pub fn with_value(self, value: T) -> Timed<T> {
        Timed {
            value,
            deadline: self.deadline,
        }
    }
}

/// Arms a timer slot, replacing whatever was there.
pub fn arm<T>(value: T, now: Instant, after: Duration) -> Option<Timed<T>> {
    Some(Timed::new(value, now, after))
}

/// Clears a timer slot.
pub fn cancel<T>(slot: &mut Option<Timed<T>>) {
    *slot = None;
}

/// True iff the slot holds a timer and it has expired.
pub fn is_expired<T>(slot: &Option<Timed<T>>, now: Instant) -> bool {
    slot.as_ref().map_or(false, |t| t.expired(now))
}
