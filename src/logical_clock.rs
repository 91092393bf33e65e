//! Logical clock for trace records
//!
//! Last-use timestamps must be comparable with the positions of records in
//! the log, not with wall-clock time. Every sink owns a `LogicalClock` and
//! ticks it once per appended record, so the time of an event is simply the
//! index of the next record.
//!
//! ```text
//! record #0  DECLARE ...     clock: 0 → 1
//! record #1  PUTFIELD ...    clock: 1 → 2
//!            getField(o)     last_use[o] = now() = 2
//! record #2  WRITE ...       clock: 2 → 3
//! ```
//!
//! # Example
//!
//! ```
//! use heaptrace::logical_clock::LogicalClock;
//!
//! let clock = LogicalClock::new();
//! let t1 = clock.tick();
//! let t2 = clock.tick();
//! assert!(t1 < t2);
//! assert_eq!(clock.now(), 2);
//! ```

use crate::value::LogicalTime;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing record counter
#[derive(Debug)]
pub struct LogicalClock {
    counter: AtomicU64,
}

impl LogicalClock {
    /// Create a clock starting at 0
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Advance the clock for one appended record.
    ///
    /// Returns the time stamped on that record.
    pub fn tick(&self) -> LogicalTime {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Current time without advancing
    pub fn now(&self) -> LogicalTime {
        self.counter.load(Ordering::SeqCst)
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new()
    }
}
