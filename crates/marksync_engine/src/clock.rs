//! Skew-tolerant monotonic timestamps for local log entries.
//!
//! Wall clocks jump backwards (NTP corrections, manual changes). Entries of
//! one device must still be strictly ordered, so every timestamp is
//! `max(last + 1, wall)`.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current wall clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

type WallSource = Box<dyn Fn() -> i64 + Send + Sync>;

/// Monotonic per-device timestamp generator.
pub struct LocalClock {
    last: Mutex<i64>,
    wall: WallSource,
}

impl LocalClock {
    /// Creates a clock over the system time that never returns a value at
    /// or below `last`.
    pub fn new(last: i64) -> Self {
        Self::with_source(last, now_millis)
    }

    /// Creates a clock over a custom wall time source.
    pub fn with_source(last: i64, wall: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        Self {
            last: Mutex::new(last),
            wall: Box::new(wall),
        }
    }

    /// Returns the next timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ClockOverflow`] once the counter reaches
    /// `i64::MAX`; the counter is left untouched.
    pub fn next(&self) -> SyncResult<i64> {
        let mut last = self.last.lock();
        let floor = last.checked_add(1).ok_or(SyncError::ClockOverflow)?;
        let next = floor.max((self.wall)());
        *last = next;
        Ok(next)
    }

    /// Moves the counter forward to at least `timestamp`.
    pub fn observe(&self, timestamp: i64) {
        let mut last = self.last.lock();
        if timestamp > *last {
            *last = timestamp;
        }
    }

    /// Returns the last timestamp handed out (or observed).
    pub fn last(&self) -> i64 {
        *self.last.lock()
    }
}

impl fmt::Debug for LocalClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalClock").field("last", &self.last()).finish()
    }
}
