//! Syncpoint fences and wait timeouts.
//!
//! A syncpoint is a 32-bit counter that only moves forward and wraps at 2^32. Whether a counter
//! has reached a threshold is decided on the signed distance between the two, so a threshold
//! reserved just before the wrap is still met by a value just after it.

use std::time::{Duration, Instant};

/// `true` once `value` has reached `threshold`, modulo 2^32.
#[inline]
pub const fn syncpoint_reached(value: u32, threshold: u32) -> bool {
    (value.wrapping_sub(threshold) as i32) >= 0
}

/// Completion marker for a flushed job: the job is done once `syncpoint` reaches `value`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fence {
    pub syncpoint: u32,
    pub value: u32,
}

impl Fence {
    pub const fn new(syncpoint: u32, value: u32) -> Self {
        Self { syncpoint, value }
    }

    pub const fn is_reached_by(&self, current: u32) -> bool {
        syncpoint_reached(current, self.value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    TimedOut,
}

impl WaitOutcome {
    pub fn is_completed(self) -> bool {
        self == WaitOutcome::Completed
    }
}

/// How long a wait may block. `None` waits forever.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Timeout(Option<Duration>);

impl Timeout {
    /// Check once and return immediately.
    pub const ZERO: Self = Self(Some(Duration::ZERO));
    pub const INFINITE: Self = Self(None);

    /// Raw millisecond value meaning "wait forever".
    pub const INFINITE_MILLIS: u32 = u32::MAX;

    pub const fn from_duration(duration: Duration) -> Self {
        Self(Some(duration))
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(Some(Duration::from_millis(millis)))
    }

    /// Interprets a raw millisecond count, with [`Timeout::INFINITE_MILLIS`] meaning forever.
    pub const fn from_raw_millis(millis: u32) -> Self {
        if millis == Self::INFINITE_MILLIS {
            Self::INFINITE
        } else {
            Self::from_millis(millis as u64)
        }
    }

    pub const fn duration(&self) -> Option<Duration> {
        self.0
    }

    pub const fn is_infinite(&self) -> bool {
        self.0.is_none()
    }

    /// Point in time after which the wait gives up. `None` for infinite timeouts and for
    /// durations too large to represent.
    pub fn deadline(&self, start: Instant) -> Option<Instant> {
        self.0.and_then(|duration| start.checked_add(duration))
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::INFINITE
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self::from_duration(duration)
    }
}
