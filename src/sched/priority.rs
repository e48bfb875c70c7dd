//! Priority space
//!
//! Dense integer priorities 0..=255, numerically lower = more urgent.
//! Priority 0 is reserved for kernel-internal use and 255 for the
//! per-processor idle threads, which are always ready and serve as the
//! fallback heir when no application thread is.

use core::fmt;

use crate::error::{CoreError, CoreResult};

/// A thread priority. Lower raw value means more urgent.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u8);

impl Priority {
    /// Reserved for kernel-internal use (most urgent)
    pub const KERNEL: Self = Self(0);

    /// Reserved for idle threads (least urgent, always ready)
    pub const IDLE: Self = Self(255);

    /// Lowest raw value an application thread may use
    pub const APP_MIN: u8 = 1;

    /// Highest raw value an application thread may use
    pub const APP_MAX: u8 = 254;

    /// Number of distinct priority levels
    pub const LEVELS: usize = 256;

    /// Validated application priority
    pub fn new(raw: u8) -> CoreResult<Self> {
        if raw < Self::APP_MIN || raw > Self::APP_MAX {
            return Err(CoreError::InvalidPriority { value: raw });
        }
        Ok(Self(raw))
    }

    /// Unchecked constructor for internal use (idle/kernel levels included)
    pub(crate) const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// Raw numeric value
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// True if `self` would preempt `other`
    pub fn is_more_urgent_than(self, other: Self) -> bool {
        self.0 < other.0
    }

    /// The more urgent of the two
    pub fn most_urgent(a: Self, b: Self) -> Self {
        if a.0 <= b.0 {
            a
        } else {
            b
        }
    }
}

impl fmt::Debug for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Priority({})", self.0)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
