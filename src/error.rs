//! Core error handling
//!
//! Typed errors for every engine operation, with context fields and
//! recovery classification. Protocol violations are always reported as a
//! distinguishable failure, never silently absorbed; invariant violations
//! take the fatal path instead of attempting repair.

use core::fmt;

use crate::sched::priority::Priority;
use crate::sched::SchedulerId;
use crate::thread::ThreadId;

/// Engine error types with detailed context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    // ═══════════════════════════════════════════════════════════════
    // Configuration Errors
    // ═══════════════════════════════════════════════════════════════

    /// Priority outside the application-visible range
    InvalidPriority { value: u8 },

    /// System configuration rejected (processor/scheduler topology)
    InvalidConfig { reason: &'static str },

    /// Multiprocessor-ceiling lock has no ceiling declared for this scheduler
    NotConfigured { scheduler: SchedulerId },

    // ═══════════════════════════════════════════════════════════════
    // Protocol Violations
    // ═══════════════════════════════════════════════════════════════

    /// Release attempted by a thread that is not the owner
    NotOwner { thread: ThreadId },

    /// Release of a lock that is not locked (double unlock)
    NotLocked,

    /// Self-nesting on a lock that forbids it
    Deadlock { thread: ThreadId },

    /// Caller is already more urgent than the lock's ceiling
    CeilingViolation { priority: Priority, ceiling: Priority },

    // ═══════════════════════════════════════════════════════════════
    // Resource Exhaustion (detected before any queue mutation)
    // ═══════════════════════════════════════════════════════════════

    /// Thread registry is full
    TooManyThreads { max: usize },

    /// No scheduler node available for a migration
    NoNodeAvailable { thread: ThreadId },

    /// Bounded queue has no free slot
    QueueFull { capacity: usize },

    /// Counting semaphore cannot be released further
    Overflow,

    // ═══════════════════════════════════════════════════════════════
    // Operational Outcomes
    // ═══════════════════════════════════════════════════════════════

    /// Resource not available and the caller chose not to wait
    Unsatisfied,

    /// The wait ended by watchdog expiry
    TimedOut,

    /// The wait ended because the object was flushed or deleted
    ObjectDeleted,

    /// Thread id not present in the registry
    ThreadNotFound { thread: ThreadId },

    /// Object still in use (e.g. deleting a thread that holds locks)
    ResourceInUse { thread: ThreadId },

    /// Operation not valid for the thread's current lifecycle state
    InvalidState { thread: ThreadId, reason: &'static str },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPriority { value } => {
                write!(f, "Invalid priority {}", value)
            }
            Self::InvalidConfig { reason } => {
                write!(f, "Invalid configuration: {}", reason)
            }
            Self::NotConfigured { scheduler } => {
                write!(f, "No ceiling declared for scheduler {}", scheduler)
            }
            Self::NotOwner { thread } => {
                write!(f, "Thread {} is not the owner", thread)
            }
            Self::NotLocked => write!(f, "Lock is not locked"),
            Self::Deadlock { thread } => {
                write!(f, "Thread {} would deadlock on itself", thread)
            }
            Self::CeilingViolation { priority, ceiling } => {
                write!(
                    f,
                    "Priority {} violates ceiling {}",
                    priority.raw(),
                    ceiling.raw()
                )
            }
            Self::TooManyThreads { max } => write!(f, "Thread limit reached: {}", max),
            Self::NoNodeAvailable { thread } => {
                write!(f, "No scheduler node available for thread {}", thread)
            }
            Self::QueueFull { capacity } => write!(f, "Queue full: {}", capacity),
            Self::Overflow => write!(f, "Semaphore count overflow"),
            Self::Unsatisfied => write!(f, "Resource unavailable"),
            Self::TimedOut => write!(f, "Timed out"),
            Self::ObjectDeleted => write!(f, "Object was deleted while waiting"),
            Self::ThreadNotFound { thread } => write!(f, "Thread {} not found", thread),
            Self::ResourceInUse { thread } => {
                write!(f, "Resource still in use by thread {}", thread)
            }
            Self::InvalidState { thread, reason } => {
                write!(f, "Thread {} in invalid state: {}", thread, reason)
            }
        }
    }
}

impl CoreError {
    /// Is this a protocol violation (caller bug) rather than a normal outcome?
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            Self::NotOwner { .. }
                | Self::NotLocked
                | Self::Deadlock { .. }
                | Self::CeilingViolation { .. }
        )
    }

    /// Is the error recoverable by the caller?
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvalidConfig { .. })
    }

    /// Error severity (0 = info, 1 = warning, 2 = severe, 3 = critical)
    pub fn severity(&self) -> u8 {
        match self {
            Self::InvalidConfig { .. } => 3,
            Self::TooManyThreads { .. } => 2,
            Self::NoNodeAvailable { .. } => 2,
            Self::QueueFull { .. } => 2,
            _ if self.is_violation() => 1,
            _ => 0,
        }
    }
}

/// Result type for engine operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Halt on a detected core invariant violation.
///
/// Continuing after one risks a masked priority-inversion or double-run bug
/// worse than an orderly stop.
#[macro_export]
macro_rules! core_fatal {
    ($($arg:tt)*) => {
        panic!("[CORE FATAL] {}", format_args!($($arg)*))
    };
}

/// Assert a core invariant, taking the fatal path on failure.
#[macro_export]
macro_rules! core_assert {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            $crate::core_fatal!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violations_are_classified() {
        let err = CoreError::NotOwner { thread: 7 };
        assert!(err.is_violation());
        assert!(err.is_recoverable());
        assert_eq!(err.severity(), 1);
    }

    #[test]
    fn outcomes_are_not_violations() {
        assert!(!CoreError::TimedOut.is_violation());
        assert!(!CoreError::Unsatisfied.is_violation());
        assert_eq!(CoreError::TimedOut.severity(), 0);
    }
}
