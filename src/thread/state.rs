//! Thread state machines
//!
//! Two independent machines live here:
//! - the lifecycle state set (a thread can be blocked for several reasons at
//!   once, e.g. waiting on a queue and on a watchdog),
//! - the wait-handshake state used to make block/release/timeout race-free.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Lifecycle state set. Empty means ready to run.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StateSet: u32 {
        /// Created but not yet started, or deleted; never schedulable
        const DORMANT           = 1 << 0;
        /// Explicitly suspended
        const SUSPENDED         = 1 << 1;
        /// Blocked in a thread queue
        const WAITING_FOR_QUEUE = 1 << 2;
        /// Blocked on a watchdog
        const WAITING_FOR_TIME  = 1 << 3;
        /// Mid-migration between schedulers
        const TRANSIENT         = 1 << 4;
        /// Being deleted
        const TERMINATING       = 1 << 5;
    }
}

impl StateSet {
    /// Ready means no blocking condition at all
    pub fn is_ready(self) -> bool {
        self.is_empty()
    }
}

/// Atomic lifecycle state set
pub struct AtomicStateSet {
    bits: AtomicU32,
}

impl AtomicStateSet {
    pub const fn new(state: StateSet) -> Self {
        Self {
            bits: AtomicU32::new(state.bits()),
        }
    }

    pub fn load(&self) -> StateSet {
        StateSet::from_bits_truncate(self.bits.load(Ordering::Acquire))
    }

    /// Set the given flags, returning the previous state
    pub fn insert(&self, flags: StateSet) -> StateSet {
        StateSet::from_bits_truncate(self.bits.fetch_or(flags.bits(), Ordering::AcqRel))
    }

    /// Clear the given flags, returning the previous state
    pub fn remove(&self, flags: StateSet) -> StateSet {
        StateSet::from_bits_truncate(self.bits.fetch_and(!flags.bits(), Ordering::AcqRel))
    }
}

/// Wait-handshake state.
///
/// The blocking thread publishes `IntendToBlock` before giving up its outer
/// lock; the unblocking side (release, timeout, flush) flips the marker to a
/// terminal outcome exactly once. Whoever flips first wins; the loser
/// observes a terminal state and performs no further action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WaitState {
    /// Not waiting
    Ready = 0,
    /// Published intent; not yet fully blocked
    IntendToBlock = 1,
    /// Fully blocked in a thread queue
    Blocked = 2,
    /// Woken by an explicit release
    Satisfied = 3,
    /// Woken by watchdog expiry
    TimedOut = 4,
    /// Woken because the object was flushed or deleted
    Flushed = 5,
}

impl WaitState {
    fn from_u32(value: u32) -> WaitState {
        match value {
            0 => Self::Ready,
            1 => Self::IntendToBlock,
            2 => Self::Blocked,
            3 => Self::Satisfied,
            4 => Self::TimedOut,
            5 => Self::Flushed,
            _ => unreachable!(),
        }
    }

    /// Terminal outcomes end exactly one wait
    pub fn is_outcome(self) -> bool {
        matches!(self, Self::Satisfied | Self::TimedOut | Self::Flushed)
    }
}

impl fmt::Display for WaitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "Ready",
            Self::IntendToBlock => "IntendToBlock",
            Self::Blocked => "Blocked",
            Self::Satisfied => "Satisfied",
            Self::TimedOut => "TimedOut",
            Self::Flushed => "Flushed",
        };
        f.write_str(name)
    }
}

/// Atomic wait-handshake state
pub struct AtomicWaitState {
    state: AtomicU32,
}

impl AtomicWaitState {
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(WaitState::Ready as u32),
        }
    }

    pub fn load(&self) -> WaitState {
        WaitState::from_u32(self.state.load(Ordering::Acquire))
    }

    pub fn store(&self, state: WaitState) {
        self.state.store(state as u32, Ordering::Release);
    }

    /// Compare-and-exchange; on failure returns the observed state
    pub fn compare_exchange(
        &self,
        current: WaitState,
        new: WaitState,
    ) -> Result<WaitState, WaitState> {
        self.state
            .compare_exchange(
                current as u32,
                new as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(WaitState::from_u32)
            .map_err(WaitState::from_u32)
    }

    /// Try to claim the wait with a terminal outcome.
    ///
    /// Returns `Some(previous)` if this caller won the race, `None` if the
    /// wait was already decided. `previous` tells the winner whether a
    /// scheduler unblock is owed (`Blocked`) or the blocker will discover
    /// the outcome on its own (`IntendToBlock`).
    pub fn claim(&self, outcome: WaitState) -> Option<WaitState> {
        debug_assert!(outcome.is_outcome());
        match self.compare_exchange(WaitState::IntendToBlock, outcome) {
            Ok(prev) => Some(prev),
            Err(_) => self.compare_exchange(WaitState::Blocked, outcome).ok(),
        }
    }
}
