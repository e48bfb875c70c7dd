//! Scheduler subsystem
//!
//! Pluggable scheduling algorithms behind one trait. Each `Scheduler`
//! instance governs a partition of processors; every processor belongs to
//! exactly one instance. The algorithm is selected per instance at
//! configuration time and dispatched through the trait object, never by
//! runtime type inspection.

pub mod affinity;
pub mod bitmap;
pub mod edf;
pub mod fixed_priority;
pub mod node;
pub mod priority;
pub mod smp;

use alloc::sync::Arc;

use crate::percpu::CpuId;
use crate::system::System;
use crate::thread::Thread;

pub use affinity::CpuMask;
pub use node::{NodeState, SchedulerNode};
pub use priority::Priority;

/// Scheduler instance identifier (index into the system's scheduler table)
pub type SchedulerId = usize;

/// EDF representation: deadlines sort below this base; threads without a
/// released job sit in a background band ordered by priority above it.
pub(crate) const EDF_BACKGROUND_BASE: u64 = 1 << 60;

/// A scheduling algorithm instance.
///
/// All methods are race-safe under the instance's own lock and never block.
/// Scheduler methods mutate ready structures and node state only; thread
/// lifecycle flags belong to the callers.
pub trait Scheduler: Send + Sync {
    fn id(&self) -> SchedulerId;

    fn name(&self) -> &str;

    /// Processors this instance governs
    fn cpus(&self) -> &[CpuId];

    /// Register a thread's node with this scheduler (thread still dormant)
    fn attach(&self, sys: &System, thread: &Arc<Thread>);

    /// Remove a thread for good; its node becomes dormant
    fn detach(&self, sys: &System, thread: &Arc<Thread>);

    /// Remove a thread from the ready structures without deciding its fate,
    /// used while handing it to another scheduler
    fn withdraw(&self, sys: &System, thread: &Arc<Thread>);

    /// Take the thread out of the ready set; re-derives the heir of any
    /// processor it was scheduled on
    fn block(&self, sys: &System, thread: &Arc<Thread>);

    /// Reinsert the thread; preempts a less eligible scheduled thread
    fn unblock(&self, sys: &System, thread: &Arc<Thread>);

    /// Rotate the thread behind its equal-eligibility peers
    fn yield_now(&self, sys: &System, thread: &Arc<Thread>);

    /// The thread's effective priority changed; reposition it and re-derive
    /// heirs immediately if another thread became more eligible
    fn set_priority(&self, sys: &System, thread: &Arc<Thread>, priority: Priority);

    /// Declare a job deadline (EDF variants; others ignore it)
    fn release_job(&self, _sys: &System, _thread: &Arc<Thread>, _deadline: u64) {}

    /// Withdraw a declared deadline
    fn cancel_job(&self, _sys: &System, _thread: &Arc<Thread>) {}

    /// Try to place a thread that cannot run where it is (SMP only).
    ///
    /// Returns true when the thread was scheduled on one of this instance's
    /// processors. The protocol is asynchronous: failure leaves the thread
    /// pending for a bounded retry, so two processors can never deadlock
    /// handing threads to each other.
    fn ask_for_help(&self, _sys: &System, _thread: &Arc<Thread>) -> bool {
        false
    }

    /// The thread's affinity changed; re-place it if it is in the ready set
    fn reconsider(&self, sys: &System, thread: &Arc<Thread>) {
        let state = thread.home_node().state();
        if matches!(state, NodeState::Ready | NodeState::Scheduled) {
            self.block(sys, thread);
            self.unblock(sys, thread);
        }
    }
}
