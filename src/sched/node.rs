//! Scheduler Node
//!
//! Per-thread, per-scheduler scheduling state: the unit a scheduler actually
//! operates on. A thread normally owns exactly one node; during a migration
//! it transiently owns a source and a destination node until the move is
//! confirmed and the source is retired.

use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::percpu::CpuId;
use crate::sched::SchedulerId;
use crate::thread::ThreadId;

/// Node state tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NodeState {
    /// In the owning scheduler's ready set
    Ready = 0,
    /// Heir or executing on some processor
    Scheduled = 1,
    /// Enqueued in a thread queue or awaiting a timer
    Blocked = 2,
    /// Deleted or not started; terminal
    Dormant = 3,
}

impl NodeState {
    fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Ready,
            1 => Self::Scheduled,
            2 => Self::Blocked,
            _ => Self::Dormant,
        }
    }
}

/// No processor assigned
const CPU_NONE: usize = usize::MAX;

/// Per-thread, per-scheduler state
pub struct SchedulerNode {
    /// Back-reference by id, used only for lookup
    thread: ThreadId,
    /// Owning scheduler
    scheduler: AtomicUsize,
    /// Priority in the owning scheduler's representation (for EDF, the
    /// deadline band key; for fixed-priority, the raw priority)
    priority: AtomicU64,
    /// Bumped on every priority update; detects stale concurrent recomputes
    generation: AtomicU64,
    state: AtomicU32,
    /// Processor this node is scheduled on, if any
    cpu: AtomicUsize,
}

impl SchedulerNode {
    pub fn new(thread: ThreadId, scheduler: SchedulerId, priority: u64) -> Self {
        Self {
            thread,
            scheduler: AtomicUsize::new(scheduler),
            priority: AtomicU64::new(priority),
            generation: AtomicU64::new(0),
            state: AtomicU32::new(NodeState::Dormant as u32),
            cpu: AtomicUsize::new(CPU_NONE),
        }
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn scheduler(&self) -> SchedulerId {
        self.scheduler.load(Ordering::Acquire)
    }

    /// Reassign the owning scheduler (cold migration of a non-ready thread)
    pub(crate) fn set_scheduler(&self, scheduler: SchedulerId) {
        self.scheduler.store(scheduler, Ordering::Release);
    }

    pub fn priority(&self) -> u64 {
        self.priority.load(Ordering::Acquire)
    }

    /// Update the representation priority and bump the generation
    pub fn set_priority(&self, priority: u64) {
        self.priority.store(priority, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn state(&self) -> NodeState {
        NodeState::from_u32(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: NodeState) {
        self.state.store(state as u32, Ordering::Release);
    }

    pub fn cpu(&self) -> Option<CpuId> {
        let cpu = self.cpu.load(Ordering::Acquire);
        if cpu == CPU_NONE {
            None
        } else {
            Some(cpu)
        }
    }

    pub fn set_cpu(&self, cpu: Option<CpuId>) {
        self.cpu.store(cpu.unwrap_or(CPU_NONE), Ordering::Release);
    }
}
