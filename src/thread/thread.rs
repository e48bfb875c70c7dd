//! Thread control block
//!
//! The unit of execution the engine schedules. Ownership is directional: a
//! thread owns its scheduler node set; queues and ready sets reference
//! threads by id only, and every reverse link is a lookup-only reference,
//! never a lifetime holder.

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use spin::Mutex;

use crate::error::{CoreError, CoreResult};
use crate::sched::affinity::CpuMask;
use crate::sched::node::SchedulerNode;
use crate::sched::priority::Priority;
use crate::sched::SchedulerId;
use crate::sync::mutex::MutexShared;
use crate::sync::thread_queue::QueueRef;
use crate::thread::state::{AtomicStateSet, AtomicWaitState, StateSet, WaitState};

/// Thread identifier; ids start at 1
pub type ThreadId = u64;

/// Opaque execution context. The core never interprets it; context
/// save/restore and fresh-context initialization are external capabilities.
#[derive(Debug, Default, Clone, Copy)]
pub struct Context {
    raw: usize,
}

impl Context {
    pub const fn new(raw: usize) -> Self {
        Self { raw }
    }

    pub const fn raw(&self) -> usize {
        self.raw
    }
}

/// Where a blocked thread currently sits
pub(crate) struct WaitLocation {
    pub queue: QueueRef,
    /// Ordering key inside the queue (effective priority, arrival seq)
    pub key: (u8, u64),
}

/// Per-thread wait control: the handshake marker plus everything the
/// unblocking side may need to hand over.
pub struct WaitControl {
    state: AtomicWaitState,
    location: Mutex<Option<WaitLocation>>,
    /// Message parked by a direct hand-off delivery
    payload: Mutex<Option<Vec<u8>>>,
    /// Lock this thread is blocked on, for inheritance propagation
    blocked_on: Mutex<Weak<MutexShared>>,
    /// Watchdog interval requested at enqueue, in ticks; 0 = wait forever.
    /// Read by the external timer subsystem, never counted down here.
    timeout: AtomicU64,
}

impl WaitControl {
    fn new() -> Self {
        Self {
            state: AtomicWaitState::new(),
            location: Mutex::new(None),
            payload: Mutex::new(None),
            blocked_on: Mutex::new(Weak::new()),
            timeout: AtomicU64::new(0),
        }
    }

    pub(crate) fn state(&self) -> &AtomicWaitState {
        &self.state
    }

    pub(crate) fn location(&self) -> &Mutex<Option<WaitLocation>> {
        &self.location
    }

    pub(crate) fn park_payload(&self, payload: Vec<u8>) {
        *self.payload.lock() = Some(payload);
    }

    pub(crate) fn set_blocked_on(&self, mutex: Weak<MutexShared>) {
        *self.blocked_on.lock() = mutex;
    }

    pub(crate) fn blocked_on(&self) -> Option<Arc<MutexShared>> {
        self.blocked_on.lock().upgrade()
    }

    pub(crate) fn set_timeout(&self, ticks: u64) {
        self.timeout.store(ticks, Ordering::Release);
    }

    pub(crate) fn timeout(&self) -> u64 {
        self.timeout.load(Ordering::Acquire)
    }
}

/// A thread's scheduler nodes: the home node, plus a transient destination
/// node while a migration is in flight.
pub(crate) struct NodeSet {
    pub home: Arc<SchedulerNode>,
    pub help: Option<Arc<SchedulerNode>>,
}

/// Thread control block
pub struct Thread {
    id: ThreadId,
    name: String,
    base_priority: AtomicU8,
    current_priority: AtomicU8,
    lifecycle: AtomicStateSet,
    pub(crate) wait: WaitControl,
    pub(crate) nodes: Mutex<NodeSet>,
    /// Owner-tracking locks currently held, for release-time recompute
    pub(crate) held: Mutex<Vec<Arc<MutexShared>>>,
    affinity: AtomicU64,
    context: Mutex<Context>,
}

impl Thread {
    pub(crate) fn new(
        id: ThreadId,
        name: &str,
        priority: Priority,
        scheduler: SchedulerId,
    ) -> Self {
        let home = Arc::new(SchedulerNode::new(id, scheduler, priority.raw() as u64));
        Self {
            id,
            name: String::from(name),
            base_priority: AtomicU8::new(priority.raw()),
            current_priority: AtomicU8::new(priority.raw()),
            lifecycle: AtomicStateSet::new(StateSet::DORMANT),
            wait: WaitControl::new(),
            nodes: Mutex::new(NodeSet { home, help: None }),
            held: Mutex::new(Vec::new()),
            affinity: AtomicU64::new(CpuMask::all().bits()),
            context: Mutex::new(Context::default()),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_priority(&self) -> Priority {
        Priority::from_raw(self.base_priority.load(Ordering::Acquire))
    }

    /// Effective priority: base plus any protocol boost
    pub fn current_priority(&self) -> Priority {
        Priority::from_raw(self.current_priority.load(Ordering::Acquire))
    }

    pub(crate) fn set_base_priority(&self, priority: Priority) {
        self.base_priority.store(priority.raw(), Ordering::Release);
    }

    pub(crate) fn set_current_priority(&self, priority: Priority) {
        self.current_priority.store(priority.raw(), Ordering::Release);
    }

    pub fn state(&self) -> StateSet {
        self.lifecycle.load()
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Set blocking flags; returns the previous state
    pub(crate) fn set_state(&self, flags: StateSet) -> StateSet {
        self.lifecycle.insert(flags)
    }

    /// Clear blocking flags; returns the previous state
    pub(crate) fn clear_state(&self, flags: StateSet) -> StateSet {
        self.lifecycle.remove(flags)
    }

    pub fn affinity(&self) -> CpuMask {
        CpuMask::from_bits(self.affinity.load(Ordering::Acquire))
    }

    pub(crate) fn set_affinity_mask(&self, mask: CpuMask) {
        self.affinity.store(mask.bits(), Ordering::Release);
    }

    /// The scheduler this thread currently belongs to
    pub fn scheduler(&self) -> SchedulerId {
        self.nodes.lock().home.scheduler()
    }

    pub(crate) fn home_node(&self) -> Arc<SchedulerNode> {
        self.nodes.lock().home.clone()
    }

    /// Current wait-handshake state
    pub fn wait_state(&self) -> WaitState {
        self.wait.state().load()
    }

    /// Outcome of the last finished wait
    pub fn wait_result(&self) -> CoreResult<()> {
        match self.wait_state() {
            WaitState::Satisfied => Ok(()),
            WaitState::TimedOut => Err(CoreError::TimedOut),
            WaitState::Flushed => Err(CoreError::ObjectDeleted),
            _ => Err(CoreError::Unsatisfied),
        }
    }

    /// Take a message parked by a direct hand-off delivery
    pub fn take_message(&self) -> Option<Vec<u8>> {
        self.wait.payload.lock().take()
    }

    /// Watchdog interval requested at the current wait's enqueue, in ticks;
    /// 0 means wait forever. The timer subsystem arms from this and calls
    /// `System::on_timeout` on expiry.
    pub fn wait_timeout(&self) -> u64 {
        self.wait.timeout()
    }

    pub fn context(&self) -> Context {
        *self.context.lock()
    }

    pub fn set_context(&self, context: Context) {
        *self.context.lock() = context;
    }

    /// Confirm an in-flight migration: the destination node becomes the home
    /// node and the source node is retired.
    pub(crate) fn confirm_migration(&self) {
        let mut nodes = self.nodes.lock();
        if let Some(help) = nodes.help.take() {
            nodes.home.set_state(crate::sched::node::NodeState::Dormant);
            nodes.home.set_cpu(None);
            nodes.home = help;
        }
        self.clear_state(StateSet::TRANSIENT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_thread_is_dormant() {
        let thread = Thread::new(1, "worker", Priority::new(10).unwrap(), 0);
        assert!(thread.state().contains(StateSet::DORMANT));
        assert!(!thread.is_ready());
        assert_eq!(thread.base_priority(), thread.current_priority());
        assert_eq!(thread.scheduler(), 0);
    }

    #[test]
    fn migration_confirm_retires_source_node() {
        let thread = Thread::new(1, "mover", Priority::new(10).unwrap(), 0);
        let source = thread.home_node();

        let destination = Arc::new(SchedulerNode::new(1, 1, 10));
        destination.set_state(crate::sched::node::NodeState::Scheduled);
        thread.nodes.lock().help = Some(destination);
        thread.set_state(StateSet::TRANSIENT);

        thread.confirm_migration();
        assert_eq!(thread.scheduler(), 1);
        assert_eq!(source.state(), crate::sched::node::NodeState::Dormant);
        assert!(!thread.state().contains(StateSet::TRANSIENT));
    }
}
