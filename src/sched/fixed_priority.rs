//! Uniprocessor fixed-priority scheduler
//!
//! Ready threads live in the two-level bitmap index; the scheduled slot
//! mirrors the processor's heir. Every mutation re-derives the heir before
//! the instance lock is released.

use alloc::string::String;
use alloc::sync::Arc;

use spin::Mutex;

use crate::percpu::{CpuId, THREAD_NONE};
use crate::sched::bitmap::PriorityBitmap;
use crate::sched::node::NodeState;
use crate::sched::priority::Priority;
use crate::sched::{Scheduler, SchedulerId};
use crate::system::System;
use crate::thread::{Thread, ThreadId};

struct Inner {
    ready: PriorityBitmap,
    scheduled: Option<(ThreadId, Priority)>,
}

/// Fixed-priority scheduler governing exactly one processor
pub struct FixedPriority {
    id: SchedulerId,
    name: String,
    cpus: [CpuId; 1],
    inner: Mutex<Inner>,
}

impl FixedPriority {
    pub fn new(id: SchedulerId, name: &str, cpu: CpuId) -> Self {
        Self {
            id,
            name: String::from(name),
            cpus: [cpu],
            inner: Mutex::new(Inner {
                ready: PriorityBitmap::new(),
                scheduled: None,
            }),
        }
    }

    fn cpu(&self) -> CpuId {
        self.cpus[0]
    }

    /// Install the scheduled slot as the processor's heir
    fn publish_heir(&self, sys: &System, inner: &Inner) {
        let heir = inner.scheduled.map(|(t, _)| t).unwrap_or(THREAD_NONE);
        sys.percpu(self.cpu()).set_heir(heir);
    }

    fn schedule_thread(&self, sys: &System, inner: &mut Inner, thread: &Arc<Thread>, priority: Priority) {
        let node = thread.home_node();
        node.set_state(NodeState::Scheduled);
        node.set_cpu(Some(self.cpu()));
        inner.scheduled = Some((thread.id(), priority));
        self.publish_heir(sys, inner);
    }

    /// Displace the scheduled thread back to the front of its ready ring
    fn displace_scheduled(&self, sys: &System, inner: &mut Inner) {
        if let Some((tid, prio)) = inner.scheduled.take() {
            inner.ready.insert_front(tid, prio);
            if let Some(victim) = sys.thread_opt(tid) {
                let node = victim.home_node();
                node.set_state(NodeState::Ready);
                node.set_cpu(None);
            }
        }
    }

    /// Promote the most urgent ready thread into the empty scheduled slot
    fn fill_scheduled(&self, sys: &System, inner: &mut Inner) {
        debug_assert!(inner.scheduled.is_none());
        if let Some((tid, prio)) = inner.ready.pop_highest() {
            if let Some(next) = sys.thread_opt(tid) {
                self.schedule_thread(sys, inner, &next, prio);
                return;
            }
        }
        self.publish_heir(sys, inner);
    }
}

impl Scheduler for FixedPriority {
    fn id(&self) -> SchedulerId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn cpus(&self) -> &[CpuId] {
        &self.cpus
    }

    fn attach(&self, _sys: &System, thread: &Arc<Thread>) {
        let node = thread.home_node();
        node.set_priority(thread.current_priority().raw() as u64);
        node.set_state(NodeState::Dormant);
    }

    fn detach(&self, sys: &System, thread: &Arc<Thread>) {
        self.block(sys, thread);
        thread.home_node().set_state(NodeState::Dormant);
    }

    fn withdraw(&self, sys: &System, thread: &Arc<Thread>) {
        self.block(sys, thread);
    }

    fn block(&self, sys: &System, thread: &Arc<Thread>) {
        let mut inner = self.inner.lock();
        let node = thread.home_node();
        match inner.scheduled {
            Some((tid, _)) if tid == thread.id() => {
                inner.scheduled = None;
                node.set_state(NodeState::Blocked);
                node.set_cpu(None);
                self.fill_scheduled(sys, &mut inner);
            }
            _ => {
                let prio = Priority::from_raw(node.priority() as u8);
                inner.ready.extract(thread.id(), prio);
                node.set_state(NodeState::Blocked);
            }
        }
        log::trace!("[SCHED {}] blocked thread {}", self.name, thread.id());
    }

    fn unblock(&self, sys: &System, thread: &Arc<Thread>) {
        let prio = thread.current_priority();
        let node = thread.home_node();
        node.set_priority(prio.raw() as u64);

        let mut inner = self.inner.lock();
        match inner.scheduled {
            Some((_, cur_prio)) if prio.is_more_urgent_than(cur_prio) => {
                self.displace_scheduled(sys, &mut inner);
                self.schedule_thread(sys, &mut inner, thread, prio);
            }
            Some(_) => {
                inner.ready.insert(thread.id(), prio);
                node.set_state(NodeState::Ready);
            }
            None => {
                self.schedule_thread(sys, &mut inner, thread, prio);
            }
        }
        log::trace!("[SCHED {}] unblocked thread {}", self.name, thread.id());
    }

    fn yield_now(&self, sys: &System, thread: &Arc<Thread>) {
        let mut inner = self.inner.lock();
        let node = thread.home_node();
        match inner.scheduled {
            Some((tid, prio)) if tid == thread.id() => {
                // Step behind every ready peer of equal or better urgency.
                match inner.ready.highest_ready() {
                    Some(best) if !prio.is_more_urgent_than(best) => {
                        inner.scheduled = None;
                        node.set_state(NodeState::Ready);
                        node.set_cpu(None);
                        inner.ready.insert(tid, prio);
                        self.fill_scheduled(sys, &mut inner);
                    }
                    _ => {}
                }
            }
            _ => {
                let prio = Priority::from_raw(node.priority() as u8);
                if inner.ready.extract(thread.id(), prio) {
                    inner.ready.insert(thread.id(), prio);
                }
            }
        }
    }

    fn set_priority(&self, sys: &System, thread: &Arc<Thread>, priority: Priority) {
        let node = thread.home_node();
        let old = Priority::from_raw(node.priority() as u8);
        node.set_priority(priority.raw() as u64);

        let mut inner = self.inner.lock();
        match inner.scheduled {
            Some((tid, _)) if tid == thread.id() => {
                inner.scheduled = Some((tid, priority));
                // Another thread may have become more eligible.
                if let Some(best) = inner.ready.highest_ready() {
                    if best.is_more_urgent_than(priority) {
                        self.displace_scheduled(sys, &mut inner);
                        self.fill_scheduled(sys, &mut inner);
                    }
                }
            }
            _ => {
                if inner.ready.extract(thread.id(), old) {
                    inner.ready.insert(thread.id(), priority);
                    node.set_state(NodeState::Ready);
                    let preempt = match inner.scheduled {
                        Some((_, cur)) => priority.is_more_urgent_than(cur),
                        None => true,
                    };
                    if preempt {
                        self.displace_scheduled(sys, &mut inner);
                        inner.ready.extract(thread.id(), priority);
                        self.schedule_thread(sys, &mut inner, thread, priority);
                    }
                }
            }
        }
    }
}
