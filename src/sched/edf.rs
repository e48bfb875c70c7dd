//! Uniprocessor earliest-deadline-first scheduler
//!
//! Threads with a released job are ordered by absolute deadline; threads
//! without one sit in a background band ordered by fixed priority below
//! every deadline. Equal deadlines tie-break in release order.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;

use spin::Mutex;

use crate::percpu::{CpuId, THREAD_NONE};
use crate::sched::node::NodeState;
use crate::sched::priority::Priority;
use crate::sched::{Scheduler, SchedulerId, EDF_BACKGROUND_BASE};
use crate::system::System;
use crate::thread::{Thread, ThreadId};

struct Inner {
    /// (eligibility key, release seq) -> thread
    ready: BTreeMap<(u64, u64), ThreadId>,
    scheduled: Option<(ThreadId, u64)>,
    seq: u64,
}

impl Inner {
    fn insert(&mut self, thread: ThreadId, key: u64) {
        self.seq += 1;
        self.ready.insert((key, self.seq), thread);
    }

    fn remove(&mut self, thread: ThreadId) -> Option<u64> {
        let entry = self
            .ready
            .iter()
            .find(|(_, &t)| t == thread)
            .map(|(&k, _)| k)?;
        self.ready.remove(&entry);
        Some(entry.0)
    }

    fn pop_first(&mut self) -> Option<(u64, ThreadId)> {
        let (&(key, seq), &thread) = self.ready.iter().next()?;
        self.ready.remove(&(key, seq));
        Some((key, thread))
    }
}

/// EDF scheduler governing exactly one processor
pub struct Edf {
    id: SchedulerId,
    name: String,
    cpus: [CpuId; 1],
    inner: Mutex<Inner>,
}

impl Edf {
    pub fn new(id: SchedulerId, name: &str, cpu: CpuId) -> Self {
        Self {
            id,
            name: String::from(name),
            cpus: [cpu],
            inner: Mutex::new(Inner {
                ready: BTreeMap::new(),
                scheduled: None,
                seq: 0,
            }),
        }
    }

    fn cpu(&self) -> CpuId {
        self.cpus[0]
    }

    fn background_key(priority: Priority) -> u64 {
        EDF_BACKGROUND_BASE + priority.raw() as u64
    }

    fn publish_heir(&self, sys: &System, inner: &Inner) {
        let heir = inner.scheduled.map(|(t, _)| t).unwrap_or(THREAD_NONE);
        sys.percpu(self.cpu()).set_heir(heir);
    }

    fn schedule_thread(&self, sys: &System, inner: &mut Inner, thread: &Arc<Thread>, key: u64) {
        let node = thread.home_node();
        node.set_state(NodeState::Scheduled);
        node.set_cpu(Some(self.cpu()));
        inner.scheduled = Some((thread.id(), key));
        self.publish_heir(sys, inner);
    }

    fn displace_scheduled(&self, sys: &System, inner: &mut Inner) {
        if let Some((tid, key)) = inner.scheduled.take() {
            inner.insert(tid, key);
            if let Some(victim) = sys.thread_opt(tid) {
                let node = victim.home_node();
                node.set_state(NodeState::Ready);
                node.set_cpu(None);
            }
        }
    }

    fn fill_scheduled(&self, sys: &System, inner: &mut Inner) {
        debug_assert!(inner.scheduled.is_none());
        if let Some((key, tid)) = inner.pop_first() {
            if let Some(next) = sys.thread_opt(tid) {
                self.schedule_thread(sys, inner, &next, key);
                return;
            }
        }
        self.publish_heir(sys, inner);
    }

    /// Move the thread to a new eligibility key, wherever it currently sits
    fn reposition(&self, sys: &System, thread: &Arc<Thread>, key: u64) {
        let node = thread.home_node();
        node.set_priority(key);

        let mut inner = self.inner.lock();
        match inner.scheduled {
            Some((tid, _)) if tid == thread.id() => {
                inner.scheduled = Some((tid, key));
                let head = inner.ready.iter().next().map(|(&(k, _), _)| k);
                if let Some(best) = head {
                    if best < key {
                        self.displace_scheduled(sys, &mut inner);
                        self.fill_scheduled(sys, &mut inner);
                    }
                }
            }
            _ => {
                if inner.remove(thread.id()).is_some() {
                    inner.insert(thread.id(), key);
                    node.set_state(NodeState::Ready);
                    let preempt = match inner.scheduled {
                        Some((_, cur)) => key < cur,
                        None => true,
                    };
                    if preempt {
                        self.displace_scheduled(sys, &mut inner);
                        inner.remove(thread.id());
                        self.schedule_thread(sys, &mut inner, thread, key);
                    }
                }
            }
        }
    }
}

impl Scheduler for Edf {
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
        node.set_priority(Self::background_key(thread.current_priority()));
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
                inner.remove(thread.id());
                node.set_state(NodeState::Blocked);
            }
        }
    }

    fn unblock(&self, sys: &System, thread: &Arc<Thread>) {
        let node = thread.home_node();
        let key = node.priority();

        let mut inner = self.inner.lock();
        match inner.scheduled {
            Some((_, cur_key)) if key < cur_key => {
                self.displace_scheduled(sys, &mut inner);
                self.schedule_thread(sys, &mut inner, thread, key);
            }
            Some(_) => {
                inner.insert(thread.id(), key);
                node.set_state(NodeState::Ready);
            }
            None => {
                self.schedule_thread(sys, &mut inner, thread, key);
            }
        }
    }

    fn yield_now(&self, sys: &System, thread: &Arc<Thread>) {
        let mut inner = self.inner.lock();
        match inner.scheduled {
            Some((tid, key)) if tid == thread.id() => {
                let head = inner.ready.iter().next().map(|(&(k, _), _)| k);
                if let Some(best) = head {
                    if best <= key {
                        inner.scheduled = None;
                        let node = thread.home_node();
                        node.set_state(NodeState::Ready);
                        node.set_cpu(None);
                        inner.insert(tid, key);
                        self.fill_scheduled(sys, &mut inner);
                    }
                }
            }
            _ => {
                if let Some(key) = inner.remove(thread.id()) {
                    inner.insert(thread.id(), key);
                }
            }
        }
    }

    fn set_priority(&self, sys: &System, thread: &Arc<Thread>, priority: Priority) {
        // Deadlines dominate: a released job ignores priority for ordering.
        let node = thread.home_node();
        if node.priority() < EDF_BACKGROUND_BASE {
            return;
        }
        self.reposition(sys, thread, Self::background_key(priority));
    }

    fn release_job(&self, sys: &System, thread: &Arc<Thread>, deadline: u64) {
        let key = deadline.min(EDF_BACKGROUND_BASE - 1);
        if thread.home_node().state() == NodeState::Blocked
            || thread.home_node().state() == NodeState::Dormant
        {
            thread.home_node().set_priority(key);
        } else {
            self.reposition(sys, thread, key);
        }
    }

    fn cancel_job(&self, sys: &System, thread: &Arc<Thread>) {
        let key = Self::background_key(thread.current_priority());
        if thread.home_node().state() == NodeState::Blocked
            || thread.home_node().state() == NodeState::Dormant
        {
            thread.home_node().set_priority(key);
        } else {
            self.reposition(sys, thread, key);
        }
    }
}
