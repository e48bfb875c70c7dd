//! SMP schedulers
//!
//! One multiprocessor core shared by the fixed-priority and EDF variants,
//! parameterized by an eligibility policy. Placement is affinity-aware: a
//! ready thread may only occupy a processor its mask allows, and placement
//! converges by strictly-improving swaps, so no processor ever references
//! the same thread as heir as another.
//!
//! The ask-for-help protocol lets a thread that cannot run on its assigned
//! processor gain a node in another scheduler instance. It is deliberately
//! asynchronous: a failed placement is recorded for bounded FIFO retry at
//! the next reschedule, never handed off synchronously, so two processors
//! cannot deadlock each trying to give a thread to the other.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::percpu::{CpuId, THREAD_NONE};
use crate::sched::node::{NodeState, SchedulerNode};
use crate::sched::priority::Priority;
use crate::sched::{Scheduler, SchedulerId, EDF_BACKGROUND_BASE};
use crate::system::System;
use crate::thread::state::StateSet;
use crate::thread::{Thread, ThreadId};

/// Eligibility policy of an SMP instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmpPolicy {
    /// Eligibility is the effective priority
    FixedPriority,
    /// Deadlines dominate; priority orders the background band
    Edf,
}

#[derive(Clone, Copy)]
struct Slot {
    thread: ThreadId,
    key: u64,
}

struct Inner {
    /// (eligibility key, seq) -> thread; excludes scheduled threads
    ready: BTreeMap<(u64, u64), ThreadId>,
    /// One slot per owned processor, parallel to `cpus`
    slots: Vec<Option<Slot>>,
    /// Arrival counter for FIFO ties (displaced threads re-enter in front)
    back_seq: u64,
    front_seq: u64,
}

const SEQ_ORIGIN: u64 = 1 << 32;

impl Inner {
    fn insert_back(&mut self, thread: ThreadId, key: u64) {
        self.back_seq += 1;
        self.ready.insert((key, self.back_seq), thread);
    }

    fn insert_front(&mut self, thread: ThreadId, key: u64) {
        self.front_seq -= 1;
        self.ready.insert((key, self.front_seq), thread);
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

    fn slot_of(&self, thread: ThreadId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.map(|s| s.thread) == Some(thread))
    }
}

/// Multiprocessor scheduler instance
pub struct SmpScheduler {
    id: SchedulerId,
    name: String,
    policy: SmpPolicy,
    cpus: Vec<CpuId>,
    inner: Mutex<Inner>,
}

impl SmpScheduler {
    pub fn new(id: SchedulerId, name: &str, policy: SmpPolicy, cpus: Vec<CpuId>) -> Self {
        let count = cpus.len();
        let mut slots = Vec::with_capacity(count);
        slots.resize_with(count, || None);
        Self {
            id,
            name: String::from(name),
            policy,
            cpus,
            inner: Mutex::new(Inner {
                ready: BTreeMap::new(),
                slots,
                back_seq: SEQ_ORIGIN,
                front_seq: SEQ_ORIGIN,
            }),
        }
    }

    pub fn policy(&self) -> SmpPolicy {
        self.policy
    }

    /// Eligibility key in this instance's representation
    fn key_for(&self, thread: &Arc<Thread>) -> u64 {
        let prio = thread.current_priority().raw() as u64;
        match self.policy {
            SmpPolicy::FixedPriority => prio,
            SmpPolicy::Edf => {
                let repr = thread.home_node().priority();
                if thread.scheduler() == self.id && repr < EDF_BACKGROUND_BASE {
                    repr
                } else {
                    EDF_BACKGROUND_BASE + prio
                }
            }
        }
    }

    fn thread_allows(&self, sys: &System, thread: ThreadId, cpu: CpuId) -> bool {
        sys.thread_opt(thread)
            .map(|t| t.affinity().is_set(cpu))
            .unwrap_or(false)
    }

    fn publish_heirs(&self, sys: &System, inner: &Inner) {
        for (idx, slot) in inner.slots.iter().enumerate() {
            let heir = slot.map(|s| s.thread).unwrap_or(THREAD_NONE);
            sys.percpu(self.cpus[idx]).set_heir(heir);
        }
    }

    fn mark_ready(&self, sys: &System, thread: ThreadId) {
        if let Some(t) = sys.thread_opt(thread) {
            let node = self.node_of(&t);
            node.set_state(NodeState::Ready);
            node.set_cpu(None);
        }
    }

    fn mark_scheduled(&self, sys: &System, thread: ThreadId, cpu: CpuId) {
        if let Some(t) = sys.thread_opt(thread) {
            let node = self.node_of(&t);
            node.set_state(NodeState::Scheduled);
            node.set_cpu(Some(cpu));
        }
    }

    /// The thread's node owned by this instance (the help node while a
    /// migration into this scheduler is in flight)
    fn node_of(&self, thread: &Arc<Thread>) -> Arc<SchedulerNode> {
        let nodes = thread.nodes.lock();
        if let Some(help) = nodes.help.as_ref() {
            if help.scheduler() == self.id {
                return help.clone();
            }
        }
        nodes.home.clone()
    }

    /// Strictly-improving assignment passes until stable.
    ///
    /// Each swap replaces a scheduled thread by a strictly more eligible
    /// ready thread, so the pass count is bounded and placement converges.
    fn rebalance(&self, sys: &System, inner: &mut Inner) {
        loop {
            let mut changed = false;
            for idx in 0..inner.slots.len() {
                let cpu = self.cpus[idx];
                let best = inner
                    .ready
                    .iter()
                    .find(|(_, &t)| self.thread_allows(sys, t, cpu))
                    .map(|(&k, &t)| (k, t));
                let Some((key, tid)) = best else { continue };
                let take = match inner.slots[idx] {
                    None => true,
                    Some(slot) => key.0 < slot.key,
                };
                if !take {
                    continue;
                }
                inner.ready.remove(&key);
                if let Some(victim) = inner.slots[idx].take() {
                    inner.insert_front(victim.thread, victim.key);
                    self.mark_ready(sys, victim.thread);
                }
                inner.slots[idx] = Some(Slot {
                    thread: tid,
                    key: key.0,
                });
                self.mark_scheduled(sys, tid, cpu);
                changed = true;
            }
            if !changed {
                break;
            }
        }
        self.publish_heirs(sys, inner);
    }

    /// Remove the thread from every structure; returns whether it was present
    fn remove_everywhere(&self, inner: &mut Inner, thread: ThreadId) -> bool {
        if let Some(idx) = inner.slot_of(thread) {
            inner.slots[idx] = None;
            true
        } else {
            inner.remove(thread).is_some()
        }
    }
}

impl Scheduler for SmpScheduler {
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
        let key = match self.policy {
            SmpPolicy::FixedPriority => thread.current_priority().raw() as u64,
            SmpPolicy::Edf => EDF_BACKGROUND_BASE + thread.current_priority().raw() as u64,
        };
        node.set_priority(key);
        node.set_state(NodeState::Dormant);
    }

    fn detach(&self, sys: &System, thread: &Arc<Thread>) {
        self.block(sys, thread);
        self.node_of(thread).set_state(NodeState::Dormant);
    }

    fn withdraw(&self, sys: &System, thread: &Arc<Thread>) {
        let mut inner = self.inner.lock();
        if self.remove_everywhere(&mut inner, thread.id()) {
            let node = self.node_of(thread);
            node.set_state(NodeState::Ready);
            node.set_cpu(None);
            self.rebalance(sys, &mut inner);
        }
    }

    fn block(&self, sys: &System, thread: &Arc<Thread>) {
        let mut inner = self.inner.lock();
        let was_present = self.remove_everywhere(&mut inner, thread.id());
        let node = self.node_of(thread);
        node.set_state(NodeState::Blocked);
        node.set_cpu(None);
        if was_present {
            self.rebalance(sys, &mut inner);
        }
        log::trace!("[SCHED {}] blocked thread {}", self.name, thread.id());
    }

    fn unblock(&self, sys: &System, thread: &Arc<Thread>) {
        let key = self.key_for(thread);
        self.node_of(thread).set_priority(key);

        let mut inner = self.inner.lock();
        inner.insert_back(thread.id(), key);
        self.mark_ready(sys, thread.id());
        self.rebalance(sys, &mut inner);

        // Placement failed everywhere the mask allows: record the thread
        // for FIFO retry at the next reschedule on an allowed processor.
        if inner.slot_of(thread.id()).is_none() {
            let affinity = thread.affinity();
            if let Some(&cpu) = self.cpus.iter().find(|&&c| affinity.is_set(c)) {
                sys.percpu(cpu).push_needs_help(thread.id());
            }
        }
        log::trace!("[SCHED {}] unblocked thread {}", self.name, thread.id());
    }

    fn yield_now(&self, sys: &System, thread: &Arc<Thread>) {
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.slot_of(thread.id()) {
            let slot = inner.slots[idx].take().unwrap();
            inner.insert_back(slot.thread, slot.key);
            self.mark_ready(sys, slot.thread);
            self.rebalance(sys, &mut inner);
        } else if let Some(key) = inner.remove(thread.id()) {
            inner.insert_back(thread.id(), key);
            self.rebalance(sys, &mut inner);
        }
    }

    fn set_priority(&self, sys: &System, thread: &Arc<Thread>, priority: Priority) {
        let node = self.node_of(thread);
        let key = match self.policy {
            SmpPolicy::FixedPriority => priority.raw() as u64,
            SmpPolicy::Edf => {
                // Deadlines dominate priority changes.
                if node.priority() < EDF_BACKGROUND_BASE {
                    return;
                }
                EDF_BACKGROUND_BASE + priority.raw() as u64
            }
        };
        node.set_priority(key);

        let mut inner = self.inner.lock();
        if let Some(idx) = inner.slot_of(thread.id()) {
            let slot = inner.slots[idx].as_mut().unwrap();
            slot.key = key;
            self.rebalance(sys, &mut inner);
        } else if inner.remove(thread.id()).is_some() {
            inner.insert_back(thread.id(), key);
            self.rebalance(sys, &mut inner);
        }
    }

    fn release_job(&self, sys: &System, thread: &Arc<Thread>, deadline: u64) {
        if self.policy != SmpPolicy::Edf {
            return;
        }
        let key = deadline.min(EDF_BACKGROUND_BASE - 1);
        let node = self.node_of(thread);
        node.set_priority(key);

        let mut inner = self.inner.lock();
        if let Some(idx) = inner.slot_of(thread.id()) {
            inner.slots[idx].as_mut().unwrap().key = key;
            self.rebalance(sys, &mut inner);
        } else if inner.remove(thread.id()).is_some() {
            inner.insert_back(thread.id(), key);
            self.rebalance(sys, &mut inner);
        }
    }

    fn cancel_job(&self, sys: &System, thread: &Arc<Thread>) {
        if self.policy != SmpPolicy::Edf {
            return;
        }
        let key = EDF_BACKGROUND_BASE + thread.current_priority().raw() as u64;
        let node = self.node_of(thread);
        node.set_priority(key);

        let mut inner = self.inner.lock();
        if let Some(idx) = inner.slot_of(thread.id()) {
            inner.slots[idx].as_mut().unwrap().key = key;
            self.rebalance(sys, &mut inner);
        } else if inner.remove(thread.id()).is_some() {
            inner.insert_back(thread.id(), key);
            self.rebalance(sys, &mut inner);
        }
    }

    fn ask_for_help(&self, sys: &System, thread: &Arc<Thread>) -> bool {
        let home_here = thread.scheduler() == self.id;
        let key = self.key_for(thread);
        let affinity = thread.affinity();

        let mut inner = self.inner.lock();

        if home_here {
            // Retry placement of a thread we already govern.
            if inner.slot_of(thread.id()).is_some() {
                return true;
            }
            if inner.remove(thread.id()).is_none() {
                // Not ready here (blocked or dormant): nothing to place.
                return false;
            }
            inner.insert_front(thread.id(), key);
            self.rebalance(sys, &mut inner);
            return inner.slot_of(thread.id()).is_some();
        }

        // A foreign thread asks to migrate in: find an empty or strictly
        // less eligible slot on a processor its affinity allows.
        let mut target: Option<usize> = None;
        for (idx, &cpu) in self.cpus.iter().enumerate() {
            if !affinity.is_set(cpu) {
                continue;
            }
            match inner.slots[idx] {
                None => {
                    target = Some(idx);
                    break;
                }
                Some(slot) if key < slot.key => {
                    let better = match target.and_then(|t| inner.slots[t]) {
                        Some(existing) => slot.key > existing.key,
                        None => true,
                    };
                    if better {
                        target = Some(idx);
                    }
                }
                Some(_) => {}
            }
        }
        let Some(idx) = target else {
            log::debug!(
                "[SCHED {}] cannot help thread {}, no eligible processor",
                self.name,
                thread.id()
            );
            return false;
        };

        // The thread transiently owns a source and a destination node until
        // the move is confirmed.
        let destination = Arc::new(SchedulerNode::new(thread.id(), self.id, key));
        destination.set_state(NodeState::Scheduled);
        destination.set_cpu(Some(self.cpus[idx]));
        thread.nodes.lock().help = Some(destination);
        thread.set_state(StateSet::TRANSIENT);

        if let Some(victim) = inner.slots[idx].take() {
            inner.insert_front(victim.thread, victim.key);
            self.mark_ready(sys, victim.thread);
        }
        inner.slots[idx] = Some(Slot {
            thread: thread.id(),
            key,
        });
        self.rebalance(sys, &mut inner);
        log::debug!(
            "[SCHED {}] helped thread {} onto cpu {}",
            self.name,
            thread.id(),
            self.cpus[idx]
        );
        true
    }
}
