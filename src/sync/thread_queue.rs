//! Thread Queue
//!
//! The one blocking queue behind every synchronization object. FIFO
//! discipline preserves arrival order; Priority discipline orders by
//! effective priority with FIFO ties, and repositions a waiter whose
//! priority changes in O(log n).
//!
//! Block against release/timeout/flush is race-free through the
//! intent-to-block handshake: the blocking thread publishes
//! `IntendToBlock` under the queue lock, and the unblocking side claims
//! the wait with a terminal outcome exactly once. Claiming from `Blocked`
//! is a direct hand-off (the winner performs the scheduler unblock);
//! claiming from `IntendToBlock` leaves the wake-up to the blocker, which
//! observes its lost transition and never parks.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::sched::priority::Priority;
use crate::system::System;
use crate::thread::state::{StateSet, WaitState};
use crate::thread::thread::WaitLocation;
use crate::thread::{Thread, ThreadId};

/// Release-order policy of a thread queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    /// Arrival order
    Fifo,
    /// Effective priority, ties by arrival
    Priority,
}

/// How long to wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Forever,
    /// Watchdog interval in ticks; the timer subsystem calls back
    /// `System::on_timeout` on expiry
    Ticks(u64),
}

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct TqInner {
    fifo: VecDeque<ThreadId>,
    by_prio: BTreeMap<(u8, u64), ThreadId>,
    seq: u64,
}

/// Shared queue state; threads hold a lookup-only reference while enqueued
pub(crate) struct QueueShared {
    id: u64,
    discipline: Discipline,
    inner: Mutex<TqInner>,
}

pub(crate) type QueueRef = Arc<QueueShared>;

impl QueueShared {
    fn remove_key(&self, inner: &mut TqInner, thread: ThreadId, key: (u8, u64)) -> bool {
        match self.discipline {
            Discipline::Fifo => {
                if let Some(pos) = inner.fifo.iter().position(|&t| t == thread) {
                    inner.fifo.remove(pos);
                    true
                } else {
                    false
                }
            }
            Discipline::Priority => inner.by_prio.remove(&key) == Some(thread),
        }
    }

    /// Reposition a queued waiter after a priority change
    pub(crate) fn requeue(&self, thread: &Arc<Thread>, new: Priority) {
        if self.discipline != Discipline::Priority {
            return;
        }
        let mut inner = self.inner.lock();
        let mut location = thread.wait.location().lock();
        let Some(loc) = location.as_mut() else { return };
        if loc.queue.id != self.id {
            return;
        }
        if inner.by_prio.remove(&loc.key) == Some(thread.id()) {
            inner.seq += 1;
            let key = (new.raw(), inner.seq);
            inner.by_prio.insert(key, thread.id());
            loc.key = key;
        }
    }
}

/// Wake-side cleanup once a wait has been decided
fn finish_wake(sys: &System, thread: &Arc<Thread>) {
    let prev = thread.clear_state(StateSet::WAITING_FOR_QUEUE | StateSet::WAITING_FOR_TIME);
    let now = prev - (StateSet::WAITING_FOR_QUEUE | StateSet::WAITING_FOR_TIME);
    if now.is_ready() {
        sys.scheduler_of(thread).unblock(sys, thread);
    }
}

/// FIFO- or priority-ordered blocking queue
pub struct ThreadQueue {
    shared: QueueRef,
}

impl ThreadQueue {
    /// Rebuild a queue handle from a thread's wait location (timeout path)
    pub(crate) fn from_ref(shared: QueueRef) -> Self {
        Self { shared }
    }

    pub fn new(discipline: Discipline) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
                discipline,
                inner: Mutex::new(TqInner {
                    fifo: VecDeque::new(),
                    by_prio: BTreeMap::new(),
                    seq: 0,
                }),
            }),
        }
    }

    pub fn discipline(&self) -> Discipline {
        self.shared.discipline
    }

    pub fn len(&self) -> usize {
        let inner = self.shared.inner.lock();
        inner.fifo.len() + inner.by_prio.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block a thread on this queue.
    ///
    /// The caller observes the outcome through `thread.wait_result()` once
    /// the wait has been decided by release, timeout or flush.
    pub fn enqueue(&self, sys: &System, thread: &Arc<Thread>, timeout: Timeout) {
        let mut inner = self.shared.inner.lock();

        {
            let mut location = thread.wait.location().lock();
            if let Some(loc) = location.as_ref() {
                crate::core_fatal!(
                    "thread {} found in two thread queues ({} and {})",
                    thread.id(),
                    loc.queue.id,
                    self.shared.id
                );
            }
            thread.wait.state().store(WaitState::IntendToBlock);
            inner.seq += 1;
            let key = (thread.current_priority().raw(), inner.seq);
            match self.shared.discipline {
                Discipline::Fifo => inner.fifo.push_back(thread.id()),
                Discipline::Priority => {
                    inner.by_prio.insert(key, thread.id());
                }
            }
            *location = Some(WaitLocation {
                queue: self.shared.clone(),
                key,
            });
        }

        let mut flags = StateSet::WAITING_FOR_QUEUE;
        if let Timeout::Ticks(ticks) = timeout {
            flags |= StateSet::WAITING_FOR_TIME;
            thread.wait.set_timeout(ticks);
        } else {
            thread.wait.set_timeout(0);
        }
        thread.set_state(flags);
        sys.scheduler_of(thread).block(sys, thread);

        drop(inner);

        // Finish the handshake. Losing this transition means release or
        // timeout already decided the wait while we were blocking: the
        // winner left the wake-up to us, so we must not stay parked.
        if thread
            .wait
            .state()
            .compare_exchange(WaitState::IntendToBlock, WaitState::Blocked)
            .is_err()
        {
            finish_wake(sys, thread);
        }
    }

    /// Decide a specific thread's wait with `outcome`.
    fn wake(&self, sys: &System, thread: &Arc<Thread>, outcome: WaitState) -> bool {
        let mut inner = self.shared.inner.lock();
        {
            let mut location = thread.wait.location().lock();
            let Some(loc) = location.as_ref() else {
                return false;
            };
            if loc.queue.id != self.shared.id {
                return false;
            }
            let key = loc.key;
            if !self.shared.remove_key(&mut inner, thread.id(), key) {
                return false;
            }
            *location = None;
        }

        match thread.wait.state().claim(outcome) {
            Some(WaitState::Blocked) => {
                drop(inner);
                finish_wake(sys, thread);
                true
            }
            Some(_) => true,
            None => crate::core_fatal!(
                "thread {} queued in {} with a decided wait",
                thread.id(),
                self.shared.id
            ),
        }
    }

    /// Release the first waiter per discipline; returns the woken thread
    pub fn surrender(&self, sys: &System) -> Option<ThreadId> {
        loop {
            let tid = {
                let inner = self.shared.inner.lock();
                match self.shared.discipline {
                    Discipline::Fifo => inner.fifo.front().copied(),
                    Discipline::Priority => inner.by_prio.values().next().copied(),
                }
            }?;
            let Some(thread) = sys.thread_opt(tid) else {
                // Deleted while queued: drop the stale entry and continue.
                let mut inner = self.shared.inner.lock();
                match self.shared.discipline {
                    Discipline::Fifo => {
                        inner.fifo.retain(|&t| t != tid);
                    }
                    Discipline::Priority => {
                        inner.by_prio.retain(|_, &mut t| t != tid);
                    }
                }
                continue;
            };
            if self.wake(sys, &thread, WaitState::Satisfied) {
                log::trace!("[TQ {}] released thread {}", self.shared.id, tid);
                return Some(tid);
            }
        }
    }

    /// Explicit release of one specific waiter by another actor
    pub fn extract(&self, sys: &System, thread: &Arc<Thread>) -> bool {
        self.wake(sys, thread, WaitState::Satisfied)
    }

    /// Watchdog expiry callback from the timer subsystem.
    ///
    /// Exactly one of timeout and release wins; if the wait was already
    /// satisfied this is a no-op.
    pub fn on_timeout(&self, sys: &System, thread: &Arc<Thread>) -> bool {
        let won = self.wake(sys, thread, WaitState::TimedOut);
        if won {
            log::trace!("[TQ {}] thread {} timed out", self.shared.id, thread.id());
        }
        won
    }

    /// Release every waiter with the given outcome; returns how many
    fn drain(&self, sys: &System, outcome: WaitState) -> usize {
        let mut count = 0;
        loop {
            let tid = {
                let inner = self.shared.inner.lock();
                match self.shared.discipline {
                    Discipline::Fifo => inner.fifo.front().copied(),
                    Discipline::Priority => inner.by_prio.values().next().copied(),
                }
            };
            let Some(tid) = tid else { break };
            if let Some(thread) = sys.thread_opt(tid) {
                if self.wake(sys, &thread, outcome) {
                    count += 1;
                    continue;
                }
            }
            let mut inner = self.shared.inner.lock();
            match self.shared.discipline {
                Discipline::Fifo => {
                    inner.fifo.retain(|&t| t != tid);
                }
                Discipline::Priority => {
                    inner.by_prio.retain(|_, &mut t| t != tid);
                }
            }
        }
        count
    }

    /// Release all waiters successfully (condition broadcast)
    pub fn release_all(&self, sys: &System) -> usize {
        self.drain(sys, WaitState::Satisfied)
    }

    /// Release all waiters with the flushed outcome (object deletion)
    pub fn flush(&self, sys: &System) -> usize {
        let count = self.drain(sys, WaitState::Flushed);
        if count > 0 {
            log::debug!("[TQ {}] flushed {} waiters", self.shared.id, count);
        }
        count
    }

    /// Most urgent waiter priority, for inheritance recompute
    pub fn max_waiter_priority(&self, sys: &System) -> Option<Priority> {
        let inner = self.shared.inner.lock();
        match self.shared.discipline {
            Discipline::Priority => inner
                .by_prio
                .keys()
                .next()
                .map(|&(raw, _)| Priority::from_raw(raw)),
            Discipline::Fifo => inner
                .fifo
                .iter()
                .filter_map(|&t| sys.thread_opt(t))
                .map(|t| t.current_priority())
                .min(),
        }
    }

    /// Drop a queued entry whose thread no longer exists
    pub(crate) fn discard_stale(&self, thread: ThreadId) {
        let mut inner = self.shared.inner.lock();
        match self.shared.discipline {
            Discipline::Fifo => {
                inner.fifo.retain(|&t| t != thread);
            }
            Discipline::Priority => {
                inner.by_prio.retain(|_, &mut t| t != thread);
            }
        }
    }

    /// First waiter in release order, without waking it
    pub fn peek(&self) -> Option<ThreadId> {
        let inner = self.shared.inner.lock();
        match self.shared.discipline {
            Discipline::Fifo => inner.fifo.front().copied(),
            Discipline::Priority => inner.by_prio.values().next().copied(),
        }
    }
}
