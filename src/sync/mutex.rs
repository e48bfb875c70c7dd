//! Mutex Protocol Engine
//!
//! Three priority-inversion-avoidance disciplines layered on one Thread
//! Queue: priority inheritance, priority ceiling, and the multiprocessor
//! ceiling protocol with one ceiling declared per scheduler instance.
//!
//! Inheritance propagation is iterative, never recursive: it walks the
//! blocked-on chain one owner at a time, and release-time recompute is
//! generation-checked so a stale concurrent update loses.

use alloc::sync::{Arc, Weak};

use hashbrown::HashMap;
use spin::Mutex as SpinMutex;

use crate::error::{CoreError, CoreResult};
use crate::sched::priority::Priority;
use crate::sched::SchedulerId;
use crate::sync::thread_queue::{Discipline, ThreadQueue, Timeout};
use crate::system::System;
use crate::thread::{Thread, ThreadId};

/// Locking discipline of a mutex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexProtocol {
    /// Owner tracking only, no priority action
    None,
    /// Contending waiters push their priority onto the owner
    Inherit,
    /// Holding raises the owner to the fixed ceiling; a more urgent caller
    /// fails instead of blocking
    Ceiling(Priority),
    /// Ceiling generalized across schedulers; one ceiling declared per
    /// scheduler instance in advance
    MpCeiling,
}

/// Self-nesting policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nesting {
    /// Recursive obtain by the owner increments a count
    Allowed,
    /// Self-nesting is a reported protocol violation
    Forbidden,
}

/// Result of an obtain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Obtain {
    /// The caller owns the mutex
    Acquired,
    /// The caller was enqueued; the outcome arrives through its wait control
    Enqueued,
}

struct OwnerState {
    owner: Option<ThreadId>,
    nest: u32,
}

/// Shared mutex state; held threads keep a reference for release-time
/// priority recompute
pub struct MutexShared {
    pub(crate) queue: ThreadQueue,
    state: SpinMutex<OwnerState>,
    pub(crate) protocol: MutexProtocol,
    pub(crate) ceilings: SpinMutex<HashMap<SchedulerId, Priority>>,
    nesting: Nesting,
}

impl MutexShared {
    pub(crate) fn owner(&self) -> Option<ThreadId> {
        self.state.lock().owner
    }
}

/// A lock with owner tracking and a selectable inversion-avoidance protocol
pub struct Mutex {
    shared: Arc<MutexShared>,
}

impl Mutex {
    pub fn new(protocol: MutexProtocol, discipline: Discipline, nesting: Nesting) -> Self {
        Self {
            shared: Arc::new(MutexShared {
                queue: ThreadQueue::new(discipline),
                state: SpinMutex::new(OwnerState {
                    owner: None,
                    nest: 0,
                }),
                protocol,
                ceilings: SpinMutex::new(HashMap::new()),
                nesting,
            }),
        }
    }

    pub fn protocol(&self) -> MutexProtocol {
        self.shared.protocol
    }

    pub fn owner(&self) -> Option<ThreadId> {
        self.shared.owner()
    }

    pub fn waiters(&self) -> usize {
        self.shared.queue.len()
    }

    /// Declare the multiprocessor ceiling for one scheduler instance.
    ///
    /// A static requirement: dynamic cross-scheduler propagation cannot be
    /// resolved in O(1) without it.
    pub fn set_ceiling(&self, scheduler: SchedulerId, ceiling: Priority) {
        self.shared.ceilings.lock().insert(scheduler, ceiling);
    }

    /// Ceiling admission for the given thread, before any state mutation
    fn admission_ceiling(&self, thread: &Arc<Thread>) -> CoreResult<Option<Priority>> {
        match self.shared.protocol {
            MutexProtocol::Ceiling(ceiling) => {
                if thread.current_priority().is_more_urgent_than(ceiling) {
                    return Err(CoreError::CeilingViolation {
                        priority: thread.current_priority(),
                        ceiling,
                    });
                }
                Ok(Some(ceiling))
            }
            MutexProtocol::MpCeiling => {
                let scheduler = thread.scheduler();
                let ceiling = self
                    .shared
                    .ceilings
                    .lock()
                    .get(&scheduler)
                    .copied()
                    .ok_or(CoreError::NotConfigured { scheduler })?;
                if thread.current_priority().is_more_urgent_than(ceiling) {
                    return Err(CoreError::CeilingViolation {
                        priority: thread.current_priority(),
                        ceiling,
                    });
                }
                Ok(Some(ceiling))
            }
            _ => Ok(None),
        }
    }

    /// Obtain the mutex. `timeout: None` means do not wait.
    pub fn obtain(
        &self,
        sys: &System,
        thread: &Arc<Thread>,
        timeout: Option<Timeout>,
    ) -> CoreResult<Obtain> {
        let mut state = self.shared.state.lock();
        match state.owner {
            None => {
                let ceiling = self.admission_ceiling(thread)?;
                state.owner = Some(thread.id());
                state.nest = 1;
                drop(state);

                thread.held.lock().push(self.shared.clone());
                if let Some(ceiling) = ceiling {
                    sys.boost_priority(thread, ceiling);
                }
                Ok(Obtain::Acquired)
            }
            Some(owner) if owner == thread.id() => {
                if self.shared.nesting == Nesting::Allowed {
                    state.nest += 1;
                    Ok(Obtain::Acquired)
                } else {
                    log::warn!("[MUTEX] thread {} self-nesting rejected", thread.id());
                    Err(CoreError::Deadlock { thread: thread.id() })
                }
            }
            Some(owner) => {
                // Admission errors surface before any queue mutation.
                self.admission_ceiling(thread)?;
                let Some(timeout) = timeout else {
                    return Err(CoreError::Unsatisfied);
                };

                if self.shared.protocol == MutexProtocol::Inherit {
                    if let Some(holder) = sys.thread_opt(owner) {
                        propagate_boost(sys, holder, thread.current_priority());
                    }
                }

                thread.wait.set_blocked_on(Arc::downgrade(&self.shared));
                self.shared.queue.enqueue(sys, thread, timeout);
                drop(state);
                Ok(Obtain::Enqueued)
            }
        }
    }

    /// Release the mutex, handing ownership to the first waiter.
    ///
    /// Returns the new owner, if any.
    pub fn release(&self, sys: &System, thread: &Arc<Thread>) -> CoreResult<Option<ThreadId>> {
        let mut state = self.shared.state.lock();
        let Some(owner) = state.owner else {
            return Err(CoreError::NotLocked);
        };
        if owner != thread.id() {
            return Err(CoreError::NotOwner { thread: thread.id() });
        }
        if state.nest > 1 {
            state.nest -= 1;
            return Ok(Some(owner));
        }

        thread
            .held
            .lock()
            .retain(|m| !Arc::ptr_eq(m, &self.shared));

        let next = self.shared.queue.surrender(sys);
        match next {
            Some(next_tid) => {
                state.owner = Some(next_tid);
                state.nest = 1;
                drop(state);

                if let Some(next) = sys.thread_opt(next_tid) {
                    next.wait.set_blocked_on(Weak::new());
                    next.held.lock().push(self.shared.clone());
                    match self.shared.protocol {
                        MutexProtocol::Ceiling(ceiling) => {
                            sys.boost_priority(&next, ceiling);
                        }
                        MutexProtocol::MpCeiling => {
                            let ceiling =
                                self.shared.ceilings.lock().get(&next.scheduler()).copied();
                            if let Some(ceiling) = ceiling {
                                sys.boost_priority(&next, ceiling);
                            }
                        }
                        MutexProtocol::Inherit => {
                            // Remaining waiters keep boosting the new owner.
                            if let Some(top) = self.shared.queue.max_waiter_priority(sys) {
                                sys.boost_priority(&next, top);
                            }
                        }
                        MutexProtocol::None => {}
                    }
                }
                recompute_effective(sys, thread);
                Ok(Some(next_tid))
            }
            None => {
                state.owner = None;
                state.nest = 0;
                drop(state);
                recompute_effective(sys, thread);
                Ok(None)
            }
        }
    }

    /// Delete the mutex: fails while locked, otherwise flushes any waiters.
    pub fn delete(&self, sys: &System) -> CoreResult<usize> {
        let state = self.shared.state.lock();
        if let Some(owner) = state.owner {
            return Err(CoreError::ResourceInUse { thread: owner });
        }
        drop(state);
        Ok(self.shared.queue.flush(sys))
    }
}

/// Push `priority` along the blocked-on chain starting at `holder`.
///
/// Iterative by construction: each step raises one owner and follows at
/// most one blocked-on edge, so depth is bounded by the chain length.
pub(crate) fn propagate_boost(sys: &System, holder: Arc<Thread>, priority: Priority) {
    let mut current = holder;
    loop {
        if !priority.is_more_urgent_than(current.current_priority()) {
            break;
        }
        sys.apply_priority(&current, priority);

        let Some(blocked_on) = current.wait.blocked_on() else {
            break;
        };
        if blocked_on.protocol != MutexProtocol::Inherit {
            break;
        }
        let next_owner = blocked_on.state.lock().owner;
        let Some(next) = next_owner.and_then(|t| sys.thread_opt(t)) else {
            break;
        };
        if next.id() == current.id() {
            break;
        }
        current = next;
    }
}

/// Recompute a thread's effective priority from its base priority and every
/// owner-tracking lock it still holds.
pub(crate) fn recompute_effective(sys: &System, thread: &Arc<Thread>) {
    let node = thread.home_node();
    loop {
        let generation = node.generation();
        let mut target = thread.base_priority();

        let held: alloc::vec::Vec<Arc<MutexShared>> = thread.held.lock().clone();
        for lock in held {
            match lock.protocol {
                MutexProtocol::Ceiling(ceiling) => {
                    target = Priority::most_urgent(target, ceiling);
                }
                MutexProtocol::MpCeiling => {
                    if let Some(&ceiling) = lock.ceilings.lock().get(&thread.scheduler()) {
                        target = Priority::most_urgent(target, ceiling);
                    }
                }
                MutexProtocol::Inherit => {
                    if let Some(top) = lock.queue.max_waiter_priority(sys) {
                        target = Priority::most_urgent(target, top);
                    }
                }
                MutexProtocol::None => {}
            }
        }

        // A concurrent update invalidates this computation; retry.
        if node.generation() != generation {
            continue;
        }
        if target != thread.current_priority() {
            sys.apply_priority(thread, target);
        }
        break;
    }
}
