//! Condition variable
//!
//! Pairs with a [`Mutex`]: `wait` enqueues the caller and then releases the
//! mutex, so a signaler that holds the mutex cannot slip a wake-up in
//! before the waiter is queued. The woken thread re-obtains the mutex from
//! its own context once it runs again.

use alloc::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::sync::mutex::Mutex;
use crate::sync::thread_queue::{Discipline, ThreadQueue, Timeout};
use crate::system::System;
use crate::thread::{Thread, ThreadId};

pub struct Condvar {
    queue: ThreadQueue,
}

impl Condvar {
    pub fn new(discipline: Discipline) -> Self {
        Self {
            queue: ThreadQueue::new(discipline),
        }
    }

    pub fn waiters(&self) -> usize {
        self.queue.len()
    }

    /// Enqueue the caller and release `mutex`.
    ///
    /// Ownership hand-off inside `release` may immediately wake another
    /// thread; the caller is already queued by then, so no signal is lost.
    pub fn wait(
        &self,
        sys: &System,
        thread: &Arc<Thread>,
        mutex: &Mutex,
        timeout: Timeout,
    ) -> CoreResult<()> {
        // Ownership is checked before the caller is queued: a protocol
        // violation must leave the caller ready and the queue untouched.
        match mutex.owner() {
            Some(owner) if owner == thread.id() => {}
            Some(_) => return Err(CoreError::NotOwner { thread: thread.id() }),
            None => return Err(CoreError::NotLocked),
        }
        self.queue.enqueue(sys, thread, timeout);
        mutex.release(sys, thread)?;
        Ok(())
    }

    /// Wake the first waiter per discipline.
    pub fn signal(&self, sys: &System) -> Option<ThreadId> {
        self.queue.surrender(sys)
    }

    /// Wake every waiter.
    pub fn broadcast(&self, sys: &System) -> usize {
        self.queue.release_all(sys)
    }

    /// Deletion: every waiter sees the deleted-object outcome.
    pub fn flush(&self, sys: &System) -> usize {
        self.queue.flush(sys)
    }
}
