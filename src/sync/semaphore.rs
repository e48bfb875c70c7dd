//! Counting and binary semaphores
//!
//! No owner tracking and no priority protocol; release from any context,
//! including interrupt handlers once the dispatch coordinator defers the
//! switch.

use alloc::sync::Arc;

use spin::Mutex as SpinMutex;

use crate::error::{CoreError, CoreResult};
use crate::sync::thread_queue::{Discipline, ThreadQueue, Timeout};
use crate::system::System;
use crate::thread::Thread;

/// Semaphore acquisition result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// A unit was available
    Taken,
    /// The caller was enqueued; the outcome arrives through its wait control
    Enqueued,
}

struct Count {
    value: u32,
    max: u32,
}

/// Counting semaphore; `max == 1` makes it binary
pub struct Semaphore {
    queue: ThreadQueue,
    count: SpinMutex<Count>,
}

impl Semaphore {
    pub fn new(initial: u32, max: u32, discipline: Discipline) -> CoreResult<Self> {
        if max == 0 || initial > max {
            return Err(CoreError::InvalidConfig {
                reason: "semaphore count exceeds maximum",
            });
        }
        Ok(Self {
            queue: ThreadQueue::new(discipline),
            count: SpinMutex::new(Count {
                value: initial,
                max,
            }),
        })
    }

    pub fn binary(initial: bool, discipline: Discipline) -> Self {
        Self {
            queue: ThreadQueue::new(discipline),
            count: SpinMutex::new(Count {
                value: initial as u32,
                max: 1,
            }),
        }
    }

    pub fn count(&self) -> u32 {
        self.count.lock().value
    }

    pub fn waiters(&self) -> usize {
        self.queue.len()
    }

    /// Take one unit. `timeout: None` means do not wait.
    pub fn obtain(
        &self,
        sys: &System,
        thread: &Arc<Thread>,
        timeout: Option<Timeout>,
    ) -> CoreResult<Acquire> {
        let mut count = self.count.lock();
        if count.value > 0 {
            count.value -= 1;
            return Ok(Acquire::Taken);
        }
        let Some(timeout) = timeout else {
            return Err(CoreError::Unsatisfied);
        };
        // Enqueue under the count lock so a concurrent release either sees
        // the waiter or a nonzero count, never neither.
        self.queue.enqueue(sys, thread, timeout);
        drop(count);
        Ok(Acquire::Enqueued)
    }

    /// Give back one unit, waking the first waiter instead of counting up.
    pub fn release(&self, sys: &System) -> CoreResult<()> {
        let mut count = self.count.lock();
        if self.queue.surrender(sys).is_some() {
            return Ok(());
        }
        if count.value == count.max {
            return Err(CoreError::Overflow);
        }
        count.value += 1;
        Ok(())
    }

    /// Flush all waiters; each sees the deleted-object outcome.
    pub fn flush(&self, sys: &System) -> usize {
        self.queue.flush(sys)
    }
}
