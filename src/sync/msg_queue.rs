//! Bounded message queue
//!
//! Byte-vector messages with direct hand-off: a send that finds a waiting
//! receiver parks the payload on that receiver's wait control and wakes it,
//! never touching the buffer. Urgent sends prepend; broadcast delivers one
//! copy to every waiting receiver and buffers nothing.
//!
//! Senders block when the buffer is full, parking the outgoing message on
//! their own wait control; a receive that frees a slot pulls the first
//! blocked sender's message into the buffer tail.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex as SpinMutex;

use crate::error::{CoreError, CoreResult};
use crate::sync::thread_queue::{Discipline, ThreadQueue, Timeout};
use crate::system::System;
use crate::thread::Thread;

/// How a send completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed directly to a waiting receiver
    Delivered,
    /// Appended (or prepended) to the buffer
    Buffered,
    /// Buffer full; the sender was enqueued with the message parked
    Enqueued,
}

/// Receive result for the non-blocking and immediate cases
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receive {
    /// A message was available
    Message(Vec<u8>),
    /// The caller was enqueued; the payload arrives through `take_message`
    /// once its wait is satisfied
    Enqueued,
}

pub struct MessageQueue {
    capacity: usize,
    max_size: usize,
    buffer: SpinMutex<VecDeque<Vec<u8>>>,
    receivers: ThreadQueue,
    senders: ThreadQueue,
}

impl MessageQueue {
    pub fn new(capacity: usize, max_size: usize, discipline: Discipline) -> CoreResult<Self> {
        if capacity == 0 || max_size == 0 {
            return Err(CoreError::InvalidConfig {
                reason: "message queue capacity and size must be nonzero",
            });
        }
        Ok(Self {
            capacity,
            max_size,
            buffer: SpinMutex::new(VecDeque::with_capacity(capacity)),
            receivers: ThreadQueue::new(discipline),
            senders: ThreadQueue::new(discipline),
        })
    }

    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn waiting_receivers(&self) -> usize {
        self.receivers.len()
    }

    /// Hand `msg` to the first waiting receiver, if any.
    ///
    /// Returns the message back when no receiver could take it.
    fn try_hand_off(&self, sys: &System, mut msg: Vec<u8>) -> Result<(), Vec<u8>> {
        loop {
            let Some(rid) = self.receivers.peek() else {
                return Err(msg);
            };
            let Some(receiver) = sys.thread_opt(rid) else {
                self.receivers.discard_stale(rid);
                continue;
            };
            receiver.wait.park_payload(msg);
            if self.receivers.extract(sys, &receiver) {
                return Ok(());
            }
            // Lost to a timeout; reclaim the payload and try the next one.
            match receiver.take_message() {
                Some(back) => msg = back,
                None => crate::core_fatal!(
                    "receiver {} lost both its wait and its parked payload",
                    rid
                ),
            }
        }
    }

    fn send_inner(
        &self,
        sys: &System,
        thread: &Arc<Thread>,
        msg: Vec<u8>,
        urgent: bool,
        timeout: Option<Timeout>,
    ) -> CoreResult<SendOutcome> {
        if msg.len() > self.max_size {
            return Err(CoreError::InvalidConfig {
                reason: "message exceeds maximum size",
            });
        }
        let mut buffer = self.buffer.lock();
        let msg = match self.try_hand_off(sys, msg) {
            Ok(()) => return Ok(SendOutcome::Delivered),
            Err(msg) => msg,
        };
        if buffer.len() < self.capacity {
            if urgent {
                buffer.push_front(msg);
            } else {
                buffer.push_back(msg);
            }
            return Ok(SendOutcome::Buffered);
        }
        let Some(timeout) = timeout else {
            return Err(CoreError::QueueFull {
                capacity: self.capacity,
            });
        };
        // Urgency is a buffer-placement property; a blocked sender queues
        // in arrival (or priority) order like any other waiter.
        thread.wait.park_payload(msg);
        self.senders.enqueue(sys, thread, timeout);
        drop(buffer);
        Ok(SendOutcome::Enqueued)
    }

    /// Append a message. `timeout: None` means fail instead of blocking.
    pub fn send(
        &self,
        sys: &System,
        thread: &Arc<Thread>,
        msg: Vec<u8>,
        timeout: Option<Timeout>,
    ) -> CoreResult<SendOutcome> {
        self.send_inner(sys, thread, msg, false, timeout)
    }

    /// Prepend a message so it is received before everything buffered.
    pub fn send_urgent(
        &self,
        sys: &System,
        thread: &Arc<Thread>,
        msg: Vec<u8>,
        timeout: Option<Timeout>,
    ) -> CoreResult<SendOutcome> {
        self.send_inner(sys, thread, msg, true, timeout)
    }

    /// Deliver one copy to every waiting receiver; nothing is buffered.
    pub fn broadcast(&self, sys: &System, msg: &[u8]) -> CoreResult<usize> {
        if msg.len() > self.max_size {
            return Err(CoreError::InvalidConfig {
                reason: "message exceeds maximum size",
            });
        }
        let _buffer = self.buffer.lock();
        let mut count = 0;
        while self.try_hand_off(sys, msg.to_vec()).is_ok() {
            count += 1;
        }
        Ok(count)
    }

    /// Take the first message. `timeout: None` means fail instead of
    /// blocking; otherwise the caller is enqueued and the payload arrives
    /// through `thread.take_message()` once its wait is satisfied.
    pub fn receive(
        &self,
        sys: &System,
        thread: &Arc<Thread>,
        timeout: Option<Timeout>,
    ) -> CoreResult<Receive> {
        let mut buffer = self.buffer.lock();
        if let Some(msg) = buffer.pop_front() {
            // A freed slot unblocks the first waiting sender.
            if let Some(sid) = self.senders.surrender(sys) {
                if let Some(sender) = sys.thread_opt(sid) {
                    if let Some(parked) = sender.take_message() {
                        buffer.push_back(parked);
                    }
                }
            }
            return Ok(Receive::Message(msg));
        }
        let Some(timeout) = timeout else {
            return Err(CoreError::Unsatisfied);
        };
        self.receivers.enqueue(sys, thread, timeout);
        drop(buffer);
        Ok(Receive::Enqueued)
    }

    /// Discard all buffered messages; returns how many.
    pub fn purge(&self) -> usize {
        let mut buffer = self.buffer.lock();
        let count = buffer.len();
        buffer.clear();
        count
    }

    /// Deletion: flush both waiter queues and drop the buffer.
    pub fn delete(&self, sys: &System) -> usize {
        let flushed = self.receivers.flush(sys) + self.senders.flush(sys);
        self.purge();
        flushed
    }
}
