//! rtcore: deterministic scheduling and synchronization engine
//!
//! The thread, scheduler and synchronization core of a real-time executive:
//! pluggable priority-driven schedulers over partitioned processor sets,
//! blocking thread queues with a race-free intent-to-block handshake, and
//! mutexes with priority-inversion-avoidance protocols.
//!
//! The crate is freestanding (`no_std` + `alloc`) and hardware-agnostic:
//! context switching, interrupt wiring and timers stay outside; the engine
//! decides who runs where and reports the switches to perform.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod percpu;
pub mod sched;
pub mod sync;
pub mod system;
pub mod thread;

pub use config::{Algorithm, SchedulerConfig, SystemConfig};
pub use error::{CoreError, CoreResult};
pub use percpu::{CpuId, PerCpu, THREAD_NONE};
pub use sched::{CpuMask, Priority, Scheduler, SchedulerId};
pub use sync::{
    Acquire, Condvar, Discipline, MessageQueue, Mutex, MutexProtocol, Nesting, Obtain, Receive,
    Semaphore, SendOutcome, ThreadQueue, Timeout,
};
pub use system::{Switch, System};
pub use thread::{Thread, ThreadId, WaitState};
