//! Synchronization objects built on the Thread Queue

pub mod condvar;
pub mod msg_queue;
pub mod mutex;
pub mod semaphore;
pub mod thread_queue;

pub use condvar::Condvar;
pub use msg_queue::{MessageQueue, Receive, SendOutcome};
pub use mutex::{Mutex, MutexProtocol, Nesting, Obtain};
pub use semaphore::{Acquire, Semaphore};
pub use thread_queue::{Discipline, ThreadQueue, Timeout};
