//! Thread subsystem

pub mod state;
#[allow(clippy::module_inception)]
pub mod thread;

pub use state::{StateSet, WaitState};
pub use thread::{Context, Thread, ThreadId};
