//! Per-Processor Control and Dispatch Coordinator
//!
//! One `PerCpu` per configured processor, accessed by index, alive for the
//! whole process. Interior mutability throughout so every API takes `&self`
//! and may be called from any processor.
//!
//! Dispatch-disable nesting and interrupt nesting are tracked separately: a
//! context switch is never performed from interrupt context. The interrupt
//! epilogue reports whether a dispatch is owed once execution unwinds to
//! thread level.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

use crate::thread::ThreadId;

/// Processor index
pub type CpuId = usize;

/// No thread (thread ids start at 1)
pub const THREAD_NONE: ThreadId = 0;

/// Per-processor control block
pub struct PerCpu {
    /// Thread currently executing on this processor
    executing: AtomicU64,
    /// Thread this processor will run next once dispatch occurs
    heir: AtomicU64,
    /// While nonzero, scheduler state may change but the switch is deferred
    dispatch_disable: AtomicU32,
    /// Interrupt nesting, tracked separately from dispatch-disable
    isr_nest: AtomicU32,
    /// A reschedule should occur once dispatch is enabled again
    dispatch_needed: AtomicBool,
    /// Threads that could not be placed anywhere; retried FIFO at the next
    /// reschedule event on this processor
    needs_help: Mutex<VecDeque<ThreadId>>,
}

impl PerCpu {
    pub const fn new() -> Self {
        Self {
            executing: AtomicU64::new(THREAD_NONE),
            heir: AtomicU64::new(THREAD_NONE),
            dispatch_disable: AtomicU32::new(0),
            isr_nest: AtomicU32::new(0),
            dispatch_needed: AtomicBool::new(false),
            needs_help: Mutex::new(VecDeque::new()),
        }
    }

    pub fn executing(&self) -> ThreadId {
        self.executing.load(Ordering::Acquire)
    }

    pub fn heir(&self) -> ThreadId {
        self.heir.load(Ordering::Acquire)
    }

    pub(crate) fn set_executing(&self, thread: ThreadId) {
        self.executing.store(thread, Ordering::Release);
    }

    /// Install a new heir; requests dispatch if it differs from executing
    pub(crate) fn set_heir(&self, thread: ThreadId) {
        self.heir.store(thread, Ordering::Release);
        if thread != self.executing() {
            self.dispatch_needed.store(true, Ordering::Release);
        }
    }

    /// Heir differs from executing and a reschedule was requested
    pub fn is_dispatch_necessary(&self) -> bool {
        self.dispatch_needed.load(Ordering::Acquire) && self.heir() != self.executing()
    }

    /// Mark that a reschedule should occur once interrupts unwind
    pub fn request_dispatch(&self) {
        self.dispatch_needed.store(true, Ordering::Release);
    }

    pub(crate) fn clear_dispatch_needed(&self) {
        self.dispatch_needed.store(false, Ordering::Release);
    }

    /// Enter a dispatch-deferred section; returns the new nesting level
    pub fn dispatch_disable(&self) -> u32 {
        self.dispatch_disable.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Leave a dispatch-deferred section; returns the new nesting level.
    ///
    /// The caller should check `is_dispatch_necessary` when this hits zero.
    pub fn dispatch_enable(&self) -> u32 {
        let prev = self.dispatch_disable.fetch_sub(1, Ordering::AcqRel);
        crate::core_assert!(prev > 0, "dispatch enable without matching disable");
        prev - 1
    }

    pub fn dispatch_disable_level(&self) -> u32 {
        self.dispatch_disable.load(Ordering::Acquire)
    }

    pub fn interrupt_enter(&self) -> u32 {
        self.isr_nest.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Leave interrupt context.
    ///
    /// Returns true when execution has unwound to thread level and a
    /// deferred dispatch must now be performed. The switch itself never
    /// happens here.
    pub fn interrupt_exit(&self) -> bool {
        let prev = self.isr_nest.fetch_sub(1, Ordering::AcqRel);
        crate::core_assert!(prev > 0, "interrupt exit without matching enter");
        prev == 1 && self.dispatch_disable_level() == 0 && self.is_dispatch_necessary()
    }

    pub fn interrupt_nest_level(&self) -> u32 {
        self.isr_nest.load(Ordering::Acquire)
    }

    /// Record a thread whose placement failed everywhere
    pub(crate) fn push_needs_help(&self, thread: ThreadId) {
        let mut list = self.needs_help.lock();
        if !list.contains(&thread) {
            list.push_back(thread);
        }
    }

    pub(crate) fn take_needs_help(&self) -> VecDeque<ThreadId> {
        core::mem::take(&mut *self.needs_help.lock())
    }

    pub(crate) fn remove_needs_help(&self, thread: ThreadId) {
        let mut list = self.needs_help.lock();
        if let Some(pos) = list.iter().position(|&t| t == thread) {
            list.remove(pos);
        }
    }

    pub fn needs_help_len(&self) -> usize {
        self.needs_help.lock().len()
    }
}

impl Default for PerCpu {
    fn default() -> Self {
        Self::new()
    }
}

/// The per-processor control blocks of a system
pub struct PerCpuSet {
    cpus: Vec<PerCpu>,
}

impl PerCpuSet {
    pub fn new(count: usize) -> Self {
        let mut cpus = Vec::with_capacity(count);
        cpus.resize_with(count, PerCpu::new);
        Self { cpus }
    }

    pub fn get(&self, cpu: CpuId) -> &PerCpu {
        &self.cpus[cpu]
    }

    pub fn count(&self) -> usize {
        self.cpus.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PerCpu> {
        self.cpus.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heir_change_requests_dispatch() {
        let cpu = PerCpu::new();
        cpu.set_executing(1);
        cpu.set_heir(1);
        assert!(!cpu.is_dispatch_necessary());

        cpu.set_heir(2);
        assert!(cpu.is_dispatch_necessary());
    }

    #[test]
    fn disable_nesting_defers() {
        let cpu = PerCpu::new();
        assert_eq!(cpu.dispatch_disable(), 1);
        assert_eq!(cpu.dispatch_disable(), 2);
        assert_eq!(cpu.dispatch_enable(), 1);
        assert_eq!(cpu.dispatch_enable(), 0);
    }

    #[test]
    fn no_dispatch_from_interrupt_context() {
        let cpu = PerCpu::new();
        cpu.set_executing(1);

        cpu.interrupt_enter();
        cpu.interrupt_enter();
        cpu.set_heir(2);

        // Inner exit still inside an interrupt: no dispatch yet.
        assert!(!cpu.interrupt_exit());
        // Outermost exit at thread level: dispatch is owed.
        assert!(cpu.interrupt_exit());
    }

    #[test]
    fn needs_help_is_fifo_without_duplicates() {
        let cpu = PerCpu::new();
        cpu.push_needs_help(5);
        cpu.push_needs_help(6);
        cpu.push_needs_help(5);
        let list = cpu.take_needs_help();
        assert_eq!(list, [5, 6]);
        assert_eq!(cpu.needs_help_len(), 0);
    }
}
