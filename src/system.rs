//! System hub
//!
//! Owns the thread registry, the scheduler table and the per-processor
//! control blocks, and orchestrates everything that crosses subsystem
//! boundaries: thread lifecycle, priority recompute, migration with the
//! ask-for-help protocol, and the dispatch cycle.
//!
//! Ownership is directional. The registry holds the only strong references
//! to threads; schedulers and queues store ids and look threads up through
//! `thread_opt`, so deleting a thread can never leave a reference cycle.
//!
//! Lock order: synchronization-object state, then queue lock, then
//! scheduler lock, then node state. The registry read lock nests anywhere;
//! the write lock is never held across a scheduler call.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use spin::{Mutex as SpinMutex, RwLock};

use crate::config::{Algorithm, SystemConfig};
use crate::error::{CoreError, CoreResult};
use crate::percpu::{CpuId, PerCpu, PerCpuSet, THREAD_NONE};
use crate::sched::affinity::CpuMask;
use crate::sched::edf::Edf;
use crate::sched::fixed_priority::FixedPriority;
use crate::sched::priority::Priority;
use crate::sched::smp::{SmpPolicy, SmpScheduler};
use crate::sched::{Scheduler, SchedulerId};
use crate::sync::mutex::{propagate_boost, recompute_effective, MutexProtocol};
use crate::sync::thread_queue::ThreadQueue;
use crate::thread::state::StateSet;
use crate::thread::{Thread, ThreadId};

/// One context switch decided by a dispatch cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    pub cpu: CpuId,
    pub previous: ThreadId,
    pub next: ThreadId,
}

pub struct System {
    config: SystemConfig,
    percpu: PerCpuSet,
    schedulers: Vec<Arc<dyn Scheduler>>,
    /// Governing scheduler of each processor
    cpu_owner: Vec<SchedulerId>,
    /// The only strong references to threads in the whole system
    threads: RwLock<HashMap<ThreadId, Arc<Thread>>>,
    next_id: AtomicU64,
    /// Serializes cross-scheduler moves; never held across a dispatch
    migration: SpinMutex<()>,
}

impl System {
    /// Bring the system up: validate the topology, build the scheduler
    /// table, and start one idle thread per processor.
    pub fn new(config: SystemConfig) -> CoreResult<Self> {
        config.validate()?;

        let mut schedulers: Vec<Arc<dyn Scheduler>> = Vec::new();
        let mut cpu_owner = alloc::vec![0; config.cpu_count];
        for (id, cfg) in config.schedulers.iter().enumerate() {
            let scheduler: Arc<dyn Scheduler> = match cfg.algorithm {
                Algorithm::FixedPriority => {
                    Arc::new(FixedPriority::new(id, &cfg.name, cfg.cpus[0]))
                }
                Algorithm::Edf => Arc::new(Edf::new(id, &cfg.name, cfg.cpus[0])),
                Algorithm::FixedPrioritySmp => Arc::new(SmpScheduler::new(
                    id,
                    &cfg.name,
                    SmpPolicy::FixedPriority,
                    cfg.cpus.clone(),
                )),
                Algorithm::EdfSmp => Arc::new(SmpScheduler::new(
                    id,
                    &cfg.name,
                    SmpPolicy::Edf,
                    cfg.cpus.clone(),
                )),
            };
            for &cpu in &cfg.cpus {
                cpu_owner[cpu] = id;
            }
            schedulers.push(scheduler);
        }

        let sys = Self {
            percpu: PerCpuSet::new(config.cpu_count),
            schedulers,
            cpu_owner,
            threads: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            migration: SpinMutex::new(()),
            config,
        };

        // Idle threads: always ready, the fallback heir of every processor.
        for cpu in 0..sys.config.cpu_count {
            let id = sys.next_id.fetch_add(1, Ordering::Relaxed);
            let scheduler = sys.cpu_owner[cpu];
            let idle = Arc::new(Thread::new(id, "idle", Priority::IDLE, scheduler));
            idle.set_affinity_mask(CpuMask::single(cpu));
            sys.threads.write().insert(id, idle.clone());
            sys.schedulers[scheduler].attach(&sys, &idle);
            idle.clear_state(StateSet::DORMANT);
            sys.schedulers[scheduler].unblock(&sys, &idle);
            let pc = sys.percpu.get(cpu);
            pc.set_executing(pc.heir());
            pc.clear_dispatch_needed();
        }
        log::info!(
            "[SYS] up: {} cpus, {} schedulers",
            sys.config.cpu_count,
            sys.schedulers.len()
        );
        Ok(sys)
    }

    pub fn cpu_count(&self) -> usize {
        self.config.cpu_count
    }

    pub fn percpu(&self, cpu: CpuId) -> &PerCpu {
        self.percpu.get(cpu)
    }

    pub fn scheduler(&self, id: SchedulerId) -> CoreResult<Arc<dyn Scheduler>> {
        self.schedulers
            .get(id)
            .cloned()
            .ok_or(CoreError::NotConfigured { scheduler: id })
    }

    /// The scheduler a thread currently belongs to
    pub fn scheduler_of(&self, thread: &Arc<Thread>) -> Arc<dyn Scheduler> {
        self.schedulers[thread.scheduler()].clone()
    }

    pub fn thread_opt(&self, id: ThreadId) -> Option<Arc<Thread>> {
        self.threads.read().get(&id).cloned()
    }

    pub fn thread(&self, id: ThreadId) -> CoreResult<Arc<Thread>> {
        self.thread_opt(id)
            .ok_or(CoreError::ThreadNotFound { thread: id })
    }

    pub fn thread_count(&self) -> usize {
        self.threads.read().len()
    }

    // ----- thread lifecycle ------------------------------------------------

    /// Create a dormant thread attached to `scheduler`.
    pub fn create_thread(
        &self,
        name: &str,
        priority: Priority,
        scheduler: SchedulerId,
    ) -> CoreResult<Arc<Thread>> {
        if scheduler >= self.schedulers.len() {
            return Err(CoreError::NotConfigured { scheduler });
        }
        // Limit check and insert under one write-lock critical section, so
        // concurrent creates cannot both pass the check.
        let thread = {
            let mut threads = self.threads.write();
            if threads.len() >= self.config.max_threads {
                return Err(CoreError::TooManyThreads {
                    max: self.config.max_threads,
                });
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let thread = Arc::new(Thread::new(id, name, priority, scheduler));
            threads.insert(id, thread.clone());
            thread
        };
        self.schedulers[scheduler].attach(self, &thread);
        log::debug!(
            "[SYS] created thread {} '{}' prio {}",
            thread.id(),
            name,
            priority
        );
        Ok(thread)
    }

    /// Make a dormant thread ready.
    pub fn start_thread(&self, id: ThreadId) -> CoreResult<()> {
        let thread = self.thread(id)?;
        let prev = thread.clear_state(StateSet::DORMANT);
        if !prev.contains(StateSet::DORMANT) {
            return Err(CoreError::InvalidState {
                thread: id,
                reason: "start of a non-dormant thread",
            });
        }
        if thread.is_ready() {
            self.scheduler_of(&thread).unblock(self, &thread);
        }
        Ok(())
    }

    pub fn suspend_thread(&self, id: ThreadId) -> CoreResult<()> {
        let thread = self.thread(id)?;
        let prev = thread.set_state(StateSet::SUSPENDED);
        if prev.is_ready() {
            self.scheduler_of(&thread).block(self, &thread);
        }
        Ok(())
    }

    pub fn resume_thread(&self, id: ThreadId) -> CoreResult<()> {
        let thread = self.thread(id)?;
        let prev = thread.clear_state(StateSet::SUSPENDED);
        if prev.contains(StateSet::SUSPENDED) && thread.is_ready() {
            self.scheduler_of(&thread).unblock(self, &thread);
        }
        Ok(())
    }

    /// Delete a thread for good.
    ///
    /// Fails while the thread still owns a lock; a queued wait entry goes
    /// stale and is discarded by the next release on that queue.
    pub fn delete_thread(&self, id: ThreadId) -> CoreResult<()> {
        let thread = self.thread(id)?;
        if !thread.held.lock().is_empty() {
            return Err(CoreError::ResourceInUse { thread: id });
        }
        thread.set_state(StateSet::TERMINATING);
        self.scheduler_of(&thread).detach(self, &thread);
        for pc in self.percpu.iter() {
            pc.remove_needs_help(id);
        }
        self.threads.write().remove(&id);
        log::debug!("[SYS] deleted thread {}", id);
        Ok(())
    }

    // ----- priority --------------------------------------------------------

    /// Change a thread's base priority; its effective priority follows
    /// unless a protocol boost keeps it higher.
    pub fn set_priority(&self, id: ThreadId, priority: Priority) -> CoreResult<()> {
        let thread = self.thread(id)?;
        thread.set_base_priority(priority);
        recompute_effective(self, &thread);

        // A raised waiter pushes its new urgency onto the lock owner.
        if let Some(blocked_on) = thread.wait.blocked_on() {
            if blocked_on.protocol == MutexProtocol::Inherit {
                if let Some(owner) = blocked_on.owner().and_then(|t| self.thread_opt(t)) {
                    propagate_boost(self, owner, thread.current_priority());
                }
            }
        }
        Ok(())
    }

    /// Install a new effective priority everywhere it is consulted: the
    /// thread itself, its scheduler position, and any wait-queue position.
    pub(crate) fn apply_priority(&self, thread: &Arc<Thread>, priority: Priority) {
        thread.set_current_priority(priority);
        self.scheduler_of(thread).set_priority(self, thread, priority);

        let queue = thread
            .wait
            .location()
            .lock()
            .as_ref()
            .map(|loc| loc.queue.clone());
        if let Some(queue) = queue {
            queue.requeue(thread, priority);
        }
    }

    /// Raise (never lower) a thread's effective priority.
    pub(crate) fn boost_priority(&self, thread: &Arc<Thread>, priority: Priority) {
        if priority.is_more_urgent_than(thread.current_priority()) {
            self.apply_priority(thread, priority);
        }
    }

    pub fn yield_now(&self, id: ThreadId) -> CoreResult<()> {
        let thread = self.thread(id)?;
        self.scheduler_of(&thread).yield_now(self, &thread);
        Ok(())
    }

    // ----- deadlines -------------------------------------------------------

    pub fn release_job(&self, id: ThreadId, deadline: u64) -> CoreResult<()> {
        let thread = self.thread(id)?;
        self.scheduler_of(&thread).release_job(self, &thread, deadline);
        Ok(())
    }

    pub fn cancel_job(&self, id: ThreadId) -> CoreResult<()> {
        let thread = self.thread(id)?;
        self.scheduler_of(&thread).cancel_job(self, &thread);
        Ok(())
    }

    // ----- affinity and migration ------------------------------------------

    /// Restrict a thread to a processor subset. The mask must keep at least
    /// one of its scheduler's processors.
    pub fn set_affinity(&self, id: ThreadId, mask: CpuMask) -> CoreResult<()> {
        let thread = self.thread(id)?;
        let scheduler = self.scheduler_of(&thread);
        if !scheduler.cpus().iter().any(|&c| mask.is_set(c)) {
            return Err(CoreError::InvalidConfig {
                reason: "affinity excludes every processor of the scheduler",
            });
        }
        thread.set_affinity_mask(mask);
        scheduler.reconsider(self, &thread);
        Ok(())
    }

    /// Move a thread to another scheduler.
    ///
    /// A ready thread goes through the ask-for-help protocol: if the target
    /// can schedule it immediately the source node is retired and the move
    /// is confirmed; otherwise the home node is reassigned directly.
    pub fn set_scheduler(&self, id: ThreadId, target: SchedulerId) -> CoreResult<()> {
        let thread = self.thread(id)?;
        let source_id = thread.scheduler();
        if source_id == target {
            return Ok(());
        }
        let destination = self.scheduler(target)?;
        let source = self.scheduler(source_id)?;
        if !destination.cpus().iter().any(|&c| thread.affinity().is_set(c)) {
            return Err(CoreError::InvalidConfig {
                reason: "affinity excludes every processor of the target",
            });
        }

        let _guard = self.migration.lock();
        let was_ready = thread.is_ready();
        thread.set_state(StateSet::TRANSIENT);

        if was_ready && destination.ask_for_help(self, &thread) {
            // Hot path: the destination created and scheduled a transient
            // node; retire the source placement now.
            source.withdraw(self, &thread);
            thread.confirm_migration();
            return Ok(());
        }

        // Cold path: reassign the home node directly.
        source.withdraw(self, &thread);
        thread.home_node().set_scheduler(target);
        destination.attach(self, &thread);
        thread.clear_state(StateSet::TRANSIENT);
        if was_ready {
            destination.unblock(self, &thread);
        }
        log::debug!(
            "[SYS] thread {} moved from scheduler {} to {}",
            id,
            source_id,
            target
        );
        Ok(())
    }

    /// Retry placement of a thread that could not be scheduled anywhere.
    ///
    /// Returns true when the thread ended up scheduled; false re-parks it.
    pub(crate) fn retry_placement(&self, thread: &Arc<Thread>) -> bool {
        let scheduler = self.scheduler_of(thread);
        if scheduler.ask_for_help(self, thread) {
            return true;
        }
        let affinity = thread.affinity();
        let cpu = scheduler
            .cpus()
            .iter()
            .find(|&&c| affinity.is_set(c))
            .or_else(|| scheduler.cpus().first());
        if let Some(&cpu) = cpu {
            self.percpu(cpu).push_needs_help(thread.id());
        }
        false
    }

    // ----- dispatch --------------------------------------------------------

    /// Perform one dispatch cycle on `cpu`.
    ///
    /// No-op while dispatch is disabled or the processor is in interrupt
    /// context. Parked placement retries run first; then the heir, if it
    /// differs from the executing thread, becomes the executing thread.
    pub fn dispatch(&self, cpu: CpuId) -> Option<Switch> {
        let pc = self.percpu(cpu);
        if pc.dispatch_disable_level() > 0 || pc.interrupt_nest_level() > 0 {
            return None;
        }

        for id in pc.take_needs_help() {
            if let Some(thread) = self.thread_opt(id) {
                if thread.is_ready() {
                    self.retry_placement(&thread);
                }
            }
        }

        if !pc.is_dispatch_necessary() {
            return None;
        }
        pc.clear_dispatch_needed();
        let previous = pc.executing();
        let next = pc.heir();
        if next == previous || next == THREAD_NONE {
            return None;
        }
        pc.set_executing(next);
        if let Some(thread) = self.thread_opt(next) {
            if thread.state().contains(StateSet::TRANSIENT) {
                thread.confirm_migration();
            }
        }
        log::trace!("[SYS] cpu {} switch {} -> {}", cpu, previous, next);
        Some(Switch {
            cpu,
            previous,
            next,
        })
    }

    pub fn interrupt_enter(&self, cpu: CpuId) -> u32 {
        self.percpu(cpu).interrupt_enter()
    }

    /// Leave interrupt context; true means a dispatch is owed at thread
    /// level and the caller should run `dispatch(cpu)` now.
    pub fn interrupt_exit(&self, cpu: CpuId) -> bool {
        self.percpu(cpu).interrupt_exit()
    }

    // ----- timer callback --------------------------------------------------

    /// Watchdog expiry for a blocked thread. Harmless if the wait was
    /// already decided.
    pub fn on_timeout(&self, id: ThreadId) -> bool {
        let Some(thread) = self.thread_opt(id) else {
            return false;
        };
        let queue = thread
            .wait
            .location()
            .lock()
            .as_ref()
            .map(|loc| loc.queue.clone());
        match queue {
            Some(shared) => ThreadQueue::from_ref(shared).on_timeout(self, &thread),
            None => false,
        }
    }
}
