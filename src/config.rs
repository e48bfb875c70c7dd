//! System configuration
//!
//! Scheduler topology is fixed at startup: every processor is governed by
//! exactly one scheduler instance, checked by `validate` before the system
//! comes up.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{CoreError, CoreResult};
use crate::percpu::CpuId;

/// Scheduling algorithm of one scheduler instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Fixed-priority, one processor
    FixedPriority,
    /// Earliest-deadline-first, one processor
    Edf,
    /// Fixed-priority across a processor set, with migration
    FixedPrioritySmp,
    /// EDF across a processor set, with migration
    EdfSmp,
}

impl Algorithm {
    pub fn is_smp(self) -> bool {
        matches!(self, Algorithm::FixedPrioritySmp | Algorithm::EdfSmp)
    }
}

/// One scheduler instance and the processors it governs
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub name: String,
    pub algorithm: Algorithm,
    pub cpus: Vec<CpuId>,
}

impl SchedulerConfig {
    pub fn new(name: &str, algorithm: Algorithm, cpus: &[CpuId]) -> Self {
        Self {
            name: String::from(name),
            algorithm,
            cpus: cpus.to_vec(),
        }
    }
}

/// Startup configuration for the whole system
#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub cpu_count: usize,
    pub max_threads: usize,
    pub schedulers: Vec<SchedulerConfig>,
}

impl SystemConfig {
    /// One fixed-priority scheduler over a single processor
    pub fn uniprocessor() -> Self {
        Self {
            cpu_count: 1,
            max_threads: 256,
            schedulers: alloc::vec![SchedulerConfig::new(
                "fp0",
                Algorithm::FixedPriority,
                &[0]
            )],
        }
    }

    /// One SMP fixed-priority scheduler over `cpus` processors
    pub fn smp(cpus: usize) -> Self {
        let set: Vec<CpuId> = (0..cpus).collect();
        Self {
            cpu_count: cpus,
            max_threads: 256,
            schedulers: alloc::vec![SchedulerConfig::new(
                "fp-smp",
                Algorithm::FixedPrioritySmp,
                &set
            )],
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.cpu_count == 0 {
            return Err(CoreError::InvalidConfig {
                reason: "at least one processor required",
            });
        }
        if self.max_threads == 0 {
            return Err(CoreError::InvalidConfig {
                reason: "max_threads must be nonzero",
            });
        }
        if self.schedulers.is_empty() {
            return Err(CoreError::InvalidConfig {
                reason: "at least one scheduler required",
            });
        }
        let mut owner = alloc::vec![false; self.cpu_count];
        for cfg in &self.schedulers {
            if cfg.name.is_empty() {
                return Err(CoreError::InvalidConfig {
                    reason: "scheduler name must be nonempty",
                });
            }
            if cfg.cpus.is_empty() {
                return Err(CoreError::InvalidConfig {
                    reason: "scheduler governs no processor",
                });
            }
            if !cfg.algorithm.is_smp() && cfg.cpus.len() != 1 {
                return Err(CoreError::InvalidConfig {
                    reason: "uniprocessor algorithm over several processors",
                });
            }
            for &cpu in &cfg.cpus {
                if cpu >= self.cpu_count {
                    return Err(CoreError::InvalidConfig {
                        reason: "processor index out of range",
                    });
                }
                if owner[cpu] {
                    return Err(CoreError::InvalidConfig {
                        reason: "processor governed by two schedulers",
                    });
                }
                owner[cpu] = true;
            }
        }
        if owner.iter().any(|&o| !o) {
            return Err(CoreError::InvalidConfig {
                reason: "processor left without a scheduler",
            });
        }
        Ok(())
    }
}
