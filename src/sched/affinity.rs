//! Affinity - processor affinity masks
//!
//! Controls which processors a thread may be scheduled on.

use crate::percpu::CpuId;

/// Processor affinity mask (64 processors max)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuMask(u64);

impl CpuMask {
    /// Create empty mask
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Create mask allowing all processors
    pub const fn all() -> Self {
        Self(u64::MAX)
    }

    /// Create mask for a single processor
    pub const fn single(cpu: CpuId) -> Self {
        Self(1 << (cpu & 63))
    }

    /// Set processor bit
    pub fn set(&mut self, cpu: CpuId) {
        self.0 |= 1 << (cpu & 63);
    }

    /// Clear processor bit
    pub fn clear(&mut self, cpu: CpuId) {
        self.0 &= !(1 << (cpu & 63));
    }

    /// Check if processor is set
    pub fn is_set(&self, cpu: CpuId) -> bool {
        (self.0 & (1 << (cpu & 63))) != 0
    }

    /// Count set processors
    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Get first set processor
    pub fn first(&self) -> Option<CpuId> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as CpuId)
        }
    }

    /// Intersect with another mask
    pub fn intersect(&self, other: &Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Union with another mask
    pub fn union(&self, other: &Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Raw bits, for atomic storage
    pub(crate) const fn bits(self) -> u64 {
        self.0
    }

    /// Rebuild from raw bits
    pub(crate) const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Iterate over set processors, lowest first
    pub fn iter(&self) -> impl Iterator<Item = CpuId> + '_ {
        let bits = self.0;
        (0..64usize).filter(move |cpu| (bits & (1 << cpu)) != 0)
    }
}

impl Default for CpuMask {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clear_roundtrip() {
        let mut mask = CpuMask::empty();
        mask.set(3);
        mask.set(11);
        assert!(mask.is_set(3));
        assert!(mask.is_set(11));
        assert!(!mask.is_set(4));
        assert_eq!(mask.count(), 2);
        assert_eq!(mask.first(), Some(3));

        mask.clear(3);
        assert_eq!(mask.first(), Some(11));
    }

    #[test]
    fn iter_is_ascending() {
        let mask = CpuMask::single(5).union(&CpuMask::single(1)).union(&CpuMask::single(9));
        let cpus: alloc::vec::Vec<_> = mask.iter().collect();
        assert_eq!(cpus, [1, 5, 9]);
    }
}
