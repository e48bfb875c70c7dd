//! Priority Index
//!
//! Two-level bitmap (16-bit major word, 16 x 16-bit minor words) over 256
//! FIFO rings, giving O(1) insert/extract/highest-ready independent of how
//! many threads are ready. Equal-priority ties resolve in arrival order
//! through the per-level ring.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::sched::priority::Priority;
use crate::thread::ThreadId;

/// Ready index over the full priority space
pub struct PriorityBitmap {
    major: u16,
    minor: [u16; 16],
    rings: Vec<VecDeque<ThreadId>>,
}

impl PriorityBitmap {
    pub fn new() -> Self {
        let mut rings = Vec::with_capacity(Priority::LEVELS);
        rings.resize_with(Priority::LEVELS, VecDeque::new);
        Self {
            major: 0,
            minor: [0; 16],
            rings,
        }
    }

    fn split(priority: Priority) -> (usize, usize) {
        let raw = priority.raw() as usize;
        (raw >> 4, raw & 0xf)
    }

    /// Insert at the back of the priority's FIFO ring
    pub fn insert(&mut self, thread: ThreadId, priority: Priority) {
        let (major, minor) = Self::split(priority);
        self.rings[priority.raw() as usize].push_back(thread);
        self.minor[major] |= 1 << minor;
        self.major |= 1 << major;
    }

    /// Insert at the front of the ring (a preempted thread keeps its turn)
    pub fn insert_front(&mut self, thread: ThreadId, priority: Priority) {
        let (major, minor) = Self::split(priority);
        self.rings[priority.raw() as usize].push_front(thread);
        self.minor[major] |= 1 << minor;
        self.major |= 1 << major;
    }

    /// Remove a specific thread from its priority ring.
    ///
    /// Returns false if the thread was not present at that priority.
    pub fn extract(&mut self, thread: ThreadId, priority: Priority) -> bool {
        let ring = &mut self.rings[priority.raw() as usize];
        let Some(pos) = ring.iter().position(|&t| t == thread) else {
            return false;
        };
        ring.remove(pos);
        if ring.is_empty() {
            let (major, minor) = Self::split(priority);
            self.minor[major] &= !(1 << minor);
            if self.minor[major] == 0 {
                self.major &= !(1 << major);
            }
        }
        true
    }

    /// Most urgent populated priority, if any
    pub fn highest_ready(&self) -> Option<Priority> {
        if self.major == 0 {
            return None;
        }
        let major = self.major.trailing_zeros() as usize;
        let minor = self.minor[major].trailing_zeros() as usize;
        Some(Priority::from_raw(((major << 4) | minor) as u8))
    }

    /// First thread of the most urgent ring, without removing it
    pub fn peek_highest(&self) -> Option<(ThreadId, Priority)> {
        let priority = self.highest_ready()?;
        let thread = *self.rings[priority.raw() as usize].front()?;
        Some((thread, priority))
    }

    /// Remove and return the first thread of the most urgent ring
    pub fn pop_highest(&mut self) -> Option<(ThreadId, Priority)> {
        let priority = self.highest_ready()?;
        let ring = &mut self.rings[priority.raw() as usize];
        let thread = ring.pop_front()?;
        if ring.is_empty() {
            let (major, minor) = Self::split(priority);
            self.minor[major] &= !(1 << minor);
            if self.minor[major] == 0 {
                self.major &= !(1 << major);
            }
        }
        Some((thread, priority))
    }

    pub fn is_empty(&self) -> bool {
        self.major == 0
    }

    pub fn len(&self) -> usize {
        self.rings.iter().map(|r| r.len()).sum()
    }
}

impl Default for PriorityBitmap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn prio(raw: u8) -> Priority {
        Priority::from_raw(raw)
    }

    #[test]
    fn highest_tracks_bitmap() {
        let mut index = PriorityBitmap::new();
        assert!(index.highest_ready().is_none());

        index.insert(1, prio(200));
        index.insert(2, prio(17));
        index.insert(3, prio(90));
        assert_eq!(index.highest_ready(), Some(prio(17)));

        assert!(index.extract(2, prio(17)));
        assert_eq!(index.highest_ready(), Some(prio(90)));

        assert!(index.extract(3, prio(90)));
        assert!(index.extract(1, prio(200)));
        assert!(index.is_empty());
    }

    #[test]
    fn equal_priority_is_fifo() {
        let mut index = PriorityBitmap::new();
        for id in 1..=5u64 {
            index.insert(id, prio(10));
        }
        for expected in 1..=5u64 {
            let (id, p) = index.pop_highest().unwrap();
            assert_eq!(id, expected);
            assert_eq!(p, prio(10));
        }
    }

    #[test]
    fn preempted_thread_keeps_its_turn() {
        let mut index = PriorityBitmap::new();
        index.insert(1, prio(10));
        index.insert(2, prio(10));
        index.insert_front(3, prio(10));
        assert_eq!(index.pop_highest().unwrap().0, 3);
    }

    #[test]
    fn extract_missing_is_false() {
        let mut index = PriorityBitmap::new();
        index.insert(1, prio(10));
        assert!(!index.extract(1, prio(11)));
        assert!(!index.extract(2, prio(10)));
        assert!(index.extract(1, prio(10)));
    }

    proptest! {
        #[test]
        fn pop_order_is_nondecreasing_urgency(raws in proptest::collection::vec(0u8..=255, 1..64)) {
            let mut index = PriorityBitmap::new();
            for (id, raw) in raws.iter().enumerate() {
                index.insert(id as ThreadId, prio(*raw));
            }
            let mut last = 0u8;
            while let Some((_, p)) = index.pop_highest() {
                prop_assert!(p.raw() >= last);
                last = p.raw();
            }
            prop_assert!(index.is_empty());
        }
    }
}
