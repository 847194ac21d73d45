use alloc::vec::Vec;

use super::Reading;

/// Fixed-capacity ring of the most recent readings, oldest first.
///
/// `head` indexes the oldest entry; the slot for the next push is
/// `(head + len) % capacity`. Once `len == capacity` every push overwrites the
/// oldest entry and advances `head`.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    slots: Vec<Reading>,
    capacity: usize,
    head: usize,
    len: usize,
}

impl HistoryBuffer {
    /// # Panics
    ///
    /// Panics if `capacity` is zero; configuration validation rejects that.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "history capacity must be non-zero");
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            head: 0,
            len: 0,
        }
    }

    /// Push a reading, returning the entry it evicted when the ring was full.
    pub fn push(&mut self, reading: Reading) -> Option<Reading> {
        if self.len < self.capacity {
            let index = (self.head + self.len) % self.capacity;
            if index == self.slots.len() {
                self.slots.push(reading);
            } else {
                self.slots[index] = reading;
            }
            self.len += 1;
            None
        } else {
            let evicted = core::mem::replace(&mut self.slots[self.head], reading);
            self.head = (self.head + 1) % self.capacity;
            Some(evicted)
        }
    }

    /// Entry `index` counted from the oldest.
    pub fn get(&self, index: usize) -> Option<&Reading> {
        if index >= self.len {
            return None;
        }
        self.slots.get((self.head + index) % self.capacity)
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.len.checked_sub(1).and_then(|last| self.get(last))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Centi;
    use proptest::prelude::*;

    fn reading(timestamp: u32) -> Reading {
        Reading::new(timestamp, 400 + timestamp as u16, Centi(2000), Centi(4000))
    }

    fn timestamps(buffer: &HistoryBuffer) -> Vec<u32> {
        buffer.iter().map(|r| r.timestamp).collect()
    }

    #[test]
    fn test_wraparound_keeps_most_recent() {
        let mut buffer = HistoryBuffer::new(4);
        for t in 1..=5 {
            buffer.push(reading(t));
        }
        assert_eq!(timestamps(&buffer), [2, 3, 4, 5], "oldest entry is overwritten");
        assert_eq!(buffer.latest().map(|r| r.timestamp), Some(5));
        assert!(buffer.is_full());
    }

    #[test]
    fn test_push_reports_eviction() {
        let mut buffer = HistoryBuffer::new(2);
        assert_eq!(buffer.push(reading(1)), None);
        assert_eq!(buffer.push(reading(2)), None);
        assert_eq!(buffer.push(reading(3)).map(|r| r.timestamp), Some(1));
    }

    #[test]
    fn test_clear_then_refill() {
        let mut buffer = HistoryBuffer::new(3);
        for t in 1..=7 {
            buffer.push(reading(t));
        }
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.latest(), None);

        buffer.push(reading(10));
        buffer.push(reading(11));
        assert_eq!(timestamps(&buffer), [10, 11], "stale slots are not visible");
        assert_eq!(buffer.get(2), None);
    }

    proptest! {
        #[test]
        fn test_retains_last_n_in_order(capacity in 1usize..32, extra in 0usize..64) {
            let mut buffer = HistoryBuffer::new(capacity);
            let total = capacity + extra;
            for t in 0..total {
                buffer.push(reading(t as u32));
            }
            let expected: Vec<u32> = (extra..total).map(|t| t as u32).collect();
            prop_assert_eq!(buffer.len(), capacity);
            prop_assert_eq!(timestamps(&buffer), expected);
        }
    }
}
