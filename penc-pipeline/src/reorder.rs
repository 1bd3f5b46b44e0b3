//! Restoring sequence order behind parallel stages.

use crate::error::{PipelineError, Result};
use std::collections::BTreeMap;

/// Buffer that releases items strictly in key order.
///
/// Workers of a parallel stage finish in any order. The consumer pushes each
/// result under its sequence key and pops only while the next expected key
/// is present.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    pending: BTreeMap<u64, T>,
    next: u64,
}

impl<T> ReorderBuffer<T> {
    /// Create a buffer whose first released key is `first`.
    pub fn new(first: u64) -> Self {
        Self {
            pending: BTreeMap::new(),
            next: first,
        }
    }

    /// Park an item under `key`.
    ///
    /// Keys already released or already pending are rejected.
    pub fn push(&mut self, key: u64, item: T) -> Result<()> {
        if key < self.next {
            return Err(PipelineError::InvalidConfig(format!(
                "sequence key {key} already released (next is {})",
                self.next
            )));
        }
        if self.pending.contains_key(&key) {
            return Err(PipelineError::InvalidConfig(format!("duplicate sequence key {key}")));
        }
        self.pending.insert(key, item);
        Ok(())
    }

    /// Pop the next item in sequence, if it has arrived.
    pub fn pop(&mut self) -> Option<T> {
        let item = self.pending.remove(&self.next)?;
        self.next += 1;
        Some(item)
    }

    /// Pop every item that is ready, in order.
    pub fn pop_ready(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.pop()).collect()
    }

    /// Key of the next item to be released.
    pub fn next_key(&self) -> u64 {
        self.next
    }

    /// Number of parked items.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if nothing is parked.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remove every parked item, in key order, regardless of gaps.
    pub fn drain(&mut self) -> Vec<(u64, T)> {
        std::mem::take(&mut self.pending).into_iter().collect()
    }
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_releases_in_key_order() {
        let mut buffer = ReorderBuffer::new(0);
        buffer.push(2, "c").unwrap();
        buffer.push(1, "b").unwrap();
        assert_eq!(buffer.pop(), None);

        buffer.push(0, "a").unwrap();
        assert_eq!(buffer.pop_ready(), vec!["a", "b", "c"]);
        assert_eq!(buffer.next_key(), 3);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_gap_holds_back_later_items() {
        let mut buffer = ReorderBuffer::new(10);
        buffer.push(10, 'x').unwrap();
        buffer.push(12, 'z').unwrap();
        assert_eq!(buffer.pop_ready(), vec!['x']);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.drain(), vec![(12, 'z')]);
    }

    #[test]
    fn test_rejects_stale_and_duplicate_keys() {
        let mut buffer = ReorderBuffer::new(0);
        buffer.push(0, ()).unwrap();
        buffer.push(1, ()).unwrap();
        assert!(buffer.push(1, ()).is_err());
        buffer.pop();
        assert!(buffer.push(0, ()).is_err());
    }
}
