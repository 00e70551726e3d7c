//! Wrapping id counter shared across threads.

use parking_lot::Mutex;

const START: u32 = 1;
const MAX: u32 = u32::MAX / 4;

/// Hands out ids starting at 1, wrapping back to 1 after `u32::MAX / 4`.
/// Zero is never returned; callers use it as a "no id" sentinel.
pub struct IdCounter {
    value: Mutex<u32>,
}

impl IdCounter {
    pub fn new() -> Self {
        IdCounter {
            value: Mutex::new(START),
        }
    }

    /// Returns the next id.
    pub fn next_id(&self) -> u32 {
        let mut value = self.value.lock();
        let id = *value;
        *value = if id >= MAX { START } else { id + 1 };
        id
    }
}

impl Default for IdCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_at_one_and_increments() {
        let counter = IdCounter::new();
        assert_eq!(counter.next_id(), 1);
        assert_eq!(counter.next_id(), 2);
        assert_eq!(counter.next_id(), 3);
    }

    #[test]
    fn wraps_back_to_one() {
        let counter = IdCounter::new();
        *counter.value.lock() = MAX;
        assert_eq!(counter.next_id(), MAX);
        assert_eq!(counter.next_id(), START);
    }

    #[test]
    fn concurrent_ids_are_distinct() {
        let counter = Arc::new(IdCounter::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                (0..250).map(|_| counter.next_id()).collect::<Vec<_>>()
            }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(id >= 1);
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 1000);
    }
}
