//! Slot registry mapping stream ids to dense slot indices.
//!
//! Channels hand out a slot when a stream is added and address the stream
//! by that slot on the hot path, avoiding a hash lookup per send. Freed
//! slots are reused lowest-first; the slot array doubles when full.

use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

struct Entry<T> {
    id: i32,
    value: T,
}

struct Inner<T> {
    slots: Vec<Option<Entry<T>>>,
    by_id: HashMap<i32, usize>,
    free: BinaryHeap<Reverse<usize>>,
}

pub struct StreamMap<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> StreamMap<T> {
    pub fn new() -> Self {
        Self::with_capacity(2)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        let mut free = BinaryHeap::with_capacity(capacity);
        for i in 0..capacity {
            slots.push(None);
            free.push(Reverse(i));
        }
        StreamMap {
            inner: Mutex::new(Inner {
                slots,
                by_id: HashMap::new(),
                free,
            }),
        }
    }

    /// Inserts `value` under `id` and returns the assigned slot.
    /// Returns `None` if the id is already present; nothing is mutated.
    pub fn add(&self, id: i32, value: T) -> Option<usize> {
        let mut inner = self.inner.lock();
        if inner.by_id.contains_key(&id) {
            return None;
        }
        if inner.free.is_empty() {
            let len = inner.slots.len();
            for i in len..len * 2 {
                inner.slots.push(None);
                inner.free.push(Reverse(i));
            }
        }
        let Reverse(slot) = inner.free.pop()?;
        inner.slots[slot] = Some(Entry { id, value });
        inner.by_id.insert(id, slot);
        Some(slot)
    }

    /// Removes the stream at `slot`, returning its value.
    pub fn remove_slot(&self, slot: usize) -> Option<T> {
        let mut inner = self.inner.lock();
        let entry = inner.slots.get_mut(slot)?.take()?;
        inner.by_id.remove(&entry.id);
        inner.free.push(Reverse(slot));
        Some(entry.value)
    }

    /// Removes the stream with `id`, returning its value.
    pub fn remove_id(&self, id: i32) -> Option<T> {
        let mut inner = self.inner.lock();
        let slot = inner.by_id.remove(&id)?;
        let entry = inner.slots[slot].take()?;
        inner.free.push(Reverse(slot));
        Some(entry.value)
    }

    /// Slot currently assigned to `id`.
    pub fn slot_of(&self, id: i32) -> Option<usize> {
        self.inner.lock().by_id.get(&id).copied()
    }

    /// Id occupying `slot`, if any.
    pub fn id_at(&self, slot: usize) -> Option<i32> {
        let inner = self.inner.lock();
        inner.slots.get(slot)?.as_ref().map(|e| e.id)
    }

    /// Runs `f` against the value at `slot` while holding the map lock.
    pub fn with<R>(&self, slot: usize, f: impl FnOnce(&T) -> R) -> Option<R> {
        let inner = self.inner.lock();
        inner.slots.get(slot)?.as_ref().map(|e| f(&e.value))
    }

    /// Runs `f` against the value at `slot`, mutably, under the map lock.
    pub fn with_mut<R>(&self, slot: usize, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        inner.slots.get_mut(slot)?.as_mut().map(|e| f(&mut e.value))
    }

    /// Ids of all registered streams.
    pub fn ids(&self) -> Vec<i32> {
        self.inner.lock().by_id.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for StreamMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_assigns_lowest_free_slot() {
        let map = StreamMap::new();
        assert_eq!(map.add(10, "a"), Some(0));
        assert_eq!(map.add(11, "b"), Some(1));
        map.remove_id(10);
        assert_eq!(map.add(12, "c"), Some(0));
        assert_eq!(map.id_at(0), Some(12));
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let map = StreamMap::new();
        assert_eq!(map.add(5, 100), Some(0));
        assert_eq!(map.add(5, 200), None);
        assert_eq!(map.with(0, |v| *v), Some(100));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let map = StreamMap::with_capacity(2);
        for id in 0..9 {
            assert!(map.add(id, id * 10).is_some());
        }
        assert_eq!(map.len(), 9);
        for id in 0..9 {
            let slot = map.slot_of(id).unwrap();
            assert_eq!(map.with(slot, |v| *v), Some(id * 10));
        }
    }

    #[test]
    fn remove_slot_and_remove_id_agree() {
        let map = StreamMap::new();
        let slot = map.add(7, "x").unwrap();
        assert_eq!(map.remove_slot(slot), Some("x"));
        assert_eq!(map.slot_of(7), None);
        assert_eq!(map.remove_id(7), None);
        assert_eq!(map.remove_slot(slot), None);
    }
}
