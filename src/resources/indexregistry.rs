//! Dense slot storage addressed by stable external identifiers.
//!
//! [`IndexRegistry`] keeps its records in a contiguous `Vec`, maps each
//! external key (usually an [`InstanceId`](crate::resources::scene::InstanceId))
//! to the slot holding its record, and recycles freed slots through a
//! free-list. Insertion and removal are O(1) and never move unrelated records,
//! so a slot index stays valid for as long as its key is registered.
//!
//! Iteration walks the slots in storage order, skipping the holes left by
//! removed records.
//!
//! # Example
//!
//! ```
//! use tempest::resources::indexregistry::IndexRegistry;
//!
//! let mut registry: IndexRegistry<u64, &str> = IndexRegistry::new();
//! let a = registry.insert(10, "crate");
//! let _ = registry.insert(11, "barrel");
//! registry.erase(10);
//! // The freed slot is handed to the next insertion.
//! assert_eq!(registry.insert(12, "lamp"), a);
//! ```

use rustc_hash::FxHashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Dense array plus free-list, keyed by an external identifier.
#[derive(Debug)]
pub struct IndexRegistry<K, T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
    lookup: FxHashMap<K, usize>,
}

impl<K, T> Default for IndexRegistry<K, T>
where
    K: Copy + Eq + Hash + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> IndexRegistry<K, T>
where
    K: Copy + Eq + Hash + Debug,
{
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            lookup: FxHashMap::default(),
        }
    }

    /// Store `value` under `key` and return the slot it landed in.
    ///
    /// Reuses the most recently freed slot when one is available.
    ///
    /// # Panics
    ///
    /// Panics if `key` is already registered.
    pub fn insert(&mut self, key: K, value: T) -> usize {
        assert!(
            !self.lookup.contains_key(&key),
            "IndexRegistry: id {:?} is already registered",
            key
        );
        let slot = match self.free.pop() {
            Some(slot) => {
                debug_assert!(self.slots[slot].is_none());
                self.slots[slot] = Some(value);
                slot
            }
            None => {
                self.slots.push(Some(value));
                self.slots.len() - 1
            }
        };
        self.lookup.insert(key, slot);
        slot
    }

    /// Remove the record stored under `key` and hand it back to the caller.
    ///
    /// The slot is emptied before it goes onto the free-list, so nothing of
    /// the old record survives into the next insertion.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not registered.
    pub fn erase(&mut self, key: K) -> T {
        let slot = self.lookup(key);
        self.lookup.remove(&key);
        let value = self.slots[slot]
            .take()
            .unwrap_or_else(|| panic!("IndexRegistry: slot {} for id {:?} is empty", slot, key));
        self.free.push(slot);
        value
    }

    /// Slot index of `key`.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not registered. Use [`slot`](Self::slot) when the
    /// key may legitimately be absent.
    pub fn lookup(&self, key: K) -> usize {
        match self.lookup.get(&key) {
            Some(&slot) => slot,
            None => panic!("IndexRegistry: unknown id {:?}", key),
        }
    }

    /// Slot index of `key`, or `None` if it is not registered.
    pub fn slot(&self, key: K) -> Option<usize> {
        self.lookup.get(&key).copied()
    }

    pub fn contains(&self, key: K) -> bool {
        self.lookup.contains_key(&key)
    }

    pub fn get(&self, key: K) -> Option<&T> {
        let slot = self.slot(key)?;
        self.slots[slot].as_ref()
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        let slot = self.slot(key)?;
        self.slots[slot].as_mut()
    }

    /// Iterate live records in slot order as `(slot, record)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, value)| value.as_ref().map(|v| (slot, v)))
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Number of slots ever allocated, live or free.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
