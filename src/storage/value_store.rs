//! Value Store Module
//!
//! In-memory byte map with an incrementally maintained usage total.

use std::collections::BTreeMap;
use std::sync::Arc;

/// Bytes charged for one entry against the quota.
pub fn entry_size(key: &[u8], value: &[u8]) -> usize {
    key.len() + value.len()
}

// == Value Store ==
/// Live key/value map of one wrapper.
///
/// The map sits behind an `Arc` snapshot. Cloning a store shares the map, and
/// the first mutation through either clone takes a private copy.
#[derive(Debug, Clone, Default)]
pub struct ValueStore {
    map: Arc<BTreeMap<Vec<u8>, Vec<u8>>>,
    /// Σ(len(key) + len(value)) over all entries
    bytes_used: usize,
}

impl ValueStore {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from loaded entries; later duplicates win.
    pub fn from_entries(entries: impl IntoIterator<Item = (Vec<u8>, Vec<u8>)>) -> Self {
        let mut store = Self::new();
        for (key, value) in entries {
            store.insert(key, value);
        }
        store
    }

    // == Get ==
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.map.get(key).map(Vec::as_slice)
    }

    // == Insert ==
    /// Stores `value` under `key`, returning the previous value.
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> Option<Vec<u8>> {
        let new_size = entry_size(&key, &value);
        let key_len = key.len();
        let previous = Arc::make_mut(&mut self.map).insert(key, value);
        if let Some(old) = &previous {
            self.bytes_used -= key_len + old.len();
        }
        self.bytes_used += new_size;
        previous
    }

    // == Remove ==
    pub fn remove(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        if !self.map.contains_key(key) {
            return None;
        }
        let removed = Arc::make_mut(&mut self.map).remove(key);
        if let Some(old) = &removed {
            self.bytes_used -= entry_size(key, old);
        }
        removed
    }

    // == Clear ==
    /// Empties the store. A shared map is left untouched for its other owners.
    pub fn clear(&mut self) {
        self.map = Arc::new(BTreeMap::new());
        self.bytes_used = 0;
    }

    /// Copy of all entries in key order.
    pub fn snapshot(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.map
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Vec<u8>)> {
        self.map.iter()
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// True while another store still shares this map.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.map) > 1
    }
}
