//! Commit Batch Module
//!
//! Accumulates the mutations made since the last hand-off to the backing
//! store, collapsed to one entry per key.

use std::collections::HashMap;

use crate::backing::WriteOperation;

// == Value ==
/// Pending state of one key: a new value, or a deletion marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Present(Vec<u8>),
    Tombstone,
}

impl Value {
    pub fn len(&self) -> usize {
        match self {
            Value::Present(bytes) => bytes.len(),
            Value::Tombstone => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// == Commit Batch ==
/// Minimal diff between the in-memory map and the backing store.
///
/// Changes iterate in the order their key was first touched within the batch.
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    clear_all_first: bool,
    changes: Vec<(Vec<u8>, Value)>,
    positions: HashMap<Vec<u8>, usize>,
}

impl CommitBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value` for `key`, replacing any earlier pending change.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.record(key, Value::Present(value));
    }

    /// Records a tombstone for `key`.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.record(key, Value::Tombstone);
    }

    /// Marks the whole prefix for deletion and drops earlier changes.
    pub fn clear_all(&mut self) {
        self.clear_all_first = true;
        self.changes.clear();
        self.positions.clear();
    }

    fn record(&mut self, key: Vec<u8>, value: Value) {
        match self.positions.get(&key) {
            Some(&idx) => self.changes[idx].1 = value,
            None => {
                self.positions.insert(key.clone(), self.changes.len());
                self.changes.push((key, value));
            }
        }
    }

    pub fn clear_all_first(&self) -> bool {
        self.clear_all_first
    }

    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.positions.get(key).map(|&idx| &self.changes[idx].1)
    }

    pub fn changes(&self) -> impl Iterator<Item = (&[u8], &Value)> {
        self.changes
            .iter()
            .map(|(key, value)| (key.as_slice(), value))
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.clear_all_first && self.changes.is_empty()
    }

    /// Bytes carried by the batch, fed to the data rate limiter.
    pub fn data_size(&self) -> usize {
        self.changes
            .iter()
            .map(|(key, value)| key.len() + value.len())
            .sum()
    }

    /// Translates the batch into backing-store operations under `prefix`.
    ///
    /// A prefix delete comes first when `clear_all_first` is set, followed by
    /// one operation per change.
    pub fn to_operations(&self, prefix: &[u8]) -> Vec<WriteOperation> {
        let mut ops = Vec::with_capacity(self.changes.len() + 1);
        if self.clear_all_first {
            ops.push(WriteOperation::DeletePrefixed {
                prefix: prefix.to_vec(),
            });
        }
        for (key, value) in &self.changes {
            let full_key = [prefix, key.as_slice()].concat();
            ops.push(match value {
                Value::Present(bytes) => WriteOperation::Put {
                    key: full_key,
                    value: bytes.clone(),
                },
                Value::Tombstone => WriteOperation::Delete { key: full_key },
            });
        }
        ops
    }

    /// Combines an unwritten `older` batch with whatever accumulated after it.
    ///
    /// The result has the same effect as applying `older` then `newer`.
    pub fn merge(older: CommitBatch, newer: Option<CommitBatch>) -> CommitBatch {
        let Some(newer) = newer else {
            return older;
        };
        if newer.clear_all_first {
            return newer;
        }
        let mut merged = older;
        for (key, value) in newer.changes {
            merged.record(key, value);
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_coalesces_per_key() {
        let mut batch = CommitBatch::new();
        batch.put(b"k".to_vec(), b"1".to_vec());
        batch.put(b"k".to_vec(), b"2".to_vec());

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.get(b"k"), Some(&Value::Present(b"2".to_vec())));
    }

    #[test]
    fn test_delete_overrides_put() {
        let mut batch = CommitBatch::new();
        batch.put(b"k".to_vec(), b"1".to_vec());
        batch.delete(b"k".to_vec());

        assert_eq!(batch.get(b"k"), Some(&Value::Tombstone));
        assert_eq!(batch.data_size(), 1);
    }

    #[test]
    fn test_clear_all_discards_earlier_changes_keeps_later() {
        let mut batch = CommitBatch::new();
        batch.put(b"a".to_vec(), b"1".to_vec());
        batch.clear_all();
        batch.put(b"b".to_vec(), b"x".to_vec());

        assert!(batch.clear_all_first());
        let changes: Vec<_> = batch.changes().collect();
        assert_eq!(changes, vec![(&b"b"[..], &Value::Present(b"x".to_vec()))]);
    }

    #[test]
    fn test_operations_order() {
        let mut batch = CommitBatch::new();
        batch.put(b"z".to_vec(), b"1".to_vec());
        batch.clear_all();
        batch.put(b"b".to_vec(), b"2".to_vec());
        batch.delete(b"a".to_vec());

        let ops = batch.to_operations(b"p:");
        assert_eq!(
            ops,
            vec![
                WriteOperation::DeletePrefixed {
                    prefix: b"p:".to_vec()
                },
                WriteOperation::Put {
                    key: b"p:b".to_vec(),
                    value: b"2".to_vec()
                },
                WriteOperation::Delete {
                    key: b"p:a".to_vec()
                },
            ]
        );
    }

    #[test]
    fn test_data_size() {
        let mut batch = CommitBatch::new();
        batch.put(b"ab".to_vec(), b"123".to_vec());
        batch.delete(b"cd".to_vec());
        assert_eq!(batch.data_size(), 7);
    }

    #[test]
    fn test_empty_batch() {
        let mut batch = CommitBatch::new();
        assert!(batch.is_empty());
        batch.clear_all();
        // A bare clear still has work to do
        assert!(!batch.is_empty());
    }

    #[test]
    fn test_merge_applies_newer_on_top() {
        let mut older = CommitBatch::new();
        older.put(b"a".to_vec(), b"old".to_vec());
        older.put(b"b".to_vec(), b"keep".to_vec());
        let mut newer = CommitBatch::new();
        newer.delete(b"a".to_vec());
        newer.put(b"c".to_vec(), b"new".to_vec());

        let merged = CommitBatch::merge(older, Some(newer));
        assert_eq!(merged.get(b"a"), Some(&Value::Tombstone));
        assert_eq!(merged.get(b"b"), Some(&Value::Present(b"keep".to_vec())));
        assert_eq!(merged.get(b"c"), Some(&Value::Present(b"new".to_vec())));
    }

    #[test]
    fn test_merge_with_newer_clear_drops_older() {
        let mut older = CommitBatch::new();
        older.put(b"a".to_vec(), b"old".to_vec());
        let mut newer = CommitBatch::new();
        newer.clear_all();

        let merged = CommitBatch::merge(older, Some(newer));
        assert!(merged.clear_all_first());
        assert_eq!(merged.len(), 0);
    }
}
