//! Backing Store Module
//!
//! The durable key-value store the wrappers write back to. The engine only
//! depends on the [`BackingStore`] trait; this module also ships an in-memory
//! implementation and an append-only log file implementation.

mod log_file;
mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackingError;

pub use log_file::LogFileBackingStore;
pub use memory::MemoryBackingStore;

// == Write Operation ==
/// A single mutation inside an atomic backing-store write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOperation {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
    /// Removes every key starting with `prefix`
    DeletePrefixed { prefix: Vec<u8> },
}

// == Backing Store Trait ==
/// An ordered byte-key/byte-value store with prefix scan and atomic batches.
///
/// Implementations must be safe to share across threads and tokio tasks; one
/// store is shared by every wrapper of a registry, each confined to its own
/// prefix.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Returns every `(key, value)` whose key starts with `prefix`, in key
    /// order. Keys are returned in full, prefix included.
    async fn get_prefixed(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, BackingError>;

    /// Applies `operations` atomically, in order.
    async fn write(&self, operations: Vec<WriteOperation>) -> Result<(), BackingError>;

    /// Same as [`BackingStore::write`], but completes before returning. Used
    /// when a wrapper is dropped with changes that never reached the store.
    fn write_blocking(&self, operations: Vec<WriteOperation>) -> Result<(), BackingError>;

    /// A human-readable name for this store, used in logging.
    fn name(&self) -> &str;
}

/// Applies `operations` to an ordered map. Shared by both implementations so
/// they agree on replay semantics.
pub(crate) fn apply_operations(
    map: &mut std::collections::BTreeMap<Vec<u8>, Vec<u8>>,
    operations: impl IntoIterator<Item = WriteOperation>,
) {
    for op in operations {
        match op {
            WriteOperation::Put { key, value } => {
                map.insert(key, value);
            }
            WriteOperation::Delete { key } => {
                map.remove(&key);
            }
            WriteOperation::DeletePrefixed { prefix } => {
                map.retain(|key, _| !key.starts_with(&prefix));
            }
        }
    }
}

/// Collects the entries of `map` under `prefix` in key order.
pub(crate) fn scan_prefix(
    map: &std::collections::BTreeMap<Vec<u8>, Vec<u8>>,
    prefix: &[u8],
) -> Vec<(Vec<u8>, Vec<u8>)> {
    map.range(prefix.to_vec()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
