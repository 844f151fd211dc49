//! In-memory backing store.
//!
//! Used by the server when no data file is configured and by tests, which
//! rely on its failure injection and write counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{apply_operations, scan_prefix, BackingStore, WriteOperation};
use crate::error::BackingError;

// == Memory Backing Store ==
#[derive(Debug, Default)]
pub struct MemoryBackingStore {
    data: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
    writes: AtomicUsize,
    blocking_writes: AtomicUsize,
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with raw (already prefixed) entries.
    pub fn with_entries(entries: impl IntoIterator<Item = (Vec<u8>, Vec<u8>)>) -> Self {
        let store = Self::new();
        store.lock().extend(entries);
        store
    }

    /// Makes every subsequent `get_prefixed` fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent write fail without applying anything.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delays async writes, keeping them in flight for `delay`.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self
            .write_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Number of async writes attempted.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of blocking writes attempted.
    pub fn blocking_write_count(&self) -> usize {
        self.blocking_writes.load(Ordering::SeqCst)
    }

    /// Copy of the raw contents.
    pub fn snapshot(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        self.lock().clone()
    }

    /// Raw lookup of a full (prefixed) key.
    pub fn raw_get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.lock().get(key).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, operations: Vec<WriteOperation>) -> Result<(), BackingError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BackingError::Unavailable(
                "write failure injected".to_string(),
            ));
        }
        apply_operations(&mut self.lock(), operations);
        Ok(())
    }
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn get_prefixed(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, BackingError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BackingError::Unavailable("read failure injected".to_string()));
        }
        Ok(scan_prefix(&self.lock(), prefix))
    }

    async fn write(&self, operations: Vec<WriteOperation>) -> Result<(), BackingError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let delay = *self
            .write_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.apply(operations)
    }

    fn write_blocking(&self, operations: Vec<WriteOperation>) -> Result<(), BackingError> {
        self.blocking_writes.fetch_add(1, Ordering::SeqCst);
        self.apply(operations)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
