//! Wrapper Registry Module
//!
//! Maps origins to their storage wrappers. The registry is the only long-lived
//! owner of a wrapper; callers hold [`Binding`]s, and a wrapper leaves the
//! registry when its last binding is dropped.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backing::{BackingStore, WriteOperation};
use crate::error::{BackingError, Result, StorageError};
use crate::storage::wrapper::PrefixLock;
use crate::storage::{
    Binding, OriginStats, RegistryStats, StorageWrapper, WrapperDelegate, WrapperOptions,
};

/// Key prefix of the per-origin metadata records
const METADATA_PREFIX: &str = "META:";

// == Origin Metadata ==
/// Record written next to an origin's data on every commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginMetadata {
    pub size_bytes: usize,
    pub last_modified: DateTime<Utc>,
}

/// Persisted usage of one origin, as reported by `usage_info`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OriginUsage {
    pub origin: String,
    pub size_bytes: usize,
    /// `None` for origins that were never committed
    pub last_modified: Option<DateTime<Utc>>,
}

struct RegistryInner {
    backing: Option<Arc<dyn BackingStore>>,
    options: WrapperOptions,
    wrappers: Mutex<HashMap<String, Arc<StorageWrapper>>>,
    /// Outlives registry entries while an evicted wrapper is still alive,
    /// e.g. finishing an in-flight commit
    prefix_locks: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
    commit_failures: AtomicU64,
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<StorageWrapper>>> {
        self.wrappers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The lock shared by every wrapper of `origin` that is still alive.
    fn prefix_lock(&self, origin: &str) -> PrefixLock {
        let mut locks = self
            .prefix_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| lock.strong_count() > 0);
        if let Some(lock) = locks.get(origin).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = PrefixLock::default();
        locks.insert(origin.to_string(), Arc::downgrade(&lock));
        lock
    }

    /// Drops the registry's reference if the wrapper is still unbound. A
    /// concurrent `open` binds under the same lock, so it either sees the
    /// entry and keeps it or arrives after it is gone.
    fn remove_if_unbound(&self, origin: &str) {
        let removed = {
            let mut wrappers = self.lock();
            let unbound = wrappers
                .get(origin)
                .is_some_and(|wrapper| wrapper.binding_count() == 0);
            if unbound {
                wrappers.remove(origin)
            } else {
                None
            }
        };
        if removed.is_some() {
            debug!("Closed storage for origin {}", origin);
        }
        // Dropped outside the lock; the last reference flushes synchronously
        drop(removed);
    }
}

// == Origin Delegate ==
struct OriginDelegate {
    origin: String,
    registry: Weak<RegistryInner>,
}

impl WrapperDelegate for OriginDelegate {
    fn on_no_bindings(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_if_unbound(&self.origin);
        }
    }

    fn prepare_to_commit(&self, operations: &mut Vec<WriteOperation>, bytes_used: usize) {
        let key = WrapperRegistry::metadata_key(&self.origin);
        if bytes_used == 0 {
            operations.push(WriteOperation::Delete { key });
            return;
        }

        let metadata = OriginMetadata {
            size_bytes: bytes_used,
            last_modified: Utc::now(),
        };
        match serde_json::to_vec(&metadata) {
            Ok(value) => operations.push(WriteOperation::Put { key, value }),
            Err(err) => warn!("Failed to encode metadata for {}: {}", self.origin, err),
        }
    }

    fn did_commit(&self, result: &std::result::Result<(), BackingError>) {
        if result.is_err() {
            if let Some(registry) = self.registry.upgrade() {
                registry.commit_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

// == Wrapper Registry ==
/// Origin → wrapper map over one shared backing store.
#[derive(Clone)]
pub struct WrapperRegistry {
    inner: Arc<RegistryInner>,
}

impl WrapperRegistry {
    // == Constructor ==
    /// Creates an empty registry. With no backing store every wrapper is
    /// memory-only.
    pub fn new(backing: Option<Arc<dyn BackingStore>>, options: WrapperOptions) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                backing,
                options,
                wrappers: Mutex::new(HashMap::new()),
                prefix_locks: Mutex::new(HashMap::new()),
                commit_failures: AtomicU64::new(0),
            }),
        }
    }

    /// Data prefix of `origin`: `"_" + origin + "\0"`.
    pub fn data_prefix(origin: &str) -> Vec<u8> {
        format!("_{}\0", origin).into_bytes()
    }

    pub fn metadata_key(origin: &str) -> Vec<u8> {
        format!("{}{}", METADATA_PREFIX, origin).into_bytes()
    }

    /// Empty origins, or origins containing NUL, would let one prefix cover
    /// another.
    fn validate_origin(origin: &str) -> Result<()> {
        if origin.is_empty() {
            return Err(StorageError::InvalidOrigin("origin is empty".to_string()));
        }
        if origin.contains('\0') {
            return Err(StorageError::InvalidOrigin(format!(
                "{:?} contains a NUL byte",
                origin
            )));
        }
        Ok(())
    }

    fn delegate_for(&self, origin: &str) -> Arc<dyn WrapperDelegate> {
        Arc::new(OriginDelegate {
            origin: origin.to_string(),
            registry: Arc::downgrade(&self.inner),
        })
    }

    // == Open ==
    /// Returns a binding to the wrapper for `origin`, creating it if needed.
    ///
    /// A new wrapper whose evicted predecessor is still alive defers its
    /// import until the predecessor has been dropped and flushed.
    pub fn open(&self, origin: &str) -> Result<Binding> {
        Self::validate_origin(origin)?;

        let mut wrappers = self.inner.lock();
        if let Some(wrapper) = wrappers.get(origin) {
            return Ok(wrapper.bind());
        }

        let wrapper = StorageWrapper::with_prefix_lock(
            Self::data_prefix(origin),
            self.inner.backing.clone(),
            self.inner.options.clone(),
            self.delegate_for(origin),
            self.inner.prefix_lock(origin),
        );
        let binding = wrapper.bind();
        wrappers.insert(origin.to_string(), wrapper);
        info!("Opened storage for origin {}", origin);
        Ok(binding)
    }

    pub fn contains(&self, origin: &str) -> bool {
        self.inner.lock().contains_key(origin)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Open origins, sorted.
    pub fn origins(&self) -> Vec<String> {
        let mut origins: Vec<String> = self.inner.lock().keys().cloned().collect();
        origins.sort();
        origins
    }

    fn snapshot(&self) -> Vec<(String, Arc<StorageWrapper>)> {
        self.inner
            .lock()
            .iter()
            .map(|(origin, wrapper)| (origin.clone(), Arc::clone(wrapper)))
            .collect()
    }

    // == Fork ==
    /// Copies `source` into the closed origin `target` and opens it.
    pub async fn fork(&self, source: &str, target: &str) -> Result<Binding> {
        Self::validate_origin(source)?;
        Self::validate_origin(target)?;
        if source == target {
            return Err(StorageError::InvalidRequest(
                "cannot fork an origin into itself".to_string(),
            ));
        }
        if self.contains(target) {
            return Err(StorageError::OriginInUse(target.to_string()));
        }

        let source_binding = self.open(source)?;
        let forked = source_binding
            .fork_with_prefix_lock(
                Self::data_prefix(target),
                self.delegate_for(target),
                self.inner.prefix_lock(target),
            )
            .await;

        let binding = {
            let mut wrappers = self.inner.lock();
            match wrappers.entry(target.to_string()) {
                Entry::Occupied(_) => None,
                Entry::Vacant(slot) => Some(slot.insert(Arc::clone(&forked)).bind()),
            }
        };

        match binding {
            Some(binding) => {
                info!("Forked origin {} into {}", source, target);
                Ok(binding)
            }
            None => {
                // Opened concurrently; its data must not be overwritten
                forked.discard_pending().await;
                Err(StorageError::OriginInUse(target.to_string()))
            }
        }
    }

    // == Flush All ==
    /// Commits every open origin's pending changes now.
    pub async fn flush_all(&self) {
        for (_, wrapper) in self.snapshot() {
            wrapper.commit_now().await;
        }
    }

    // == Shutdown ==
    /// Flushes every origin and releases the registry's references. Wrappers
    /// still bound elsewhere stay alive until their bindings drop.
    pub async fn shutdown(&self) -> usize {
        self.flush_all().await;
        let closed: Vec<Arc<StorageWrapper>> = {
            let mut wrappers = self.inner.lock();
            wrappers.drain().map(|(_, wrapper)| wrapper).collect()
        };
        info!("Storage registry shut down, {} origins closed", closed.len());
        closed.len()
    }

    // == Purge Memory ==
    /// Unloads every clean wrapper. Returns how many were purged.
    pub async fn purge_memory(&self) -> usize {
        let mut purged = 0;
        for (_, wrapper) in self.snapshot() {
            if wrapper.purge_memory().await {
                purged += 1;
            }
        }
        purged
    }

    // == Stats ==
    pub async fn stats(&self) -> RegistryStats {
        let mut origins = Vec::new();
        for (origin, wrapper) in self.snapshot() {
            origins.push(OriginStats {
                origin,
                wrapper: wrapper.stats().await,
            });
        }
        let mut stats = RegistryStats::from_origins(origins);
        stats.commit_failures = self.inner.commit_failures.load(Ordering::Relaxed);
        stats
    }

    // == Usage Info ==
    /// Persisted usage per origin, sorted by origin.
    ///
    /// Reads the metadata records from the backing store. Without a backing
    /// store, reports the open origins instead.
    pub async fn usage_info(&self) -> Result<Vec<OriginUsage>> {
        let Some(backing) = self.inner.backing.as_ref() else {
            let mut usage = Vec::new();
            for (origin, wrapper) in self.snapshot() {
                usage.push(OriginUsage {
                    origin,
                    size_bytes: wrapper.stats().await.bytes_used,
                    last_modified: None,
                });
            }
            usage.sort_by(|a, b| a.origin.cmp(&b.origin));
            return Ok(usage);
        };

        let rows = backing.get_prefixed(METADATA_PREFIX.as_bytes()).await?;
        let mut usage = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            let Some(origin) = key.strip_prefix(METADATA_PREFIX.as_bytes()) else {
                continue;
            };
            let origin = String::from_utf8_lossy(origin).into_owned();
            match serde_json::from_slice::<OriginMetadata>(&value) {
                Ok(metadata) => usage.push(OriginUsage {
                    origin,
                    size_bytes: metadata.size_bytes,
                    last_modified: Some(metadata.last_modified),
                }),
                Err(err) => warn!("Skipping unreadable metadata for {}: {}", origin, err),
            }
        }
        usage.sort_by(|a, b| a.origin.cmp(&b.origin));
        Ok(usage)
    }

    // == Delete Origin ==
    /// Erases all data and metadata of `origin`, open or not.
    ///
    /// The erase goes through the registry's store even when the open wrapper
    /// fell back to memory-only, and runs after any pending commit of the
    /// origin.
    pub async fn delete_origin(&self, origin: &str) -> Result<()> {
        // Binds the open wrapper, or a fresh one that is evicted again below
        let binding = self.open(origin)?;

        match &self.inner.backing {
            Some(backing) => {
                let metadata = WriteOperation::Delete {
                    key: Self::metadata_key(origin),
                };
                binding
                    .erase(backing, vec![metadata], "delete_origin")
                    .await?;
            }
            None => binding.delete_all("delete_origin").await,
        }
        info!("Deleted storage for origin {}", origin);
        Ok(())
    }
}

impl std::fmt::Debug for WrapperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrapperRegistry")
            .field("origins", &self.origins())
            .finish_non_exhaustive()
    }
}
