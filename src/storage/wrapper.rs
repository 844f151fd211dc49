//! Storage Wrapper Module
//!
//! The write-back cache for a single origin. Reads and writes are served from
//! an in-memory [`ValueStore`]; mutations are collected into a
//! [`CommitBatch`] that a deferred, rate-limited timer hands to the backing
//! store.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backing::{BackingStore, WriteOperation};
use crate::error::{BackingError, Result, StorageError};
use crate::storage::value_store::entry_size;
use crate::storage::{
    CommitBatch, ObserverId, RateLimiter, StorageObserver, ValueStore, WrapperStats,
    AGGRESSIVE_COMMIT_DELAY, DEFAULT_COMMIT_DELAY, DEFAULT_MAX_BYTES_PER_HOUR,
    DEFAULT_MAX_COMMITS_PER_HOUR, DEFAULT_MAX_SIZE, RATE_LIMIT_QUANTUM,
};

// == Write Failure Policy ==
/// What happens to a batch whose backing-store write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteFailurePolicy {
    /// Log the failure and drop the batch. The in-memory map keeps the
    /// changes, but they only reach the store if touched again.
    #[default]
    Discard,
    /// Merge the failed batch underneath the pending one and commit it again
    /// on the next timer.
    Requeue,
}

impl FromStr for WriteFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discard" => Ok(Self::Discard),
            "requeue" => Ok(Self::Requeue),
            other => Err(format!("unknown write failure policy: {}", other)),
        }
    }
}

// == Wrapper Options ==
/// Per-wrapper configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct WrapperOptions {
    /// Quota in bytes, counted as Σ(len(key) + len(value))
    pub max_size: usize,
    /// Minimum delay between opening a batch and committing it
    pub default_commit_delay: Duration,
    pub max_bytes_per_hour: usize,
    pub max_commits_per_hour: usize,
    /// Commit after [`AGGRESSIVE_COMMIT_DELAY`] regardless of rate limits
    pub aggressive_flushing: bool,
    pub write_failure_policy: WriteFailurePolicy,
}

impl Default for WrapperOptions {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            default_commit_delay: DEFAULT_COMMIT_DELAY,
            max_bytes_per_hour: DEFAULT_MAX_BYTES_PER_HOUR,
            max_commits_per_hour: DEFAULT_MAX_COMMITS_PER_HOUR,
            aggressive_flushing: false,
            write_failure_policy: WriteFailurePolicy::Discard,
        }
    }
}

// == Wrapper Delegate ==
/// Hooks the owner of a wrapper plugs in.
pub trait WrapperDelegate: Send + Sync {
    /// The last [`Binding`] to the wrapper was dropped.
    fn on_no_bindings(&self) {}

    /// Called with the operations of every commit before they are written,
    /// including the final commit on drop.
    fn prepare_to_commit(&self, _operations: &mut Vec<WriteOperation>, _bytes_used: usize) {}

    fn did_commit(&self, _result: &std::result::Result<(), BackingError>) {}
}

/// Delegate for wrappers with no owner-side hooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDelegate;

impl WrapperDelegate for NoopDelegate {}

/// Shared by every wrapper ever built over one prefix. A wrapper holds it
/// from its first load until it is dropped, so a successor only reads the
/// store after its predecessor's final flush has landed.
pub(crate) type PrefixLock = Arc<Mutex<()>>;

struct WrapperState {
    loaded: bool,
    store: ValueStore,
    pending: Option<CommitBatch>,
    commits_in_flight: usize,
    data_limiter: RateLimiter,
    commit_limiter: RateLimiter,
    /// `None` once the wrapper is memory-only
    backing: Option<Arc<dyn BackingStore>>,
    /// Bumped whenever a batch is taken; timers armed before that stand down
    timer_generation: u64,
    /// A failed commit was discarded, so the store lags the map
    diverged: bool,
    prefix_guard: Option<OwnedMutexGuard<()>>,
}

type ObserverList = Vec<(ObserverId, Arc<dyn StorageObserver>)>;

// == Storage Wrapper ==
pub struct StorageWrapper {
    prefix: Vec<u8>,
    options: WrapperOptions,
    created_at: Instant,
    delegate: Arc<dyn WrapperDelegate>,
    state: Mutex<WrapperState>,
    /// Held for the whole of a commit so writes reach the store in order
    commit_lock: Mutex<()>,
    observers: StdMutex<ObserverList>,
    next_observer_id: AtomicU64,
    bindings: AtomicUsize,
    prefix_lock: PrefixLock,
    weak_self: Weak<StorageWrapper>,
}

impl StorageWrapper {
    // == Constructor ==
    /// Creates an unloaded wrapper over `prefix`.
    ///
    /// With `backing` set to `None` the wrapper is memory-only from the start.
    /// Must be called inside a tokio runtime, since mutations spawn the commit
    /// timer.
    pub fn new(
        prefix: impl Into<Vec<u8>>,
        backing: Option<Arc<dyn BackingStore>>,
        options: WrapperOptions,
        delegate: Arc<dyn WrapperDelegate>,
    ) -> Arc<Self> {
        Self::build(
            prefix.into(),
            backing,
            options,
            delegate,
            PrefixLock::default(),
            None,
        )
    }

    /// Like [`StorageWrapper::new`], but ordered behind earlier wrappers that
    /// share `prefix_lock`.
    pub(crate) fn with_prefix_lock(
        prefix: Vec<u8>,
        backing: Option<Arc<dyn BackingStore>>,
        options: WrapperOptions,
        delegate: Arc<dyn WrapperDelegate>,
        prefix_lock: PrefixLock,
    ) -> Arc<Self> {
        Self::build(prefix, backing, options, delegate, prefix_lock, None)
    }

    fn build(
        prefix: Vec<u8>,
        backing: Option<Arc<dyn BackingStore>>,
        options: WrapperOptions,
        delegate: Arc<dyn WrapperDelegate>,
        prefix_lock: PrefixLock,
        preloaded: Option<ValueStore>,
    ) -> Arc<Self> {
        let state = WrapperState {
            loaded: preloaded.is_some(),
            store: preloaded.unwrap_or_default(),
            pending: None,
            commits_in_flight: 0,
            data_limiter: RateLimiter::new(options.max_bytes_per_hour, RATE_LIMIT_QUANTUM),
            commit_limiter: RateLimiter::new(options.max_commits_per_hour, RATE_LIMIT_QUANTUM),
            backing,
            timer_generation: 0,
            diverged: false,
            prefix_guard: None,
        };

        Arc::new_cyclic(|weak_self| Self {
            prefix,
            options,
            created_at: Instant::now(),
            delegate,
            state: Mutex::new(state),
            commit_lock: Mutex::new(()),
            observers: StdMutex::new(Vec::new()),
            next_observer_id: AtomicU64::new(0),
            bindings: AtomicUsize::new(0),
            prefix_lock,
            weak_self: weak_self.clone(),
        })
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn options(&self) -> &WrapperOptions {
        &self.options
    }

    // == Bindings ==
    /// Registers an external reference. When the last binding drops the
    /// delegate's `on_no_bindings` runs.
    pub fn bind(self: &Arc<Self>) -> Binding {
        self.bindings.fetch_add(1, Ordering::AcqRel);
        Binding {
            wrapper: Arc::clone(self),
        }
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.load(Ordering::Acquire)
    }

    // == Observers ==
    pub fn add_observer(&self, observer: Arc<dyn StorageObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer_id.fetch_add(1, Ordering::Relaxed));
        self.observers_lock().push((id, observer));
        id
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers_lock();
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    fn observers_lock(&self) -> StdMutexGuard<'_, ObserverList> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers one event to every live observer. The list is copied first so
    /// observers may add or remove observers from inside a callback.
    fn notify(&self, event: impl Fn(&dyn StorageObserver)) {
        let observers: Vec<Arc<dyn StorageObserver>> = {
            let mut list = self.observers_lock();
            list.retain(|(_, observer)| !observer.is_closed());
            list.iter().map(|(_, observer)| Arc::clone(observer)).collect()
        };
        for observer in &observers {
            event(observer.as_ref());
        }
    }

    // == Loading ==
    /// Locks the state, importing from the backing store on first use.
    ///
    /// The lock is FIFO, so callers that arrive during the import are served
    /// in arrival order once it lands.
    async fn lock_loaded(&self) -> MutexGuard<'_, WrapperState> {
        let mut state = self.state.lock().await;
        if !state.loaded {
            self.load(&mut state).await;
        }
        state
    }

    /// Waits until no earlier wrapper over this prefix is alive.
    async fn acquire_prefix(&self, state: &mut WrapperState) {
        if state.prefix_guard.is_none() {
            let guard = Arc::clone(&self.prefix_lock).lock_owned().await;
            state.prefix_guard = Some(guard);
        }
    }

    async fn load(&self, state: &mut WrapperState) {
        self.acquire_prefix(state).await;
        let Some(backing) = state.backing.clone() else {
            state.loaded = true;
            return;
        };

        match backing.get_prefixed(&self.prefix).await {
            Ok(rows) => {
                let prefix = self.prefix.as_slice();
                state.store = ValueStore::from_entries(rows.into_iter().filter_map(
                    |(key, value)| key.strip_prefix(prefix).map(|key| (key.to_vec(), value)),
                ));
                debug!(
                    "Loaded {} keys ({} bytes) for {}",
                    state.store.len(),
                    state.store.bytes_used(),
                    display_prefix(prefix)
                );
            }
            Err(err) => {
                warn!(
                    "Failed to load {} from {} store, continuing in memory only: {}",
                    display_prefix(&self.prefix),
                    backing.name(),
                    err
                );
                state.backing = None;
                state.store = ValueStore::new();
            }
        }
        state.loaded = true;
    }

    // == Put ==
    /// Stores `value` under `key`.
    ///
    /// Writing the value already stored is a silent no-op. A write that grows
    /// the map past `max_size` is rejected with
    /// [`StorageError::QuotaExceeded`] and changes nothing; shrinking writes
    /// are always accepted.
    pub async fn put(&self, key: Vec<u8>, value: Vec<u8>, source: &str) -> Result<()> {
        let mut state = self.lock_loaded().await;

        let old_size = match state.store.get(&key) {
            Some(old) if old == value.as_slice() => return Ok(()),
            Some(old) => entry_size(&key, old),
            None => 0,
        };
        let new_size = entry_size(&key, &value);
        let new_total = state.store.bytes_used() - old_size + new_size;
        if new_size > old_size && new_total > self.options.max_size {
            debug!(
                "Rejected write to {}: {} bytes exceeds quota of {}",
                display_prefix(&self.prefix),
                new_total,
                self.options.max_size
            );
            return Err(StorageError::QuotaExceeded {
                requested: new_total,
                limit: self.options.max_size,
            });
        }

        let old_value = state.store.insert(key.clone(), value.clone());
        if let Some(batch) = self.batch_for_change(&mut state) {
            batch.put(key.clone(), value.clone());
        }

        match old_value {
            None => self.notify(|observer| observer.key_added(&key, &value, source)),
            Some(old) => self.notify(|observer| observer.key_changed(&key, &value, &old, source)),
        }
        Ok(())
    }

    // == Delete ==
    /// Removes `key`. Returns whether a value was removed; a missing key is a
    /// silent no-op.
    pub async fn delete(&self, key: &[u8], source: &str) -> bool {
        let mut state = self.lock_loaded().await;

        let Some(old_value) = state.store.remove(key) else {
            return false;
        };
        if let Some(batch) = self.batch_for_change(&mut state) {
            batch.delete(key.to_vec());
        }

        self.notify(|observer| observer.key_deleted(key, &old_value, source));
        true
    }

    // == Delete All ==
    /// Empties the map. Observers hear `all_deleted` even when it was already
    /// empty, but only a non-empty map produces a prefix delete.
    pub async fn delete_all(&self, source: &str) {
        let mut state = self.lock_loaded().await;

        if !state.store.is_empty() {
            state.store.clear();
            if let Some(batch) = self.batch_for_change(&mut state) {
                batch.clear_all();
            }
        }

        self.notify(|observer| observer.all_deleted(source));
    }

    // == Get ==
    pub async fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let state = self.lock_loaded().await;
        state.store.get(key).map(<[u8]>::to_vec)
    }

    // == Get All ==
    /// Snapshot of every entry in key order.
    pub async fn get_all(&self, source: &str) -> Vec<(Vec<u8>, Vec<u8>)> {
        let state = self.lock_loaded().await;
        let entries = state.store.snapshot();
        self.notify(|observer| observer.get_all_complete(source));
        entries
    }

    // == Commit Scheduling ==
    /// Returns the pending batch for a mutation, opening one (and scheduling
    /// its commit) if needed. Memory-only wrappers keep no batch.
    fn batch_for_change<'a>(&self, state: &'a mut WrapperState) -> Option<&'a mut CommitBatch> {
        state.backing.as_ref()?;
        if state.pending.is_none() {
            state.pending = Some(CommitBatch::new());
            self.schedule_commit_timer();
        }
        state.pending.as_mut()
    }

    /// Spawns the task that arms the commit timer.
    ///
    /// The task needs the state lock, so it only runs after the mutation that
    /// opened the batch (and anything already queued behind it) is done. It
    /// holds a weak reference while sleeping, and commits only if no batch
    /// was taken in the meantime.
    fn schedule_commit_timer(&self) {
        let weak = self.weak_self.clone();
        tokio::spawn(async move {
            let (delay, generation) = {
                let Some(wrapper) = weak.upgrade() else {
                    return;
                };
                let state = wrapper.state.lock().await;
                // An in-flight commit re-arms on completion
                if state.commits_in_flight > 0 || state.pending.is_none() {
                    return;
                }
                (wrapper.compute_commit_delay(&state), state.timer_generation)
            };

            tokio::time::sleep(delay).await;

            if let Some(wrapper) = weak.upgrade() {
                wrapper.commit_changes(Some(generation)).await;
            }
        });
    }

    fn compute_commit_delay(&self, state: &WrapperState) -> Duration {
        if self.options.aggressive_flushing {
            return AGGRESSIVE_COMMIT_DELAY;
        }
        let elapsed = self.created_at.elapsed();
        let limiter_delay = state
            .commit_limiter
            .compute_delay_needed(elapsed)
            .max(state.data_limiter.compute_delay_needed(elapsed));
        self.options.default_commit_delay.max(limiter_delay)
    }

    /// Hands the pending batch to the backing store and waits for the write.
    ///
    /// Timers pass the generation they were armed at; a stale timer finds it
    /// bumped and leaves the batch to the timer armed after it.
    async fn commit_changes(&self, armed_at: Option<u64>) {
        let _commit_guard = self.commit_lock.lock().await;

        let (backing, batch, operations) = {
            let mut state = self.state.lock().await;
            if armed_at.is_some_and(|generation| generation != state.timer_generation) {
                return;
            }
            let Some(backing) = state.backing.clone() else {
                return;
            };
            let Some(batch) = state.pending.take() else {
                return;
            };
            state.timer_generation += 1;

            state.commit_limiter.add_samples(1.0);
            state.data_limiter.add_samples(batch.data_size() as f64);

            let mut operations = batch.to_operations(&self.prefix);
            self.delegate
                .prepare_to_commit(&mut operations, state.store.bytes_used());
            state.commits_in_flight += 1;
            (backing, batch, operations)
        };

        debug!(
            "Committing {} changes for {} to {} store",
            batch.len(),
            display_prefix(&self.prefix),
            backing.name()
        );
        let result = backing.write(operations).await;
        self.delegate.did_commit(&result);

        let mut state = self.state.lock().await;
        state.commits_in_flight -= 1;

        match result {
            // A cleared batch rewrites everything under the prefix
            Ok(()) if batch.clear_all_first() => state.diverged = false,
            Ok(()) => {}
            Err(err) => match self.options.write_failure_policy {
                WriteFailurePolicy::Discard => {
                    state.diverged = true;
                    error!(
                        "Commit for {} failed, dropping {} changes: {}",
                        display_prefix(&self.prefix),
                        batch.len(),
                        err
                    );
                }
                WriteFailurePolicy::Requeue => {
                    warn!(
                        "Commit for {} failed, requeueing {} changes: {}",
                        display_prefix(&self.prefix),
                        batch.len(),
                        err
                    );
                    let newer = state.pending.take();
                    state.pending = Some(CommitBatch::merge(batch, newer));
                }
            },
        }

        if state.pending.is_some() {
            self.schedule_commit_timer();
        }
    }

    // == Commit Now ==
    /// Commits any pending changes immediately, after an in-flight commit if
    /// there is one.
    pub async fn commit_now(&self) {
        self.commit_changes(None).await;
    }

    // == Erase ==
    /// Empties the map and deletes everything stored under the prefix through
    /// `backing`, followed by `extra`. Memory-only wrappers erase too, since
    /// the store may still hold what they failed to load.
    pub(crate) async fn erase(
        &self,
        backing: &Arc<dyn BackingStore>,
        extra: Vec<WriteOperation>,
        source: &str,
    ) -> std::result::Result<(), BackingError> {
        let _commit_guard = self.commit_lock.lock().await;
        {
            let mut state = self.state.lock().await;
            self.acquire_prefix(&mut state).await;
            state.store.clear();
            state.loaded = true;
            state.pending = None;
            state.timer_generation += 1;
        }
        self.notify(|observer| observer.all_deleted(source));

        let mut operations = vec![WriteOperation::DeletePrefixed {
            prefix: self.prefix.clone(),
        }];
        operations.extend(extra);
        backing.write(operations).await?;

        self.state.lock().await.diverged = false;
        Ok(())
    }

    // == Purge Memory ==
    /// Drops the in-memory map when everything in it is already durable. The
    /// next access imports it again. Returns whether the map was dropped.
    pub async fn purge_memory(&self) -> bool {
        let mut state = self.state.lock().await;
        if !state.loaded
            || state.backing.is_none()
            || state.diverged
            || state.pending.is_some()
            || state.commits_in_flight > 0
        {
            return false;
        }
        state.store = ValueStore::new();
        state.loaded = false;
        true
    }

    // == Fork ==
    /// Creates a wrapper over `prefix` that starts with this wrapper's map.
    ///
    /// The map is shared copy-on-write. The new wrapper immediately opens a
    /// batch that replaces everything under its prefix with the copied
    /// entries.
    pub async fn fork(
        &self,
        prefix: impl Into<Vec<u8>>,
        delegate: Arc<dyn WrapperDelegate>,
    ) -> Arc<StorageWrapper> {
        self.fork_with_prefix_lock(prefix.into(), delegate, PrefixLock::default())
            .await
    }

    pub(crate) async fn fork_with_prefix_lock(
        &self,
        prefix: Vec<u8>,
        delegate: Arc<dyn WrapperDelegate>,
        prefix_lock: PrefixLock,
    ) -> Arc<StorageWrapper> {
        let forked = {
            let state = self.lock_loaded().await;
            Self::build(
                prefix,
                state.backing.clone(),
                self.options.clone(),
                delegate,
                prefix_lock,
                Some(state.store.clone()),
            )
        };

        {
            let mut state = forked.state.lock().await;
            forked.acquire_prefix(&mut state).await;
            let entries = state.store.snapshot();
            if let Some(batch) = forked.batch_for_change(&mut state) {
                batch.clear_all();
                for (key, value) in entries {
                    batch.put(key, value);
                }
            }
        }

        info!(
            "Forked {} into {}",
            display_prefix(&self.prefix),
            display_prefix(&forked.prefix)
        );
        forked
    }

    // == Stats ==
    pub async fn stats(&self) -> WrapperStats {
        let state = self.state.lock().await;
        WrapperStats {
            loaded: state.loaded,
            entries: state.store.len(),
            bytes_used: state.store.bytes_used(),
            max_size: self.options.max_size,
            pending_changes: state.pending.as_ref().map_or(0, CommitBatch::len),
            pending_clear_all: state
                .pending
                .as_ref()
                .is_some_and(CommitBatch::clear_all_first),
            commits_in_flight: state.commits_in_flight,
            memory_only: state.backing.is_none(),
            bindings: self.binding_count(),
            observers: self.observers_lock().len(),
        }
    }

    /// Copy of the batch waiting to be committed.
    pub async fn pending_batch(&self) -> Option<CommitBatch> {
        self.state.lock().await.pending.clone()
    }

    /// Throws away the pending batch without writing it. The in-memory map
    /// is unchanged.
    pub(crate) async fn discard_pending(&self) -> bool {
        self.state.lock().await.pending.take().is_some()
    }
}

impl Drop for StorageWrapper {
    /// Writes any pending batch with the store's blocking write, so a clean
    /// teardown never loses acknowledged changes.
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let Some(batch) = state.pending.take() else {
            return;
        };
        let Some(backing) = state.backing.clone() else {
            return;
        };

        let mut operations = batch.to_operations(&self.prefix);
        self.delegate
            .prepare_to_commit(&mut operations, state.store.bytes_used());

        info!(
            "Flushing {} pending changes for {} on teardown",
            batch.len(),
            display_prefix(&self.prefix)
        );
        if let Err(err) = backing.write_blocking(operations) {
            error!(
                "Final commit for {} failed: {}",
                display_prefix(&self.prefix),
                err
            );
        }
    }
}

impl fmt::Debug for StorageWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageWrapper")
            .field("prefix", &display_prefix(&self.prefix))
            .field("bindings", &self.binding_count())
            .finish_non_exhaustive()
    }
}

fn display_prefix(prefix: &[u8]) -> String {
    format!("{:?}", String::from_utf8_lossy(prefix))
}

// == Binding ==
/// A counted external reference to a wrapper.
pub struct Binding {
    wrapper: Arc<StorageWrapper>,
}

impl Binding {
    pub fn wrapper(&self) -> &Arc<StorageWrapper> {
        &self.wrapper
    }
}

impl Clone for Binding {
    fn clone(&self) -> Self {
        self.wrapper.bind()
    }
}

impl Deref for Binding {
    type Target = StorageWrapper;

    fn deref(&self) -> &StorageWrapper {
        &self.wrapper
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        if self.wrapper.bindings.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.wrapper.delegate.on_no_bindings();
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Binding").field(&self.wrapper).finish()
    }
}
