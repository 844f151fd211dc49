//! Storage Module
//!
//! Per-origin write-back caching over a shared backing store: quota-enforced
//! in-memory maps, coalesced commit batches and rate-limited write-back.

mod commit_batch;
mod observer;
mod rate_limiter;
mod registry;
mod stats;
mod value_store;
mod wrapper;


// Re-export public types
pub use commit_batch::{CommitBatch, Value};
pub use observer::{ObserverId, StorageEvent, StorageObserver};
pub use rate_limiter::RateLimiter;
pub use registry::{OriginMetadata, OriginUsage, WrapperRegistry};
pub use stats::{OriginStats, RegistryStats, WrapperStats};
pub use value_store::{entry_size, ValueStore};
pub use wrapper::{
    Binding, NoopDelegate, StorageWrapper, WrapperDelegate, WrapperOptions, WriteFailurePolicy,
};

use std::time::Duration;

// == Public Constants ==
/// Default per-origin quota in bytes
pub const DEFAULT_MAX_SIZE: usize = 10 * 1024 * 1024; // 10 MB

/// Default minimum delay before a batch is committed
pub const DEFAULT_COMMIT_DELAY: Duration = Duration::from_secs(5);

pub const DEFAULT_MAX_BYTES_PER_HOUR: usize = DEFAULT_MAX_SIZE;

pub const DEFAULT_MAX_COMMITS_PER_HOUR: usize = 60;

/// Commit delay used when aggressive flushing is on
pub const AGGRESSIVE_COMMIT_DELAY: Duration = Duration::from_secs(1);

/// Time quantum of both commit rate limiters
pub const RATE_LIMIT_QUANTUM: Duration = Duration::from_secs(60 * 60);
