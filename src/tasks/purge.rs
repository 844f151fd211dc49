//! Memory Purge Task
//!
//! Background task that periodically drops the in-memory maps of clean
//! origins. A purged origin is imported again on its next access.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::storage::WrapperRegistry;

/// Spawns a background task that purges clean wrappers every
/// `purge_interval_secs` seconds.
///
/// Wrappers with pending or in-flight commits are left alone. The returned
/// handle is aborted during graceful shutdown.
///
/// # Example
/// ```ignore
/// let registry = WrapperRegistry::new(None, WrapperOptions::default());
/// let purge_handle = spawn_purge_task(registry.clone(), 300);
/// // Later, during shutdown:
/// purge_handle.abort();
/// ```
pub fn spawn_purge_task(registry: WrapperRegistry, purge_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(purge_interval_secs);

    tokio::spawn(async move {
        info!(
            "Starting memory purge task with interval of {} seconds",
            purge_interval_secs
        );

        loop {
            tokio::time::sleep(interval).await;

            let purged = registry.purge_memory().await;
            if purged > 0 {
                info!("Memory purge: unloaded {} clean origins", purged);
            } else {
                debug!("Memory purge: nothing to unload");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::{BackingStore, MemoryBackingStore};
    use crate::storage::WrapperOptions;
    use std::sync::Arc;

    fn registry() -> WrapperRegistry {
        let store: Arc<dyn BackingStore> = Arc::new(MemoryBackingStore::new());
        WrapperRegistry::new(Some(store), WrapperOptions::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_task_unloads_clean_origins() {
        let registry = registry();
        let binding = registry.open("a").unwrap();
        binding.put(b"k".to_vec(), b"v".to_vec(), "t").await.unwrap();
        binding.commit_now().await;

        let handle = spawn_purge_task(registry.clone(), 10);
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert!(!binding.stats().await.loaded);
        // Data comes back on the next access
        assert_eq!(binding.get(b"k").await, Some(b"v".to_vec()));

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_task_keeps_dirty_origins() {
        let registry = registry();
        let binding = registry.open("a").unwrap();
        binding.put(b"k".to_vec(), b"v".to_vec(), "t").await.unwrap();

        let handle = spawn_purge_task(registry.clone(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let stats = binding.stats().await;
        assert!(stats.loaded);
        assert!(stats.has_pending_commit());

        handle.abort();
    }

    #[tokio::test]
    async fn test_purge_task_can_be_aborted() {
        let handle = spawn_purge_task(registry(), 1);

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
