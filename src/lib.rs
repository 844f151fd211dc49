//! Origin Storage - A per-origin write-back key-value cache
//!
//! Serves reads and writes from quota-enforced in-memory maps and writes them
//! back to a shared backing store in coalesced, rate-limited batches.

pub mod api;
pub mod backing;
pub mod config;
pub mod error;
pub mod models;
pub mod storage;
pub mod tasks;

pub use api::AppState;
pub use config::Config;
pub use storage::{Binding, StorageWrapper, WrapperOptions, WrapperRegistry};
pub use tasks::spawn_purge_task;
