//! API Handlers
//!
//! HTTP request handlers for each storage server endpoint. Handlers only
//! translate between HTTP and registry operations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{
    extract::{Path, Query, State},
    Json,
};
use tracing::info;

use crate::backing::{BackingStore, LogFileBackingStore, MemoryBackingStore};
use crate::config::Config;
use crate::error::{BackingError, Result, StorageError};
use crate::models::{
    ClearResponse, CloseResponse, CommitResponse, DeleteResponse, ForkRequest, ForkResponse,
    HealthResponse, ItemResponse, ItemsResponse, PutItemRequest, PutResponse, SourceQuery,
    UsageResponse,
};
use crate::storage::{Binding, RegistryStats, WrapperRegistry};

/// Application state shared across all handlers.
///
/// Holds the registry and one open binding per origin touched over HTTP, so
/// origins stay loaded between requests until closed.
#[derive(Clone)]
pub struct AppState {
    pub registry: WrapperRegistry,
    bindings: Arc<Mutex<HashMap<String, Binding>>>,
}

impl AppState {
    /// Creates a new AppState over the given registry.
    pub fn new(registry: WrapperRegistry) -> Self {
        Self {
            registry,
            bindings: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Creates a new AppState from configuration.
    ///
    /// Opens (and compacts) the log file named by `data_file`, or uses an
    /// in-memory backing store when none is configured.
    pub fn from_config(config: &Config) -> std::result::Result<Self, BackingError> {
        let backing: Arc<dyn BackingStore> = match &config.data_file {
            Some(path) => {
                let store = LogFileBackingStore::open(path)?;
                store.compact()?;
                info!("Using log file backing store at {}", path.display());
                Arc::new(store)
            }
            None => {
                info!("No data file configured, using in-memory backing store");
                Arc::new(MemoryBackingStore::new())
            }
        };
        let registry = WrapperRegistry::new(Some(backing), config.wrapper_options());
        Ok(Self::new(registry))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Binding>> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the open binding for `origin`, opening the origin if needed.
    pub fn binding(&self, origin: &str) -> Result<Binding> {
        let mut bindings = self.lock();
        if let Some(binding) = bindings.get(origin) {
            return Ok(binding.clone());
        }
        let binding = self.registry.open(origin)?;
        bindings.insert(origin.to_string(), binding.clone());
        Ok(binding)
    }

    /// Drops the binding held for `origin`. Returns false if none was held.
    pub fn close(&self, origin: &str) -> bool {
        let removed = self.lock().remove(origin);
        // Dropped outside the lock; eviction may flush synchronously
        removed.is_some()
    }

    /// Drops every held binding.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Binding> = self.lock().drain().map(|(_, binding)| binding).collect();
        drained.len()
    }
}

/// Handler for GET /origins/:origin/items
pub async fn list_items_handler(
    State(state): State<AppState>,
    Path(origin): Path<String>,
    Query(query): Query<SourceQuery>,
) -> Result<Json<ItemsResponse>> {
    let binding = state.binding(&origin)?;
    let entries = binding.get_all(&query.source).await;

    Ok(Json(ItemsResponse::new(origin, entries)))
}

/// Handler for DELETE /origins/:origin/items
pub async fn clear_items_handler(
    State(state): State<AppState>,
    Path(origin): Path<String>,
    Query(query): Query<SourceQuery>,
) -> Result<Json<ClearResponse>> {
    let binding = state.binding(&origin)?;
    binding.delete_all(&query.source).await;

    Ok(Json(ClearResponse::new(origin)))
}

/// Handler for GET /origins/:origin/items/:key
pub async fn get_item_handler(
    State(state): State<AppState>,
    Path((origin, key)): Path<(String, String)>,
) -> Result<Json<ItemResponse>> {
    let binding = state.binding(&origin)?;
    let value = binding
        .get(key.as_bytes())
        .await
        .ok_or_else(|| StorageError::NotFound(key.clone()))?;

    Ok(Json(ItemResponse::new(origin, key, &value)))
}

/// Handler for PUT /origins/:origin/items/:key
///
/// Quota violations map to 413 through [`StorageError::QuotaExceeded`].
pub async fn put_item_handler(
    State(state): State<AppState>,
    Path((origin, key)): Path<(String, String)>,
    Query(query): Query<SourceQuery>,
    Json(req): Json<PutItemRequest>,
) -> Result<Json<PutResponse>> {
    let binding = state.binding(&origin)?;
    binding
        .put(key.clone().into_bytes(), req.value.into_bytes(), &query.source)
        .await?;

    Ok(Json(PutResponse::new(key)))
}

/// Handler for DELETE /origins/:origin/items/:key
pub async fn delete_item_handler(
    State(state): State<AppState>,
    Path((origin, key)): Path<(String, String)>,
    Query(query): Query<SourceQuery>,
) -> Result<Json<DeleteResponse>> {
    let binding = state.binding(&origin)?;
    if !binding.delete(key.as_bytes(), &query.source).await {
        return Err(StorageError::NotFound(key));
    }

    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for POST /origins/:origin/commit
pub async fn commit_handler(
    State(state): State<AppState>,
    Path(origin): Path<String>,
) -> Result<Json<CommitResponse>> {
    let binding = state.binding(&origin)?;
    binding.commit_now().await;
    let stats = binding.stats().await;

    Ok(Json(CommitResponse {
        origin,
        bytes_used: stats.bytes_used,
    }))
}

/// Handler for POST /origins/:origin/fork
///
/// The target is opened and held like any other origin.
pub async fn fork_handler(
    State(state): State<AppState>,
    Path(origin): Path<String>,
    Json(req): Json<ForkRequest>,
) -> Result<Json<ForkResponse>> {
    if let Some(error_msg) = req.validate(&origin) {
        return Err(StorageError::InvalidRequest(error_msg));
    }

    let forked = state.registry.fork(&origin, &req.target).await?;
    let entries = forked.stats().await.entries;
    state.lock().insert(req.target.clone(), forked);

    Ok(Json(ForkResponse {
        source: origin,
        target: req.target,
        entries,
    }))
}

/// Handler for DELETE /origins/:origin
///
/// Releases the server's binding; the origin is flushed and evicted once
/// nothing else holds it.
pub async fn close_handler(
    State(state): State<AppState>,
    Path(origin): Path<String>,
) -> Result<Json<CloseResponse>> {
    if !state.close(&origin) {
        return Err(StorageError::NotFound(origin));
    }

    let evicted = !state.registry.contains(&origin);
    Ok(Json(CloseResponse { origin, evicted }))
}

/// Handler for DELETE /origins/:origin/data
pub async fn delete_origin_handler(
    State(state): State<AppState>,
    Path(origin): Path<String>,
) -> Result<Json<ClearResponse>> {
    state.registry.delete_origin(&origin).await?;

    Ok(Json(ClearResponse::new(origin)))
}

/// Handler for GET /usage
pub async fn usage_handler(State(state): State<AppState>) -> Result<Json<UsageResponse>> {
    let usage = state.registry.usage_info().await?;

    Ok(Json(UsageResponse::new(usage)))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<RegistryStats> {
    Json(state.registry.stats().await)
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::WrapperOptions;

    fn test_state() -> AppState {
        let backing: Arc<dyn BackingStore> = Arc::new(MemoryBackingStore::new());
        AppState::new(WrapperRegistry::new(
            Some(backing),
            WrapperOptions::default(),
        ))
    }

    fn item_path(origin: &str, key: &str) -> Path<(String, String)> {
        Path((origin.to_string(), key.to_string()))
    }

    #[tokio::test]
    async fn test_put_and_get_handler() {
        let state = test_state();

        let req = PutItemRequest {
            value: "test_value".to_string(),
        };
        let result = put_item_handler(
            State(state.clone()),
            item_path("a", "test_key"),
            Query(SourceQuery::default()),
            Json(req),
        )
        .await;
        assert!(result.is_ok());

        let response = get_item_handler(State(state.clone()), item_path("a", "test_key"))
            .await
            .unwrap();
        assert_eq!(response.value, "test_value");
    }

    #[tokio::test]
    async fn test_get_nonexistent_key() {
        let state = test_state();

        let result = get_item_handler(State(state), item_path("a", "nonexistent")).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_handler() {
        let state = test_state();
        put_item_handler(
            State(state.clone()),
            item_path("a", "to_delete"),
            Query(SourceQuery::default()),
            Json(PutItemRequest {
                value: "value".to_string(),
            }),
        )
        .await
        .unwrap();

        let result = delete_item_handler(
            State(state.clone()),
            item_path("a", "to_delete"),
            Query(SourceQuery::default()),
        )
        .await;
        assert!(result.is_ok());

        let result = get_item_handler(State(state), item_path("a", "to_delete")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_binding_is_held_between_requests() {
        let state = test_state();
        state.binding("a").unwrap();
        assert!(state.registry.contains("a"));

        assert!(state.close("a"));
        assert!(!state.registry.contains("a"));
        assert!(!state.close("a"));
    }

    #[tokio::test]
    async fn test_invalid_origin() {
        let state = test_state();
        let result = list_items_handler(
            State(state),
            Path("bad\0origin".to_string()),
            Query(SourceQuery::default()),
        )
        .await;
        assert!(matches!(result, Err(StorageError::InvalidOrigin(_))));
    }

    #[tokio::test]
    async fn test_fork_handler_opens_target() {
        let state = test_state();
        state
            .binding("src")
            .unwrap()
            .put(b"k".to_vec(), b"v".to_vec(), "t")
            .await
            .unwrap();

        let response = fork_handler(
            State(state.clone()),
            Path("src".to_string()),
            Json(ForkRequest {
                target: "dst".to_string(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.entries, 1);
        assert_eq!(state.close_all(), 2);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await;
        assert_eq!(response.status, "healthy");
    }
}
