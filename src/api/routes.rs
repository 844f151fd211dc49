//! API Routes
//!
//! Configures the Axum router with all storage server endpoints.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_items_handler, close_handler, commit_handler, delete_item_handler,
    delete_origin_handler, fork_handler, get_item_handler, health_handler, list_items_handler,
    put_item_handler, stats_handler, usage_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET|DELETE /origins/:origin/items` - List or clear an origin
/// - `GET|PUT|DELETE /origins/:origin/items/:key` - Single key access
/// - `POST /origins/:origin/commit` - Commit pending changes now
/// - `POST /origins/:origin/fork` - Copy an origin into another
/// - `DELETE /origins/:origin` - Release the server's binding
/// - `DELETE /origins/:origin/data` - Erase an origin's data
/// - `GET /usage` - Persisted usage per origin
/// - `GET /stats` - Registry statistics
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/origins/:origin/items",
            get(list_items_handler).delete(clear_items_handler),
        )
        .route(
            "/origins/:origin/items/:key",
            get(get_item_handler)
                .put(put_item_handler)
                .delete(delete_item_handler),
        )
        .route("/origins/:origin/commit", post(commit_handler))
        .route("/origins/:origin/fork", post(fork_handler))
        .route("/origins/:origin/data", delete(delete_origin_handler))
        .route("/origins/:origin", delete(close_handler))
        .route("/usage", get(usage_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
