//! API Module
//!
//! HTTP handlers and routing for the storage server REST API.
//!
//! # Endpoints
//! - `/origins/:origin/items[/:key]` - Per-origin key-value access
//! - `/origins/:origin/{commit,fork,data}` - Origin maintenance
//! - `DELETE /origins/:origin` - Release an origin
//! - `GET /usage`, `GET /stats` - Usage and statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
