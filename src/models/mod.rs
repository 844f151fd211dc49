//! Request and Response models for the storage server API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{ForkRequest, PutItemRequest, SourceQuery};
pub use responses::{
    ClearResponse, CloseResponse, CommitResponse, DeleteResponse, ForkResponse, HealthResponse,
    ItemEntry, ItemResponse, ItemsResponse, PutResponse, UsageResponse,
};
