//! Response DTOs for the storage server API
//!
//! Defines the structure of outgoing HTTP response bodies. Keys and values
//! travel as UTF-8 strings; stored bytes that are not valid UTF-8 are
//! rendered lossily.

use serde::Serialize;

use crate::storage::OriginUsage;

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Response body for GET /origins/:origin/items/:key
#[derive(Debug, Clone, Serialize)]
pub struct ItemResponse {
    pub origin: String,
    pub key: String,
    pub value: String,
}

impl ItemResponse {
    pub fn new(origin: impl Into<String>, key: impl Into<String>, value: &[u8]) -> Self {
        Self {
            origin: origin.into(),
            key: key.into(),
            value: lossy(value),
        }
    }
}

/// One entry of an [`ItemsResponse`]
#[derive(Debug, Clone, Serialize)]
pub struct ItemEntry {
    pub key: String,
    pub value: String,
}

/// Response body for GET /origins/:origin/items
#[derive(Debug, Clone, Serialize)]
pub struct ItemsResponse {
    pub origin: String,
    pub count: usize,
    /// Entries in key order
    pub items: Vec<ItemEntry>,
}

impl ItemsResponse {
    pub fn new(origin: impl Into<String>, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        let items: Vec<ItemEntry> = entries
            .iter()
            .map(|(key, value)| ItemEntry {
                key: lossy(key),
                value: lossy(value),
            })
            .collect();
        Self {
            origin: origin.into(),
            count: items.len(),
            items,
        }
    }
}

/// Response body for PUT /origins/:origin/items/:key
#[derive(Debug, Clone, Serialize)]
pub struct PutResponse {
    /// Success message
    pub message: String,
    /// The key that was stored
    pub key: String,
}

impl PutResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' stored successfully", key),
            key,
        }
    }
}

/// Response body for DELETE /origins/:origin/items/:key
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The key that was deleted
    pub key: String,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for DELETE /origins/:origin/items and
/// DELETE /origins/:origin/data
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub message: String,
    pub origin: String,
}

impl ClearResponse {
    pub fn new(origin: impl Into<String>) -> Self {
        let origin = origin.into();
        Self {
            message: format!("All keys of '{}' deleted", origin),
            origin,
        }
    }
}

/// Response body for POST /origins/:origin/commit
#[derive(Debug, Clone, Serialize)]
pub struct CommitResponse {
    pub origin: String,
    /// Bytes used by the origin after the commit
    pub bytes_used: usize,
}

/// Response body for POST /origins/:origin/fork
#[derive(Debug, Clone, Serialize)]
pub struct ForkResponse {
    pub source: String,
    pub target: String,
    /// Number of entries copied
    pub entries: usize,
}

/// Response body for DELETE /origins/:origin
#[derive(Debug, Clone, Serialize)]
pub struct CloseResponse {
    pub origin: String,
    /// Whether the origin is gone from the registry after the call
    pub evicted: bool,
}

/// Response body for GET /usage
#[derive(Debug, Clone, Serialize)]
pub struct UsageResponse {
    pub total_bytes: usize,
    pub origins: Vec<OriginUsage>,
}

impl UsageResponse {
    pub fn new(origins: Vec<OriginUsage>) -> Self {
        Self {
            total_bytes: origins.iter().map(|u| u.size_bytes).sum(),
            origins,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_response_lossy_value() {
        let resp = ItemResponse::new("o", "k", &[0x66, 0xff]);
        assert_eq!(resp.value, "f\u{fffd}");
    }

    #[test]
    fn test_items_response_count() {
        let resp = ItemsResponse::new(
            "o",
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
            ],
        );
        assert_eq!(resp.count, 2);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["items"][1]["key"], "b");
    }

    #[test]
    fn test_put_response_serialize() {
        let resp = PutResponse::new("my_key");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("my_key"));
        assert!(json.contains("successfully"));
    }

    #[test]
    fn test_delete_response_serialize() {
        let resp = DeleteResponse::new("deleted_key");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("deleted_key"));
        assert!(json.contains("deleted"));
    }

    #[test]
    fn test_usage_response_total() {
        let usage = |origin: &str, size_bytes| OriginUsage {
            origin: origin.to_string(),
            size_bytes,
            last_modified: None,
        };
        let resp = UsageResponse::new(vec![usage("a", 3), usage("b", 4)]);
        assert_eq!(resp.total_bytes, 7);
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy();
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("timestamp"));
    }
}
