//! Request DTOs for the storage server API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use serde::Deserialize;

/// Source tag used when a request does not name one
pub const DEFAULT_SOURCE: &str = "http";

fn default_source() -> String {
    DEFAULT_SOURCE.to_string()
}

/// Query string of calls that notify observers (`?source=`)
#[derive(Debug, Clone, Deserialize)]
pub struct SourceQuery {
    /// Tag passed through to observer events
    #[serde(default = "default_source")]
    pub source: String,
}

impl Default for SourceQuery {
    fn default() -> Self {
        Self {
            source: default_source(),
        }
    }
}

/// Request body for PUT /origins/:origin/items/:key
#[derive(Debug, Clone, Deserialize)]
pub struct PutItemRequest {
    /// The value to store
    pub value: String,
}

/// Request body for POST /origins/:origin/fork
#[derive(Debug, Clone, Deserialize)]
pub struct ForkRequest {
    /// Origin that receives the copy
    pub target: String,
}

impl ForkRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self, source: &str) -> Option<String> {
        if self.target.is_empty() {
            return Some("Target origin cannot be empty".to_string());
        }
        if self.target == source {
            return Some("Target origin must differ from the source".to_string());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_request_deserialize() {
        let json = r#"{"value": "hello"}"#;
        let req: PutItemRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.value, "hello");
    }

    #[test]
    fn test_source_query_default() {
        let query: SourceQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.source, "http");
        assert_eq!(SourceQuery::default().source, "http");
    }

    #[test]
    fn test_validate_fork_request() {
        let req = ForkRequest {
            target: "".to_string(),
        };
        assert!(req.validate("a").is_some());

        let req = ForkRequest {
            target: "a".to_string(),
        };
        assert!(req.validate("a").is_some());
        assert!(req.validate("b").is_none());
    }
}
