//! Storage Statistics Module
//!
//! Point-in-time snapshots of wrapper and registry state.

use serde::Serialize;

// == Wrapper Stats ==
/// State of one wrapper at the time of the call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WrapperStats {
    /// Whether the map has been imported from the backing store
    pub loaded: bool,
    /// Number of keys in the live map
    pub entries: usize,
    /// Bytes charged against the quota
    pub bytes_used: usize,
    /// Quota in bytes
    pub max_size: usize,
    /// Number of keys waiting in the pending batch
    pub pending_changes: usize,
    /// Whether the pending batch starts with a full prefix delete
    pub pending_clear_all: bool,
    /// Commits handed to the backing store and not yet completed
    pub commits_in_flight: usize,
    /// Set once the wrapper lost its backing store
    pub memory_only: bool,
    pub bindings: usize,
    pub observers: usize,
}

impl WrapperStats {
    // == Quota Utilization ==
    /// Fraction of the quota in use, 0.0 for a zero quota.
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.bytes_used as f64 / self.max_size as f64
        }
    }

    pub fn has_pending_commit(&self) -> bool {
        self.pending_changes > 0 || self.pending_clear_all
    }
}

// == Origin Stats ==
#[derive(Debug, Clone, Serialize)]
pub struct OriginStats {
    pub origin: String,
    #[serde(flatten)]
    pub wrapper: WrapperStats,
}

// == Registry Stats ==
/// Totals across every open origin.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub open_origins: usize,
    pub total_entries: usize,
    pub total_bytes: usize,
    /// Backing-store writes that failed since the registry was created
    pub commit_failures: u64,
    pub origins: Vec<OriginStats>,
}

impl RegistryStats {
    /// Builds the totals from per-origin stats, sorted by origin.
    pub fn from_origins(mut origins: Vec<OriginStats>) -> Self {
        origins.sort_by(|a, b| a.origin.cmp(&b.origin));
        Self {
            open_origins: origins.len(),
            total_entries: origins.iter().map(|o| o.wrapper.entries).sum(),
            total_bytes: origins.iter().map(|o| o.wrapper.bytes_used).sum(),
            commit_failures: 0,
            origins,
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization_zero_quota() {
        let stats = WrapperStats::default();
        assert_eq!(stats.utilization(), 0.0);
    }

    #[test]
    fn test_utilization() {
        let stats = WrapperStats {
            bytes_used: 5,
            max_size: 10,
            ..Default::default()
        };
        assert_eq!(stats.utilization(), 0.5);
    }

    #[test]
    fn test_pending_commit_includes_bare_clear() {
        let stats = WrapperStats {
            pending_clear_all: true,
            ..Default::default()
        };
        assert!(stats.has_pending_commit());
        assert!(!WrapperStats::default().has_pending_commit());
    }

    #[test]
    fn test_registry_totals() {
        let origin = |name: &str, entries, bytes_used| OriginStats {
            origin: name.to_string(),
            wrapper: WrapperStats {
                entries,
                bytes_used,
                ..Default::default()
            },
        };
        let stats = RegistryStats::from_origins(vec![origin("b", 2, 20), origin("a", 1, 5)]);

        assert_eq!(stats.open_origins, 2);
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.total_bytes, 25);
        assert_eq!(stats.origins[0].origin, "a");
    }

    #[test]
    fn test_origin_stats_serialize_flat() {
        let stats = OriginStats {
            origin: "https://a.test".to_string(),
            wrapper: WrapperStats::default(),
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["origin"], "https://a.test");
        assert_eq!(json["entries"], 0);
    }
}
