//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::storage::{
    WrapperOptions, WriteFailurePolicy, DEFAULT_COMMIT_DELAY, DEFAULT_MAX_BYTES_PER_HOUR,
    DEFAULT_MAX_COMMITS_PER_HOUR, DEFAULT_MAX_SIZE,
};

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Log file for the backing store; in-memory store when unset
    pub data_file: Option<PathBuf>,
    /// Per-origin quota in bytes
    pub max_size: usize,
    /// Minimum delay before a batch is committed, in seconds
    pub commit_delay: u64,
    pub max_bytes_per_hour: usize,
    pub max_commits_per_hour: usize,
    /// Commit after a fixed short delay, ignoring the rate limits
    pub aggressive_flushing: bool,
    pub write_failure_policy: WriteFailurePolicy,
    /// Background memory purge interval in seconds
    pub purge_interval: u64,
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `DATA_FILE` - Backing log file path (default: unset, in-memory)
    /// - `MAX_SIZE_BYTES` - Per-origin quota (default: 10 MB)
    /// - `COMMIT_DELAY_SECS` - Default commit delay (default: 5)
    /// - `MAX_BYTES_PER_HOUR` - Write-back data rate (default: 10 MB)
    /// - `MAX_COMMITS_PER_HOUR` - Write-back commit rate (default: 60)
    /// - `AGGRESSIVE_FLUSHING` - `1`/`true` to flush after a fixed short delay
    /// - `WRITE_FAILURE_POLICY` - `discard` or `requeue` (default: discard)
    /// - `PURGE_INTERVAL` - Memory purge frequency in seconds (default: 300)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
            data_file: env::var_os("DATA_FILE")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            max_size: parse_var("MAX_SIZE_BYTES").unwrap_or(defaults.max_size),
            commit_delay: parse_var("COMMIT_DELAY_SECS").unwrap_or(defaults.commit_delay),
            // Rates of zero would make every commit wait forever
            max_bytes_per_hour: parse_var("MAX_BYTES_PER_HOUR")
                .filter(|&v| v > 0)
                .unwrap_or(defaults.max_bytes_per_hour),
            max_commits_per_hour: parse_var("MAX_COMMITS_PER_HOUR")
                .filter(|&v| v > 0)
                .unwrap_or(defaults.max_commits_per_hour),
            aggressive_flushing: parse_flag("AGGRESSIVE_FLUSHING")
                .unwrap_or(defaults.aggressive_flushing),
            write_failure_policy: parse_var("WRITE_FAILURE_POLICY")
                .unwrap_or(defaults.write_failure_policy),
            purge_interval: parse_var("PURGE_INTERVAL")
                .filter(|&v| v > 0)
                .unwrap_or(defaults.purge_interval),
        }
    }

    /// Options every wrapper of the registry is created with.
    pub fn wrapper_options(&self) -> WrapperOptions {
        WrapperOptions {
            max_size: self.max_size,
            default_commit_delay: Duration::from_secs(self.commit_delay),
            max_bytes_per_hour: self.max_bytes_per_hour,
            max_commits_per_hour: self.max_commits_per_hour,
            aggressive_flushing: self.aggressive_flushing,
            write_failure_policy: self.write_failure_policy,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            data_file: None,
            max_size: DEFAULT_MAX_SIZE,
            commit_delay: DEFAULT_COMMIT_DELAY.as_secs(),
            max_bytes_per_hour: DEFAULT_MAX_BYTES_PER_HOUR,
            max_commits_per_hour: DEFAULT_MAX_COMMITS_PER_HOUR,
            aggressive_flushing: false,
            write_failure_policy: WriteFailurePolicy::Discard,
            purge_interval: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 9] = [
        "SERVER_PORT",
        "DATA_FILE",
        "MAX_SIZE_BYTES",
        "COMMIT_DELAY_SECS",
        "MAX_BYTES_PER_HOUR",
        "MAX_COMMITS_PER_HOUR",
        "AGGRESSIVE_FLUSHING",
        "WRITE_FAILURE_POLICY",
        "PURGE_INTERVAL",
    ];

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server_port, 3000);
        assert!(config.data_file.is_none());
        assert_eq!(config.max_size, 10 * 1024 * 1024);
        assert_eq!(config.commit_delay, 5);
        assert_eq!(config.max_commits_per_hour, 60);
        assert!(!config.aggressive_flushing);
        assert_eq!(config.write_failure_policy, WriteFailurePolicy::Discard);
    }

    // Single test touching the environment, so parallel tests cannot race on it
    #[test]
    fn test_config_from_env() {
        for var in VARS {
            env::remove_var(var);
        }
        let config = Config::from_env();
        assert_eq!(config.server_port, 3000);
        assert!(config.data_file.is_none());
        assert_eq!(config.purge_interval, 300);

        env::set_var("SERVER_PORT", "8080");
        env::set_var("DATA_FILE", "/tmp/storage.log");
        env::set_var("MAX_COMMITS_PER_HOUR", "0");
        env::set_var("AGGRESSIVE_FLUSHING", "true");
        env::set_var("WRITE_FAILURE_POLICY", "requeue");
        env::set_var("COMMIT_DELAY_SECS", "not-a-number");

        let config = Config::from_env();
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.data_file, Some(PathBuf::from("/tmp/storage.log")));
        assert_eq!(config.max_commits_per_hour, 60);
        assert!(config.aggressive_flushing);
        assert_eq!(config.write_failure_policy, WriteFailurePolicy::Requeue);
        assert_eq!(config.commit_delay, 5);

        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_wrapper_options() {
        let config = Config {
            commit_delay: 2,
            aggressive_flushing: true,
            ..Default::default()
        };
        let options = config.wrapper_options();
        assert_eq!(options.default_commit_delay, Duration::from_secs(2));
        assert!(options.aggressive_flushing);
        assert_eq!(options.max_size, config.max_size);
    }
}
