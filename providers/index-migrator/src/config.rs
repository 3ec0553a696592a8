//! Configuration for Index Migrator Provider

use crate::{MigrationError, Result};
use search_common::schema::DEFAULT_ID_SCRIPT;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Search calls made by one migration besides the copy wait: lookup, exists,
/// create, swap, reindex, count, lookup, delete
const MIGRATION_REQUESTS: u64 = 8;

/// Configuration for Index Migrator Provider
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MigratorConfig {
    /// Redis connection URL (job lock)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_pool_size")]
    pub redis_pool_size: usize,

    /// Search engine base URL
    #[serde(default = "default_search_url")]
    pub search_url: String,

    #[serde(default)]
    pub search_username: Option<String>,

    #[serde(default)]
    pub search_password: Option<String>,

    /// Alias whose index is rebuilt
    #[serde(default = "default_alias")]
    pub alias: String,

    /// Only documents newer than this many days are copied
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Interval between copy task status polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Deadline for the copy task
    #[serde(default = "default_copy_timeout")]
    pub copy_timeout_secs: u64,

    /// Per-request timeout for bulk index operations
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,

    /// Six-field cron expression (with seconds)
    #[serde(default = "default_migration_cron")]
    pub migration_cron: String,

    /// Painless script assigning deterministic document ids
    #[serde(default = "default_id_script")]
    pub id_script: String,
}

impl MigratorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> std::result::Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn from_env_prefixed(prefix: &str) -> std::result::Result<Self, envy::Error> {
        envy::prefixed(prefix).from_env()
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn copy_timeout(&self) -> Duration {
        Duration::from_secs(self.copy_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn expected_migration_secs(&self) -> u64 {
        self.copy_timeout_secs + self.request_timeout_secs * MIGRATION_REQUESTS
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("lookback_days", u64::from(self.lookback_days)),
            ("poll_interval_secs", self.poll_interval_secs),
            ("copy_timeout_secs", self.copy_timeout_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("lock_ttl_secs", self.lock_ttl_secs),
            ("redis_pool_size", self.redis_pool_size as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(MigrationError::Configuration(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if self.alias.trim().is_empty() {
            return Err(MigrationError::Configuration("alias is empty".to_string()));
        }
        if self.poll_interval_secs >= self.copy_timeout_secs {
            return Err(MigrationError::Configuration(
                "poll_interval_secs must be shorter than copy_timeout_secs".to_string(),
            ));
        }

        let expected = self.expected_migration_secs();
        if self.lock_ttl_secs <= expected {
            return Err(MigrationError::Configuration(format!(
                "lock_ttl_secs ({}) must exceed the expected migration duration ({}s)",
                self.lock_ttl_secs, expected
            )));
        }
        Ok(())
    }
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            redis_pool_size: default_pool_size(),
            search_url: default_search_url(),
            search_username: None,
            search_password: None,
            alias: default_alias(),
            lookback_days: default_lookback_days(),
            poll_interval_secs: default_poll_interval(),
            copy_timeout_secs: default_copy_timeout(),
            request_timeout_secs: default_request_timeout(),
            lock_ttl_secs: default_lock_ttl(),
            migration_cron: default_migration_cron(),
            id_script: default_id_script(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    4
}

fn default_search_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_alias() -> String {
    "transactions".to_string()
}

fn default_lookback_days() -> u32 {
    30
}

fn default_poll_interval() -> u64 {
    10
}

fn default_copy_timeout() -> u64 {
    3_600 // 1 hour
}

fn default_request_timeout() -> u64 {
    300 // bulk operations run for minutes
}

fn default_lock_ttl() -> u64 {
    7_200
}

fn default_migration_cron() -> String {
    "0 0 3 * * Sun".to_string()
}

fn default_id_script() -> String {
    DEFAULT_ID_SCRIPT.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = MigratorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.expected_migration_secs(), 6_000);
    }

    #[test]
    fn lock_ttl_must_outlast_migration() {
        let config = MigratorConfig {
            lock_ttl_secs: 3_600,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(MigrationError::Configuration(msg)) if msg.contains("lock_ttl_secs")
        ));
    }

    #[test]
    fn poll_interval_must_fit_copy_window() {
        let config = MigratorConfig {
            poll_interval_secs: 10,
            copy_timeout_secs: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
