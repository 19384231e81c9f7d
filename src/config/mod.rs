//! Repository configuration management

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::orm::pagination::{DEFAULT_LIMIT_PAGE, PageLimits, UNLIMITED_PAGE};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:./data/repokit.db";

/// Configuration loaded from environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    /// SQLite URL (`sqlite:...`) or plain file path
    pub database_url: String,

    /// Pool size
    pub max_connections: u32,

    /// How long to wait for a pooled connection
    pub acquire_timeout: Duration,

    /// Page size used when a request does not name one
    pub default_page_size: i64,

    /// Page size treated as "everything"
    pub unlimited_page_size: i64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(10),
            default_page_size: DEFAULT_LIMIT_PAGE,
            unlimited_page_size: UNLIMITED_PAGE,
        }
    }
}

impl RepositoryConfig {
    /// Load configuration from the process environment (and `.env`, if any)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        // Prefer DATABASE_PATH, fall back to DATABASE_URL
        let database_url = lookup("DATABASE_PATH")
            .or_else(|| lookup("DATABASE_URL"))
            .unwrap_or(defaults.database_url);

        let max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            Some(v) => v.parse().context("Invalid DATABASE_MAX_CONNECTIONS")?,
            None => defaults.max_connections,
        };

        let acquire_timeout = match lookup("DATABASE_ACQUIRE_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(v.parse().context("Invalid DATABASE_ACQUIRE_TIMEOUT_SECS")?),
            None => defaults.acquire_timeout,
        };

        let default_page_size = match lookup("DEFAULT_PAGE_SIZE") {
            Some(v) => v.parse().context("Invalid DEFAULT_PAGE_SIZE")?,
            None => defaults.default_page_size,
        };

        let unlimited_page_size = match lookup("UNLIMITED_PAGE_SIZE") {
            Some(v) => v.parse().context("Invalid UNLIMITED_PAGE_SIZE")?,
            None => defaults.unlimited_page_size,
        };

        if max_connections == 0 {
            anyhow::bail!("DATABASE_MAX_CONNECTIONS must be at least 1");
        }
        if default_page_size < 1 || unlimited_page_size < default_page_size {
            anyhow::bail!(
                "page sizes must satisfy 1 <= DEFAULT_PAGE_SIZE ({}) <= UNLIMITED_PAGE_SIZE ({})",
                default_page_size,
                unlimited_page_size
            );
        }

        Ok(Self {
            database_url,
            max_connections,
            acquire_timeout,
            default_page_size,
            unlimited_page_size,
        })
    }

    /// Page defaults for [`crate::orm::Pagination::from_request`]
    pub fn page_limits(&self) -> PageLimits {
        PageLimits {
            default_page_size: self.default_page_size,
            unlimited_page_size: self.unlimited_page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RepositoryConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, RepositoryConfig::default());
        assert_eq!(config.page_limits(), PageLimits::default());
    }

    #[test]
    fn test_path_wins_over_url() {
        let config = RepositoryConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite:other.db"),
            ("DATABASE_PATH", "/tmp/app.db"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "/tmp/app.db");
    }

    #[test]
    fn test_overrides() {
        let config = RepositoryConfig::from_lookup(lookup(&[
            ("DATABASE_MAX_CONNECTIONS", "3"),
            ("DATABASE_ACQUIRE_TIMEOUT_SECS", "2"),
            ("DEFAULT_PAGE_SIZE", "25"),
            ("UNLIMITED_PAGE_SIZE", "500"),
        ]))
        .unwrap();
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.acquire_timeout, Duration::from_secs(2));
        assert_eq!(config.page_limits().default_page_size, 25);
        assert_eq!(config.page_limits().unlimited_page_size, 500);
    }

    #[test]
    fn test_invalid_values() {
        assert!(RepositoryConfig::from_lookup(lookup(&[("DATABASE_MAX_CONNECTIONS", "many")])).is_err());
        assert!(RepositoryConfig::from_lookup(lookup(&[("DATABASE_MAX_CONNECTIONS", "0")])).is_err());
        assert!(RepositoryConfig::from_lookup(lookup(&[("DEFAULT_PAGE_SIZE", "0")])).is_err());
    }
}
