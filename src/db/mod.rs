//! Database connection and repository access

pub mod sqlite_helpers;

use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::config::RepositoryConfig;
use crate::orm::{DatabaseEntity, Repository};

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the configured SQLite database
    pub async fn connect(config: &RepositoryConfig) -> Result<Self> {
        let options = if config.database_url.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(&config.database_url)
                .with_context(|| format!("Invalid database URL {}", config.database_url))?
        } else {
            SqliteConnectOptions::new().filename(&config.database_url)
        };
        let options = options.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to {}", config.database_url))?;

        tracing::info!(
            database = %config.database_url,
            max_connections = config.max_connections,
            "Connected to database"
        );
        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get a repository for entity `E`
    pub fn repository<E: DatabaseEntity>(&self) -> Repository<E> {
        Repository::new(self.pool.clone())
    }
}
