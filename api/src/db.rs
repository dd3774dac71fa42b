//! Database connection module for `ClickHouse`.
//!
//! Creates the `ClickHouse` client from environment variables and exposes the
//! record store built on top of it.

use anyhow::{Context, Result};
use clickhouse::Client;
use shared::storage::ClickHouseRecordStore;
use std::sync::Arc;

/// Database configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `ClickHouse` database URL (e.g., <http://localhost:8123>)
    pub url: String,
    /// Database name to use
    pub database: String,
    /// Username for authentication
    pub user: String,
    /// Password for authentication
    pub password: String,
}

impl DatabaseConfig {
    /// Load database configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TRACKLOG_DB_URL`: Database URL (default: <http://localhost:8123>)
    /// - `TRACKLOG_DB_NAME`: Database name (default: "tracklog")
    /// - `TRACKLOG_DB_USER`: Database user (default: "tracklog")
    /// - `TRACKLOG_DB_PASSWORD`: Database password (default: "`tracklog_dev`")
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("TRACKLOG_DB_URL")
                .unwrap_or_else(|_| "http://localhost:8123".to_string()),
            database: std::env::var("TRACKLOG_DB_NAME").unwrap_or_else(|_| "tracklog".to_string()),
            user: std::env::var("TRACKLOG_DB_USER").unwrap_or_else(|_| "tracklog".to_string()),
            password: std::env::var("TRACKLOG_DB_PASSWORD")
                .unwrap_or_else(|_| "tracklog_dev".to_string()),
        }
    }
}

/// Database client wrapper.
#[derive(Clone)]
pub struct Database {
    client: Arc<Client>,
}

impl Database {
    /// Create a new database client from configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// # use api::db::{Database, DatabaseConfig};
    /// let config = DatabaseConfig::from_env();
    /// let db = Database::new(&config);
    /// let _store = db.record_store();
    /// ```
    #[must_use]
    pub fn new(config: &DatabaseConfig) -> Self {
        let client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database)
            .with_user(&config.user)
            .with_password(&config.password);

        Self {
            client: Arc::new(client),
        }
    }

    /// Get a reference to the underlying `ClickHouse` client.
    #[must_use]
    pub fn client(&self) -> Arc<Client> {
        Arc::clone(&self.client)
    }

    /// Record store backed by this database.
    #[must_use]
    pub fn record_store(&self) -> Arc<ClickHouseRecordStore> {
        ClickHouseRecordStore::new_shared(self.client())
    }

    /// Test database connectivity by executing a simple query.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached or the query fails.
    pub async fn ping(&self) -> Result<()> {
        self.client
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .context("Failed to ping database")?;
        Ok(())
    }

    /// Pings the database and creates the record table if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable or the DDL fails.
    pub async fn prepare(&self) -> Result<Arc<ClickHouseRecordStore>> {
        self.ping().await?;

        let store = self.record_store();
        store
            .ensure_schema()
            .await
            .context("Failed to create track_logs table")?;

        tracing::info!("ClickHouse record store ready");
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_with_custom_values() {
        let config = DatabaseConfig {
            url: "http://custom:8123".to_string(),
            database: "test_db".to_string(),
            user: "test_user".to_string(),
            password: "test_pass".to_string(),
        };

        let db = Database::new(&config);
        let _store = db.record_store();
    }

    #[tokio::test]
    async fn test_ping_unreachable_database_fails() {
        let config = DatabaseConfig {
            url: "http://127.0.0.1:1".to_string(),
            database: "tracklog".to_string(),
            user: "tracklog".to_string(),
            password: "tracklog_dev".to_string(),
        };

        assert!(Database::new(&config).ping().await.is_err());
    }
}
