//! PostgreSQL connection pool
//!
//! This module owns the deadpool pool and hands out sessions with the
//! configured statement timeout applied.

use crate::config::schema::PostgreSQLConfig;
use crate::config::redact_connection_string;
use crate::domain::{EtlError, Result, StoreError};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio_postgres::NoTls;

/// Pooled PostgreSQL client
///
/// Every job takes its own session from the pool so the unit of work of one
/// job never spans another job's statements.
pub struct PostgresClient {
    /// Connection pool
    pool: Pool,

    /// Configuration
    config: PostgreSQLConfig,
}

impl PostgresClient {
    /// Create a new PostgreSQL client
    ///
    /// # Arguments
    ///
    /// * `config` - PostgreSQL configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the connection string is invalid or the pool
    /// cannot be built. No connection is opened until the first session.
    pub fn new(config: PostgreSQLConfig) -> Result<Self> {
        let raw: &str = config.connection_string.expose_secret().as_ref();
        let pg_config: tokio_postgres::Config = raw.parse().map_err(|e| {
            EtlError::Configuration(format!("Invalid PostgreSQL connection string: {}", e))
        })?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let timeout = Some(Duration::from_secs(config.connection_timeout_seconds));
        let pool = Pool::builder(manager)
            .max_size(config.max_connections)
            .wait_timeout(timeout)
            .create_timeout(timeout)
            .recycle_timeout(timeout)
            .runtime(deadpool_postgres::Runtime::Tokio1)
            .build()
            .map_err(|e| {
                StoreError::ConnectionFailed(format!("Failed to create connection pool: {}", e))
            })?;

        Ok(Self { pool, config })
    }

    /// Take a dedicated session from the pool
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConnectionFailed`] if no connection can be
    /// obtained or the statement timeout cannot be set.
    pub async fn session(&self) -> Result<Object> {
        let client = self.pool.get().await.map_err(|e| {
            StoreError::ConnectionFailed(format!(
                "Failed to get connection to {}: {}",
                self.connection_string_safe(),
                e
            ))
        })?;

        let timeout_query = format!(
            "SET statement_timeout = {}",
            self.config.statement_timeout_seconds * 1000
        );
        client
            .batch_execute(&timeout_query)
            .await
            .map_err(|e| StoreError::ConnectionFailed(describe(&e)))?;

        Ok(client)
    }

    /// Test the connection to PostgreSQL
    pub async fn test_connection(&self) -> Result<()> {
        let client = self.session().await?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| StoreError::ConnectionFailed(describe(&e)))?;

        tracing::info!(
            target = %self.connection_string_safe(),
            "PostgreSQL connection test successful"
        );
        Ok(())
    }

    /// Get the connection string (without password)
    pub fn connection_string_safe(&self) -> String {
        redact_connection_string(&self.config.connection_string)
    }

    /// Get the pool statistics
    pub fn pool_status(&self) -> deadpool_postgres::Status {
        self.pool.status()
    }
}

/// Server-side message of a driver error, falling back to its display form
pub(crate) fn describe(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => match db.detail() {
            Some(detail) => format!("{} ({})", db.message(), detail),
            None => db.message().to_string(),
        },
        None => err.to_string(),
    }
}
