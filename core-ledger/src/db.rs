//! # Database Connection Pool Module
//!
//! Provides the SQLite pool that holds the reconciliation bookkeeping tables
//! (`sync_mappings`, `reconciliation_errors`, `sync_profiles`).
//!
//! ## Features
//!
//! - **WAL Mode**: Enabled for file databases so several job workers can read
//!   while one writes
//! - **Connection Pooling**: Configurable max connections with timeouts
//! - **Automatic Migrations**: Embedded with `sqlx::migrate!` and run on
//!   initialization
//! - **Health Checks**: Connection validation
//!
//! ## Testing
//!
//! ```rust,ignore
//! let pool = create_test_pool().await?;
//! ```

use crate::{LedgerError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const IN_MEMORY_URL: &str = "sqlite::memory:";

/// Database configuration for the SQLite connection pool
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. `sqlite:ledger-sync.db` or `sqlite::memory:`
    pub database_url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Maximum time to wait for a connection from the pool
    pub acquire_timeout: Duration,

    /// Maximum idle time for a connection before being closed
    pub idle_timeout: Option<Duration>,
}

impl DatabaseConfig {
    /// Create a configuration from a SQLite URL
    pub fn from_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }

    /// Create a configuration for an in-memory database (useful for testing)
    ///
    /// Every SQLite in-memory connection is its own database, so the pool is
    /// pinned to a single connection that is never reaped.
    pub fn in_memory() -> Self {
        Self {
            database_url: IN_MEMORY_URL.to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: None,
        }
    }

    /// Set the maximum number of connections
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the connection acquire timeout
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:")
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Create a configured SQLite connection pool
///
/// Configures the connection options, opens the pool, runs the embedded
/// migrations and performs a health check.
///
/// # Errors
///
/// Returns an error if the database cannot be opened, migrations fail or
/// the health check fails.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    info!(
        database_url = %config.database_url,
        max_connections = config.max_connections,
        "Creating database connection pool"
    );

    let mut connect_options = SqliteConnectOptions::from_str(&config.database_url)?
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .create_if_missing(true);

    let mut pool_options = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout);

    if config.is_in_memory() {
        // Keep the single in-memory connection alive for the pool's lifetime
        pool_options = pool_options
            .max_connections(1)
            .min_connections(1)
            .max_lifetime(None)
            .idle_timeout(None);
    } else {
        connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool = pool_options
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to create connection pool");
            LedgerError::Database(e)
        })?;

    run_migrations(&pool).await?;
    health_check(&pool).await?;

    info!(
        connections = pool.size(),
        "Database connection pool created successfully"
    );

    Ok(pool)
}

/// Create an in-memory pool with migrations applied.
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(DatabaseConfig::in_memory()).await
}

async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    info!("Running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Migration failed");
            LedgerError::Migration(e.to_string())
        })?;

    info!("Database migrations completed successfully");
    Ok(())
}

async fn health_check(pool: &Pool<Sqlite>) -> Result<()> {
    debug!("Performing database health check");

    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!(error = %e, "Database health check failed");
        LedgerError::Database(e)
    })?;

    Ok(())
}
