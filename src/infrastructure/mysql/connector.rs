//! MySQL connectivity with pool-then-direct acquisition fallback.

use std::time::Duration;

use sqlx::mysql::{MySql, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlConnection};
use sqlx::pool::PoolConnection;
use sqlx::{ConnectOptions, Connection};
use thiserror::Error;

use crate::infrastructure::config::DatabaseConfig;

#[derive(Debug, Error)]
pub enum AcquireError {
    /// Both the pool and the standalone fallback failed.
    #[error("no database connection available: {0}")]
    Unavailable(#[source] sqlx::Error),
}

/// How an acquired handle must be given back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseDiscipline {
    /// Pooled connection, returned to the pool on release
    PoolReturn,
    /// Standalone connection, explicitly closed on release
    Close,
}

/// A database connection together with its release discipline.
///
/// The discipline is fixed at acquisition and honored by [`DbHandle::release`];
/// the two variants are not interchangeable at teardown.
pub enum DbHandle {
    Pooled(PoolConnection<MySql>),
    Direct(MySqlConnection),
}

impl DbHandle {
    pub fn discipline(&self) -> ReleaseDiscipline {
        match self {
            DbHandle::Pooled(_) => ReleaseDiscipline::PoolReturn,
            DbHandle::Direct(_) => ReleaseDiscipline::Close,
        }
    }

    /// Borrow the underlying connection for query execution.
    pub fn connection(&mut self) -> &mut MySqlConnection {
        match self {
            DbHandle::Pooled(conn) => &mut *conn,
            DbHandle::Direct(conn) => conn,
        }
    }

    /// Give the connection back per its recorded discipline.
    pub async fn release(self) {
        match self {
            // Dropping a pool connection returns it to the pool
            DbHandle::Pooled(conn) => drop(conn),
            DbHandle::Direct(conn) => {
                if let Err(e) = conn.close().await {
                    tracing::warn!(error = %e, "Failed to close standalone connection");
                }
            }
        }
    }
}

/// MySQL connector owning the bounded pool shared by all sessions.
///
/// The pool is the single backpressure point: on exhaustion or pool error,
/// acquisition falls back to one standalone connection before giving up.
pub struct MysqlConnector {
    pool: MySqlPool,
    options: MySqlConnectOptions,
}

impl MysqlConnector {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds as u64))
            .connect_with(options.clone())
            .await?;

        tracing::info!(
            pool_size = config.pool_size,
            host = %config.host,
            database = %config.name,
            "MySQL connection pool created"
        );

        Ok(Self { pool, options })
    }

    /// Get a reference to the underlying pool (handshake-time lookups).
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Acquire a per-session handle: pool first, standalone fallback.
    pub async fn acquire(&self) -> Result<DbHandle, AcquireError> {
        match self.pool.acquire().await {
            Ok(conn) => Ok(DbHandle::Pooled(conn)),
            Err(pool_err) => {
                tracing::warn!(
                    error = %pool_err,
                    "Pool acquisition failed, falling back to standalone connection"
                );

                match self.options.connect().await {
                    Ok(conn) => Ok(DbHandle::Direct(conn)),
                    Err(direct_err) => {
                        tracing::error!(
                            error = %direct_err,
                            "Standalone connection fallback failed"
                        );
                        Err(AcquireError::Unavailable(direct_err))
                    }
                }
            }
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("MySQL connection pool closed");
    }
}
