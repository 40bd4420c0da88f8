//! Lazily established, pooled database connection.
//!
//! [`ConnectionManager`] owns at most one live pool at a time. The pool is
//! created on the first successful [`ConnectionManager::connect`] and shared
//! (it is internally reference counted) by every caller afterwards.
//!
//! ## State machine
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected --close--> Closed
//!      ^                        |
//!      +--------- error --------+
//! ```
//!
//! The state lives behind a [`RwLock`]. `connect` first takes a read lock and
//! returns an existing pool without contention; only when no pool exists does
//! it take the write lock, re-check the state and dial. Concurrent callers
//! queue on the write lock and observe the winner's pool, so exactly one
//! physical connection attempt happens per transition out of `Disconnected`.
//!
//! `Closed` is terminal: a closed manager refuses to reconnect.

use crate::server::database::{config::ConnectionConfig, error::ConnectionError};
use core::future::Future;
use portable_atomic::{AtomicU8, Ordering};
use sqlx::any::{AnyConnectOptions, AnyPoolOptions};
use sqlx::{AnyPool, ConnectOptions, Connection};
use std::str::FromStr;
use tokio::sync::{RwLock, RwLockWriteGuard};

/// Opens a configured connection pool for a DSN.
///
/// This is the single point where a physical connection is established, which
/// lets tests count dials or inject failures.
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        dsn: &str,
        config: &ConnectionConfig,
    ) -> impl Future<Output = Result<AnyPool, ConnectionError>> + Send;
}

/// Production [`Connector`] backed by the `sqlx` "any" driver, so the same
/// binary serves `postgres://` and `sqlite:` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxConnector;

impl Connector for SqlxConnector {
    async fn connect(
        &self,
        dsn: &str,
        config: &ConnectionConfig,
    ) -> Result<AnyPool, ConnectionError> {
        sqlx::any::install_default_drivers();

        let statements: log::LevelFilter = config.log_level.into();
        let slow_statements = if statements == log::LevelFilter::Off {
            log::LevelFilter::Off
        } else {
            log::LevelFilter::Warn
        };
        let options = AnyConnectOptions::from_str(dsn)
            .map_err(ConnectionError::Dial)?
            .log_statements(statements)
            .log_slow_statements(slow_statements, config.slow_query_threshold);

        // sqlx has no idle ceiling; connections above `min_connections` are
        // reaped after `idle_timeout`, which converges on the same idle count.
        AnyPoolOptions::new()
            .max_connections(config.max_open_connections)
            .min_connections(config.max_idle_connections)
            .max_lifetime(config.connection_max_lifetime)
            .idle_timeout(config.connection_max_idle_time)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(ConnectionError::Dial)
    }
}

/// Observable lifecycle of a [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionStatus {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Closed = 3,
}

impl ConnectionStatus {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Closed,
            _ => Self::Disconnected,
        }
    }
}

enum ConnectionState {
    Disconnected,
    Connecting,
    Connected(AnyPool),
    Closed,
}

impl ConnectionState {
    const fn status(&self) -> ConnectionStatus {
        match self {
            Self::Disconnected => ConnectionStatus::Disconnected,
            Self::Connecting => ConnectionStatus::Connecting,
            Self::Connected(_) => ConnectionStatus::Connected,
            Self::Closed => ConnectionStatus::Closed,
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub open: u32,
    pub in_use: u32,
    pub idle: u32,
}

impl From<&AnyPool> for PoolStats {
    fn from(pool: &AnyPool) -> Self {
        let open = pool.size();
        let idle = u32::try_from(pool.num_idle()).unwrap_or(u32::MAX).min(open);
        Self {
            open,
            in_use: open - idle,
            idle,
        }
    }
}

pub struct ConnectionManager<C = SqlxConnector> {
    connector: C,
    config: ConnectionConfig,
    state: RwLock<ConnectionState>,
    status: AtomicU8,
}

/// Write access to the state that keeps the lock-free status mirror in sync.
///
/// Dropping it while still `Connecting` (the dial was cancelled) rolls the
/// state back to `Disconnected`.
struct StateWriter<'a> {
    state: RwLockWriteGuard<'a, ConnectionState>,
    status: &'a AtomicU8,
}

impl StateWriter<'_> {
    fn set(&mut self, next: ConnectionState) -> ConnectionState {
        self.status.store(next.status() as u8, Ordering::Release);
        core::mem::replace(&mut *self.state, next)
    }
}

impl Drop for StateWriter<'_> {
    fn drop(&mut self) {
        if matches!(*self.state, ConnectionState::Connecting) {
            self.set(ConnectionState::Disconnected);
        }
    }
}

impl ConnectionManager<SqlxConnector> {
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_connector(SqlxConnector, config)
    }
}

impl<C: Connector> ConnectionManager<C> {
    pub fn with_connector(connector: C, config: ConnectionConfig) -> Self {
        Self {
            connector,
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            status: AtomicU8::new(ConnectionStatus::Disconnected as u8),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Current lifecycle status, readable without waiting on the state lock.
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Returns the shared pool, establishing it first if needed.
    ///
    /// Establishing means: open the pool with this manager's
    /// [`ConnectionConfig`], then ping it. Any failure leaves the manager
    /// `Disconnected` so a later call can try again. This method never
    /// retries; wrap it in a [`RetryPolicy`] for that.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::EmptyDsn`] if `dsn` is empty (no dial attempted).
    /// - [`ConnectionError::Dial`] / [`ConnectionError::Ping`] on driver
    ///   failures.
    /// - [`ConnectionError::Closed`] after [`ConnectionManager::close`].
    ///
    /// [`RetryPolicy`]: crate::server::database::retry::RetryPolicy
    pub async fn connect(&self, dsn: &str) -> Result<AnyPool, ConnectionError> {
        {
            let state = self.state.read().await;
            match &*state {
                ConnectionState::Connected(pool) => return Ok(pool.clone()),
                ConnectionState::Closed => return Err(ConnectionError::Closed),
                ConnectionState::Disconnected | ConnectionState::Connecting => {}
            }
        }

        let mut writer = StateWriter {
            state: self.state.write().await,
            status: &self.status,
        };

        // Another caller may have won the race while we waited for the lock.
        match &*writer.state {
            ConnectionState::Connected(pool) => return Ok(pool.clone()),
            ConnectionState::Closed => return Err(ConnectionError::Closed),
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }

        if dsn.is_empty() {
            return Err(ConnectionError::EmptyDsn);
        }

        writer.set(ConnectionState::Connecting);
        match self.establish(dsn).await {
            Ok(pool) => {
                writer.set(ConnectionState::Connected(pool.clone()));
                tracing::info!(
                    max_open = self.config.max_open_connections,
                    max_idle = self.config.max_idle_connections,
                    "Database connection established"
                );
                Ok(pool)
            }
            Err(err) => {
                writer.set(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    async fn establish(&self, dsn: &str) -> Result<AnyPool, ConnectionError> {
        let pool = self.connector.connect(dsn, &self.config).await?;
        if let Err(err) = ping(&pool).await {
            pool.close().await;
            return Err(err);
        }
        Ok(pool)
    }

    /// Returns the existing pool without dialing.
    ///
    /// This is the request-path accessor: handlers never establish or retry.
    pub async fn pool(&self) -> Result<AnyPool, ConnectionError> {
        match &*self.state.read().await {
            ConnectionState::Connected(pool) => Ok(pool.clone()),
            ConnectionState::Closed => Err(ConnectionError::Closed),
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                Err(ConnectionError::NotConnected)
            }
        }
    }

    /// Pings the existing pool. Never creates one.
    pub async fn health_check(&self) -> Result<(), ConnectionError> {
        let pool = self.pool().await?;
        ping(&pool).await
    }

    pub async fn stats(&self) -> Result<PoolStats, ConnectionError> {
        let pool = self.pool().await?;
        Ok(PoolStats::from(&pool))
    }

    /// Releases the pool and moves to `Closed`. Safe to call repeatedly.
    pub async fn close(&self) {
        let mut writer = StateWriter {
            state: self.state.write().await,
            status: &self.status,
        };
        if let ConnectionState::Connected(pool) = writer.set(ConnectionState::Closed) {
            pool.close().await;
            tracing::info!("Database connection pool closed");
        }
    }
}

async fn ping(pool: &AnyPool) -> Result<(), ConnectionError> {
    let mut conn = pool.acquire().await.map_err(ConnectionError::Ping)?;
    conn.ping().await.map_err(ConnectionError::Ping)
}
