//! Test doubles for the database layer.

use crate::server::database::{
    config::ConnectionConfig,
    error::ConnectionError,
    manager::{Connector, SqlxConnector},
};
use core::time::Duration;
use sqlx::AnyPool;
use std::sync::{
    Arc,
    atomic::{AtomicU32, AtomicUsize, Ordering},
};

/// Each connection to this URL gets a private database, so test pools are
/// limited to one connection.
pub const MEMORY_DSN: &str = "sqlite::memory:";

pub fn memory_config() -> ConnectionConfig {
    ConnectionConfig {
        max_open_connections: 1,
        max_idle_connections: 1,
        acquire_timeout: Duration::from_secs(5),
        ..ConnectionConfig::default()
    }
}

pub async fn memory_pool() -> AnyPool {
    SqlxConnector
        .connect(MEMORY_DSN, &memory_config())
        .await
        .unwrap()
}

#[derive(Clone, Default)]
pub struct DialCounter(Arc<AtomicUsize>);

impl DialCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counts dials and delays each one to widen race windows.
pub struct CountingConnector {
    dials: DialCounter,
    delay: Duration,
}

impl CountingConnector {
    pub fn new(delay: Duration) -> Self {
        Self {
            dials: DialCounter::default(),
            delay,
        }
    }

    pub fn dials(&self) -> DialCounter {
        self.dials.clone()
    }
}

impl Connector for CountingConnector {
    async fn connect(
        &self,
        dsn: &str,
        config: &ConnectionConfig,
    ) -> Result<AnyPool, ConnectionError> {
        self.dials.bump();
        tokio::time::sleep(self.delay).await;
        SqlxConnector.connect(dsn, config).await
    }
}

/// Refuses the first `failures` dials, then connects normally.
pub struct FlakyConnector {
    dials: DialCounter,
    failures: AtomicU32,
}

impl FlakyConnector {
    pub fn new(failures: u32) -> Self {
        Self {
            dials: DialCounter::default(),
            failures: AtomicU32::new(failures),
        }
    }

    pub fn dials(&self) -> DialCounter {
        self.dials.clone()
    }
}

impl Connector for FlakyConnector {
    async fn connect(
        &self,
        dsn: &str,
        config: &ConnectionConfig,
    ) -> Result<AnyPool, ConnectionError> {
        self.dials.bump();
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ConnectionError::Dial(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))));
        }
        SqlxConnector.connect(dsn, config).await
    }
}

/// Opens a pool and closes it before handing it over, so the follow-up ping
/// always fails.
#[derive(Default)]
pub struct ClosedPoolConnector {
    dials: DialCounter,
    handed_out: std::sync::Mutex<Option<AnyPool>>,
}

impl ClosedPoolConnector {
    pub fn dials(&self) -> DialCounter {
        self.dials.clone()
    }

    /// The last pool returned by `connect`.
    pub fn handed_out(&self) -> Option<AnyPool> {
        self.handed_out.lock().unwrap().clone()
    }
}

impl Connector for ClosedPoolConnector {
    async fn connect(
        &self,
        dsn: &str,
        config: &ConnectionConfig,
    ) -> Result<AnyPool, ConnectionError> {
        self.dials.bump();
        let pool = SqlxConnector.connect(dsn, config).await?;
        pool.close().await;
        *self.handed_out.lock().unwrap() = Some(pool.clone());
        Ok(pool)
    }
}
