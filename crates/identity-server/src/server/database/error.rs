//! Bootstrap-time error taxonomy.
//!
//! - [`ConnectionError`]: empty connection string, dial or ping failure.
//!   Retried by the bootstrap [`RetryPolicy`] when
//!   [`ConnectionError::is_retryable`] says so.
//! - [`MigrationError`]: schema application failure. Never retried.
//! - [`SeedError`]: reference-data seeding failure. The seeding transaction
//!   is rolled back before the error reaches the caller.
//! - [`BootstrapError`]: any of the above, or the bootstrap deadline expiring.
//!
//! [`RetryPolicy`]: crate::server::database::retry::RetryPolicy

use core::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum ConnectionError {
    #[error("connection string must not be empty")]
    EmptyDsn,

    #[error("invalid connection config: {reason}")]
    InvalidConfig { reason: String },

    #[error("failed to open connection pool: {0}")]
    Dial(#[source] sqlx::Error),

    #[error("database ping failed: {0}")]
    Ping(#[source] sqlx::Error),

    #[error("database connection not established")]
    NotConnected,

    #[error("connection manager is closed")]
    Closed,

    #[error("connection failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<ConnectionError>,
    },

    #[error("connection deadline of {deadline:?} exceeded after {attempts} attempt(s)")]
    DeadlineExceeded { deadline: Duration, attempts: u32 },
}

impl ConnectionError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Configuration mistakes and a closed manager fail fast.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Dial(_) | Self::Ping(_) | Self::NotConnected)
    }
}

#[derive(thiserror::Error, Debug)]
#[error("failed to migrate `{object}`: {source}")]
pub struct MigrationError {
    pub object: &'static str,
    #[source]
    pub source: sqlx::Error,
}

#[derive(thiserror::Error, Debug)]
pub enum SeedError {
    #[error("invalid seed spec: {reason}")]
    InvalidSpec { reason: String },

    #[error("failed to read seed file `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse seed file `{path}`: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to begin seed transaction: {0}")]
    Begin(#[source] sqlx::Error),

    #[error("failed to look up {entity} `{name}`: {source}")]
    Lookup {
        entity: &'static str,
        name: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to create {entity} `{name}`: {source}")]
    Create {
        entity: &'static str,
        name: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("role `{role}` references unknown permission `{permission}`")]
    UnknownPermission { role: String, permission: String },

    #[error("failed to update permissions of role `{role}`: {source}")]
    Association {
        role: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to commit seed transaction: {0}")]
    Commit(#[source] sqlx::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum BootstrapError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Seed(#[from] SeedError),

    #[error("bootstrap did not finish within {0:?}")]
    Timeout(Duration),
}
