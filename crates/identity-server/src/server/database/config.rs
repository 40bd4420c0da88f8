use crate::server::database::error::ConnectionError;
use core::time::Duration;

/// Statement logging verbosity forwarded to the database driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum StatementLogLevel {
    #[default]
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<StatementLogLevel> for log::LevelFilter {
    fn from(level: StatementLogLevel) -> Self {
        match level {
            StatementLogLevel::Off => Self::Off,
            StatementLogLevel::Error => Self::Error,
            StatementLogLevel::Warn => Self::Warn,
            StatementLogLevel::Info => Self::Info,
            StatementLogLevel::Debug => Self::Debug,
            StatementLogLevel::Trace => Self::Trace,
        }
    }
}

/// Pool sizing, recycling and statement logging settings.
///
/// Built once at startup and handed to the
/// [`ConnectionManager`](crate::server::database::manager::ConnectionManager).
/// Construct through [`ConnectionConfig::validate`] (or `Default`) to keep
/// `max_idle_connections <= max_open_connections`.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub max_open_connections: u32,
    pub max_idle_connections: u32,
    pub connection_max_lifetime: Duration,
    pub connection_max_idle_time: Duration,
    pub acquire_timeout: Duration,
    pub slow_query_threshold: Duration,
    pub log_level: StatementLogLevel,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_open_connections: 25,
            max_idle_connections: 5,
            connection_max_lifetime: Duration::from_secs(5 * 60),
            connection_max_idle_time: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(10),
            slow_query_threshold: Duration::from_millis(200),
            log_level: StatementLogLevel::Off,
        }
    }
}

impl ConnectionConfig {
    /// Checks the pool invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidConfig`] when the pool would allow no
    /// connections or more idle connections than open ones.
    pub fn validate(self) -> Result<Self, ConnectionError> {
        if self.max_open_connections == 0 {
            return Err(ConnectionError::InvalidConfig {
                reason: "max open connections must be greater than 0".to_string(),
            });
        }
        if self.max_idle_connections > self.max_open_connections {
            return Err(ConnectionError::InvalidConfig {
                reason: format!(
                    "max idle connections ({}) exceeds max open connections ({})",
                    self.max_idle_connections, self.max_open_connections
                ),
            });
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ConnectionConfig::default().validate().unwrap();
        assert_eq!(config.max_open_connections, 25);
        assert_eq!(config.max_idle_connections, 5);
        assert_eq!(config.connection_max_lifetime, Duration::from_secs(300));
        assert_eq!(config.connection_max_idle_time, Duration::from_secs(60));
    }

    #[test]
    fn idle_above_open_is_rejected() {
        let config = ConnectionConfig {
            max_open_connections: 2,
            max_idle_connections: 3,
            ..ConnectionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConnectionError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn zero_open_is_rejected() {
        let config = ConnectionConfig {
            max_open_connections: 0,
            max_idle_connections: 0,
            ..ConnectionConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
