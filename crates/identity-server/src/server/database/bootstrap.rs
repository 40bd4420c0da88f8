//! Startup sequence: connect with retries, migrate, seed.
//!
//! Bootstrap is the only place that retries. Once it returns, request
//! handlers use [`ConnectionManager::pool`] and fail fast if the pool is gone.

use crate::server::database::{
    error::{BootstrapError, ConnectionError},
    manager::{ConnectionManager, Connector},
    migrate::migrate,
    retry::{RetryError, RetryPolicy},
    seed::{SeedReport, SeedSpec, seed},
};
use core::time::Duration;
use sqlx::AnyPool;

/// Connects and health-checks under `policy`.
///
/// Non-retryable failures such as [`ConnectionError::EmptyDsn`] are returned
/// as-is after a single attempt.
pub async fn establish<C: Connector>(
    manager: &ConnectionManager<C>,
    dsn: &str,
    policy: &RetryPolicy,
) -> Result<AnyPool, ConnectionError> {
    let result = policy
        .run(
            |attempt| async move {
                tracing::debug!(attempt, "Connecting to database");
                let pool = manager.connect(dsn).await?;
                manager.health_check().await?;
                Ok::<_, ConnectionError>(pool)
            },
            ConnectionError::is_retryable,
        )
        .await;

    match result {
        Ok(pool) => {
            log_pool_stats(manager).await;
            Ok(pool)
        }
        Err(RetryError::Aborted { error, .. }) => Err(error),
        Err(RetryError::Exhausted { attempts, error }) => Err(ConnectionError::RetriesExhausted {
            attempts,
            source: Box::new(error),
        }),
        Err(RetryError::DeadlineExceeded { deadline, attempts }) => {
            Err(ConnectionError::DeadlineExceeded { deadline, attempts })
        }
    }
}

/// Runs the full startup sequence within `timeout`.
///
/// Migrations and seeding are idempotent, so this is safe on every boot.
pub async fn run_bootstrap<C: Connector>(
    manager: &ConnectionManager<C>,
    dsn: &str,
    policy: RetryPolicy,
    spec: &SeedSpec,
    timeout: Duration,
) -> Result<SeedReport, BootstrapError> {
    let sequence = async {
        let pool = establish(manager, dsn, &policy).await?;
        migrate(&pool).await?;
        let report = seed(&pool, spec).await?;
        Ok::<_, BootstrapError>(report)
    };

    let report = tokio::time::timeout(timeout, sequence)
        .await
        .map_err(|_| BootstrapError::Timeout(timeout))??;

    tracing::info!(
        permissions_created = report.permissions_created,
        roles_created = report.roles_created,
        grants_added = report.grants_added,
        grants_removed = report.grants_removed,
        "Database bootstrap complete"
    );
    Ok(report)
}

async fn log_pool_stats<C: Connector>(manager: &ConnectionManager<C>) {
    match manager.stats().await {
        Ok(stats) => tracing::info!(
            open = stats.open,
            in_use = stats.in_use,
            idle = stats.idle,
            "Database pool stats"
        ),
        Err(err) => tracing::warn!(%err, "Database pool stats unavailable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::database::{
        manager::ConnectionStatus,
        testing::{CountingConnector, FlakyConnector, MEMORY_DSN, memory_config},
    };
    use core::num::NonZeroU32;
    use std::time::Instant;

    fn policy(attempts: u32, delay: Duration) -> RetryPolicy {
        RetryPolicy::new(NonZeroU32::new(attempts).unwrap(), delay)
    }

    #[tokio::test]
    async fn recovers_after_two_refused_dials() {
        let connector = FlakyConnector::new(2);
        let dials = connector.dials();
        let manager = ConnectionManager::with_connector(connector, memory_config());
        let delay = Duration::from_millis(50);
        let started = Instant::now();

        establish(&manager, MEMORY_DSN, &policy(3, delay))
            .await
            .unwrap();

        assert!(started.elapsed() >= delay * 2);
        assert_eq!(dials.get(), 3);
        assert_eq!(manager.status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn empty_dsn_is_not_retried() {
        let connector = CountingConnector::new(Duration::ZERO);
        let dials = connector.dials();
        let manager = ConnectionManager::with_connector(connector, memory_config());
        let started = Instant::now();

        let err = establish(&manager, "", &policy(5, Duration::from_secs(1)))
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectionError::EmptyDsn));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(dials.get(), 0);
    }

    #[tokio::test]
    async fn exhausted_attempts_are_reported() {
        let connector = FlakyConnector::new(10);
        let dials = connector.dials();
        let manager = ConnectionManager::with_connector(connector, memory_config());

        let err = establish(&manager, MEMORY_DSN, &policy(3, Duration::from_millis(1)))
            .await
            .unwrap_err();

        match err {
            ConnectionError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, ConnectionError::Dial(_)));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(dials.get(), 3);
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn full_bootstrap_is_repeatable() {
        let manager = ConnectionManager::new(memory_config());
        let spec = SeedSpec::builtin();
        let timeout = Duration::from_secs(10);

        let first = run_bootstrap(&manager, MEMORY_DSN, RetryPolicy::once(), &spec, timeout)
            .await
            .unwrap();
        assert_eq!(first.permissions_created, 6);
        assert_eq!(first.roles_created, 2);

        let second = run_bootstrap(&manager, MEMORY_DSN, RetryPolicy::once(), &spec, timeout)
            .await
            .unwrap();
        assert!(second.is_noop());
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_timeout_leaves_manager_disconnected() {
        let manager = ConnectionManager::with_connector(
            CountingConnector::new(Duration::from_secs(60)),
            memory_config(),
        );
        let timeout = Duration::from_millis(50);

        let err = run_bootstrap(
            &manager,
            MEMORY_DSN,
            RetryPolicy::default(),
            &SeedSpec::builtin(),
            timeout,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, BootstrapError::Timeout(t) if t == timeout));
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }
}
