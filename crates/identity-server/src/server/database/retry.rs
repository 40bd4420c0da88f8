//! Bounded retry policy for bootstrap-time operations.
//!
//! The policy is a plain value: it holds no per-run state and can be reused
//! for any number of [`RetryPolicy::run`] calls. Attempts are numbered from 1
//! to `max_attempts`; between two attempts the policy sleeps for a fixed
//! `delay`. An optional deadline bounds the whole run, including sleeps.
//!
//! Retrying is an explicit decision of the caller. The connection manager
//! never retries on its own, so request-path lookups fail fast while bootstrap
//! wraps its connect + health check in a policy.

use core::fmt::Display;
use core::future::Future;
use core::num::NonZeroU32;
use core::time::Duration;
use tokio::time::{Instant, sleep, timeout_at};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: NonZeroU32,
    delay: Duration,
    deadline: Option<Duration>,
}

/// Why a [`RetryPolicy::run`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The operation reported an error the caller considers permanent.
    Aborted { attempt: u32, error: E },
    /// Every attempt failed; `error` is the last one.
    Exhausted { attempts: u32, error: E },
    /// The overall deadline expired during an attempt or would expire during
    /// the next delay.
    DeadlineExceeded { deadline: Duration, attempts: u32 },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(NonZeroU32::new(3).unwrap_or(NonZeroU32::MIN), Duration::from_secs(2))
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: NonZeroU32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            deadline: None,
        }
    }

    /// A single attempt with no delay.
    pub const fn once() -> Self {
        Self::new(NonZeroU32::MIN, Duration::ZERO)
    }

    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts.get()
    }

    pub const fn delay(&self) -> Duration {
        self.delay
    }

    pub const fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Runs `op` until it succeeds, fails permanently, runs out of attempts or
    /// hits the deadline.
    ///
    /// `op` receives the 1-based attempt number. `retryable` decides whether a
    /// failure is worth another attempt.
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, retryable: P) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.max_attempts.get();
        let deadline_at = self.deadline.map(|deadline| (deadline, Instant::now() + deadline));
        let mut attempt = 1;

        loop {
            let result = match deadline_at {
                Some((deadline, at)) => match timeout_at(at, op(attempt)).await {
                    Ok(result) => result,
                    Err(_) => {
                        return Err(RetryError::DeadlineExceeded {
                            deadline,
                            attempts: attempt,
                        });
                    }
                },
                None => op(attempt).await,
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(attempt, max_attempts, "Attempt succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !retryable(&error) {
                return Err(RetryError::Aborted { attempt, error });
            }

            if attempt >= max_attempts {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    error,
                });
            }

            if let Some((deadline, at)) = deadline_at {
                if Instant::now() + self.delay >= at {
                    tracing::warn!(attempt, max_attempts, %error, "Attempt failed, no time left to retry");
                    return Err(RetryError::DeadlineExceeded {
                        deadline,
                        attempts: attempt,
                    });
                }
            }

            tracing::warn!(
                attempt,
                max_attempts,
                delay = ?self.delay,
                %error,
                "Attempt failed, retrying"
            );
            sleep(self.delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32, delay: Duration) -> RetryPolicy {
        RetryPolicy::new(NonZeroU32::new(max_attempts).unwrap(), delay)
    }

    #[tokio::test(start_paused = true)]
    async fn third_attempt_succeeds_after_two_delays() {
        let delay = Duration::from_millis(500);
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result = policy(3, delay)
            .run(
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 3 {
                            Err("connection refused")
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                |_| true,
            )
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= delay * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_attempt_count_when_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy(3, Duration::from_millis(10))
            .run(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("down") }
                },
                |_| true,
            )
            .await;

        match result {
            Err(RetryError::Exhausted { attempts, error }) => {
                assert_eq!(attempts, 3);
                assert_eq!(error, "down");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let result: Result<(), _> = policy(5, Duration::from_secs(1))
            .run(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("empty dsn") }
                },
                |_| false,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Aborted { attempt: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_before_an_oversized_delay() {
        let result: Result<(), _> = policy(10, Duration::from_secs(1))
            .with_deadline(Duration::from_millis(1500))
            .run(|_| async { Err("down") }, |_| true)
            .await;

        assert!(matches!(
            result,
            Err(RetryError::DeadlineExceeded { attempts: 2, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_a_hanging_attempt() {
        let result: Result<(), RetryError<&str>> = policy(3, Duration::ZERO)
            .with_deadline(Duration::from_secs(5))
            .run(|_| futures::future::pending(), |_| true)
            .await;

        assert!(matches!(
            result,
            Err(RetryError::DeadlineExceeded { attempts: 1, .. })
        ));
    }

    #[test]
    fn policy_is_reusable_value() {
        let a = RetryPolicy::default();
        let b = a;
        assert_eq!(a, b);
        assert_eq!(a.max_attempts(), 3);
        assert_eq!(a.delay(), Duration::from_secs(2));
        assert_eq!(RetryPolicy::once().max_attempts(), 1);
    }
}
