use std::future::Future;
use std::time::Duration;

use container_driver_interface::{DriverError, DriverResult};
use tracing::warn;

/// Bounded exponential backoff for transient runtime failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * self.multiplier.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Runs `op`, retrying transient failures per `policy`. Fatal failures and
/// the last transient failure are returned as they are.
pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> DriverResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DriverResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let backoff = policy.backoff(attempt);
                warn!(
                    operation,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err.message,
                    "Transient runtime error, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(with_attempts(err, attempt)),
        }
    }
}

fn with_attempts(err: DriverError, attempts: u32) -> DriverError {
    if attempts > 1 {
        DriverError {
            kind: err.kind,
            message: format!("{} (after {attempts} attempts)", err.message),
        }
    } else {
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_transient(&RetryPolicy::default(), "start", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(DriverError::transient("socket closed"))
            } else {
                Ok("up")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "up");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = retry_transient(&RetryPolicy::default(), "create", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(DriverError::transient("daemon busy"))
        })
        .await
        .unwrap_err();

        assert!(err.is_transient());
        assert!(err.message.contains("after 3 attempts"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = retry_transient(&RetryPolicy::default(), "create", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(DriverError::fatal("invalid reference format"))
        })
        .await
        .unwrap_err();

        assert!(!err.is_transient());
        assert_eq!(err.message, "invalid reference format");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
