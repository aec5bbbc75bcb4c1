//! Retry loop around one fetch attempt.

use std::thread;

use tracing::debug;

use super::error::FetchError;
use super::policy::RetryPolicy;

/// Call `f` until it succeeds or `policy` has no further wait to offer, then
/// return its last error.
pub fn run_with_retry<T, F>(policy: &RetryPolicy, mut f: F) -> Result<T, FetchError>
where
    F: FnMut() -> Result<T, FetchError>,
{
    let mut attempt = 1u32;
    loop {
        let err = match f() {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        let Some(delay) = policy.delay_after(attempt, &err) else {
            return Err(err);
        };
        debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying fetch");
        thread::sleep(delay);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn retries_transient_until_success() {
        let mut calls = 0;
        let out = run_with_retry(&fast_policy(3), || {
            calls += 1;
            if calls < 3 {
                Err(FetchError::Http(503))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(out.unwrap(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let out: Result<(), _> = run_with_retry(&fast_policy(2), || {
            calls += 1;
            Err(FetchError::Http(500))
        });
        assert!(matches!(out, Err(FetchError::Http(500))));
        assert_eq!(calls, 2);
    }

    #[test]
    fn permanent_error_is_not_retried() {
        let mut calls = 0;
        let out: Result<(), _> = run_with_retry(&fast_policy(5), || {
            calls += 1;
            Err(FetchError::Http(404))
        });
        assert!(out.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn short_body_is_fetched_again() {
        let mut calls = 0;
        let out = run_with_retry(&fast_policy(3), || {
            calls += 1;
            if calls == 1 {
                Err(FetchError::PartialTransfer {
                    expected: 64,
                    received: 10,
                })
            } else {
                Ok(64u64)
            }
        });
        assert_eq!(out.unwrap(), 64);
        assert_eq!(calls, 2);
    }

    #[test]
    fn throttled_attempts_wait_for_the_cap() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(120),
        };
        let start = Instant::now();
        let out: Result<(), _> = run_with_retry(&policy, || Err(FetchError::Http(429)));
        assert!(matches!(out, Err(FetchError::Http(429))));
        assert!(start.elapsed() >= Duration::from_millis(120));
    }
}
