//! Backoff schedule for the short retries a single fetch gets before its
//! failure reaches the worker.
//!
//! The delay depends on what went wrong:
//! - a body cut short restarts the part after the base delay, since the
//!   server was answering fine until the connection dropped;
//! - 429/503 waits the full cap, the server asked for it;
//! - 5xx and transient curl failures back off exponentially from the base;
//! - everything else is surfaced at once.

use std::time::Duration;

use super::classify::{is_server_error, is_throttle_status, is_transient_curl};
use super::error::FetchError;

/// Built from `[retry]` in config.toml.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per fetch, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Cap on any single wait.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// How long to wait before trying again after `attempt` (1-based) failed
    /// with `err`. None means give up and return `err`.
    pub fn delay_after(&self, attempt: u32, err: &FetchError) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        match err {
            FetchError::PartialTransfer { .. } => Some(self.base_delay.min(self.max_delay)),
            FetchError::Http(code) if is_throttle_status(*code) => Some(self.max_delay),
            FetchError::Http(code) if is_server_error(*code) => Some(self.doubled(attempt)),
            FetchError::Curl(e) if is_transient_curl(e) => Some(self.doubled(attempt)),
            _ => None,
        }
    }

    /// `base_delay` doubled once per earlier failure, never above `max_delay`.
    fn doubled(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay
            .checked_mul(1 << shift)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}
