//! Cooperative cancellation for one transfer run.
//!
//! A `CancelToken` is shared by the handler, its planner feed and every worker.
//! Pause and cancel raise it; workers observe it between parts. An in-flight
//! part fetch is not preempted: it completes or fails before the worker checks.
//! Each run gets a fresh token so a resumed run never sees a stale signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Idempotent; every clone observes it.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_signal() {
        let token = CancelToken::new();
        let worker_view = token.clone();
        assert!(!worker_view.is_cancelled());
        token.cancel();
        assert!(worker_view.is_cancelled());
        token.cancel();
        assert!(worker_view.is_cancelled());
    }

    #[test]
    fn fresh_token_is_not_cancelled() {
        let old = CancelToken::new();
        old.cancel();
        let fresh = CancelToken::new();
        assert!(!fresh.is_cancelled());
    }
}
