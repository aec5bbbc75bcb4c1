//! Download handler: runs one download and owns its pause/resume state machine.
//!
//! A handler is bound to one URL and destination. `start` probes the server,
//! then either fetches parts through the worker pool and combines them, or
//! falls back to a single whole-file GET. `pause` raises the run's cancel
//! token; `resume` re-validates part files and runs a fresh pool over the
//! remaining parts. All methods block; the manager calls them from
//! `spawn_blocking`. A handler is never reused after cancel or retry; the
//! manager builds a new one instead.

mod pool;
mod resume;
mod saved;
mod state;

pub use pool::derive_workers;
pub use saved::SavedState;
pub use state::{TransferMode, TransferState};

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{info, warn};

use crate::combine::combine_parts;
use crate::config::EngineConfig;
use crate::control::CancelToken;
use crate::fetch::{fetch_whole, FetchOptions};
use crate::planner::PartFeed;
use crate::probe::probe;
use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::retry::{FetchError, RetryPolicy};
use crate::throttle::BandwidthLimiter;

/// Invalid transitions of a handler. No state is changed when one is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("download is already paused")]
    AlreadyPaused,
    #[error("download is not paused")]
    NotPaused,
    #[error("download is already complete")]
    AlreadyComplete,
    #[error("download was already started")]
    AlreadyStarted,
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Destination holds the full file; no part files remain.
    Completed,
    /// Stopped by pause; state and part files are kept for `resume`.
    Paused,
}

/// Per-handler settings, derived from the engine config and the queue.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub chunk_size: u64,
    pub workers: Option<usize>,
    /// Aggregate cap in bytes/sec; None is unlimited.
    pub bandwidth: Option<u64>,
    pub probe_timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
    pub progress_window: Duration,
    pub speed_samples: usize,
}

impl HandlerConfig {
    pub fn from_engine(cfg: &EngineConfig) -> Self {
        Self {
            chunk_size: cfg.chunk_size.max(1),
            workers: cfg.workers,
            bandwidth: None,
            probe_timeout: Duration::from_secs(cfg.probe_timeout_secs.max(1)),
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs.max(1)),
            retry: cfg.retry_policy(),
            progress_window: cfg.progress_window(),
            speed_samples: cfg.speed_samples,
        }
    }

    pub fn with_bandwidth(mut self, bandwidth: Option<u64>) -> Self {
        self.bandwidth = bandwidth.filter(|&b| b > 0);
        self
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self::from_engine(&EngineConfig::default())
    }
}

pub struct DownloadHandler {
    url: String,
    dest: PathBuf,
    config: HandlerConfig,
    limiter: BandwidthLimiter,
    state: Mutex<TransferState>,
    cancel: Mutex<CancelToken>,
    /// Held for the whole of a run; `resume` and `shutdown` wait on it.
    run_lock: Mutex<()>,
    progress: ProgressTracker,
}

impl DownloadHandler {
    pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>, config: HandlerConfig) -> Self {
        Self::with_state(url.into(), dest.into(), config.clone(), TransferState::new(config.chunk_size))
    }

    fn with_state(url: String, dest: PathBuf, config: HandlerConfig, state: TransferState) -> Self {
        let progress =
            ProgressTracker::new(state.total, config.progress_window, config.speed_samples);
        progress.set_completed(state.current);
        Self {
            url,
            dest,
            limiter: BandwidthLimiter::new(config.bandwidth),
            config,
            state: Mutex::new(state),
            cancel: Mutex::new(CancelToken::new()),
            run_lock: Mutex::new(()),
            progress,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    fn lock_state(&self) -> MutexGuard<'_, TransferState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_run(&self) -> MutexGuard<'_, ()> {
        match self.run_lock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn current_token(&self) -> CancelToken {
        match self.cancel.lock() {
            Ok(t) => t.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Install a fresh token for a new run and return it.
    fn renew_token(&self) -> CancelToken {
        let fresh = CancelToken::new();
        match self.cancel.lock() {
            Ok(mut t) => *t = fresh.clone(),
            Err(poisoned) => *poisoned.into_inner() = fresh.clone(),
        }
        fresh
    }

    fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            connect_timeout: self.config.connect_timeout,
            retry: self.config.retry,
            limiter: self.limiter.clone(),
        }
    }

    /// Copy of the transfer state.
    pub fn state(&self) -> TransferState {
        self.lock_state().clone()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Initial run: probe, transfer, combine.
    pub fn start(&self) -> Result<RunOutcome> {
        let _run = self.lock_run();
        self.start_locked()
    }

    fn start_locked(&self) -> Result<RunOutcome> {
        let token = {
            let state = self.lock_state();
            if state.mode != TransferMode::Unprobed || state.finished {
                return Err(StateError::AlreadyStarted.into());
            }
            self.current_token()
        };
        if token.is_cancelled() {
            return Ok(RunOutcome::Paused);
        }

        let probed = probe(&self.url, self.config.probe_timeout)
            .with_context(|| format!("probing {}", self.url))?;
        if token.is_cancelled() {
            return Ok(RunOutcome::Paused);
        }

        if !probed.supports_chunking() {
            info!(url = %self.url, "server lacks range support; using whole-file fetch");
            self.lock_state().init_whole(probed.content_length);
            self.progress.set_total(probed.content_length.unwrap_or(0));
            return self.run_whole(probed.content_length, &token);
        }

        let total = probed.content_length.unwrap_or(0);
        let plan = {
            let mut state = self.lock_state();
            state.init_chunked(total);
            state.plan()
        };
        self.progress.set_total(total);
        self.progress.restart();
        info!(
            url = %self.url,
            total,
            parts = plan.parts_count(),
            chunk_size = plan.chunk_size(),
            "starting chunked transfer"
        );
        let first_error = pool::run_pool(self, PartFeed::fresh(plan), &token);
        self.finish_run(first_error)
    }

    fn run_whole(&self, expected: Option<u64>, token: &CancelToken) -> Result<RunOutcome> {
        self.progress.restart();
        match fetch_whole(
            &self.url,
            &self.dest,
            expected,
            &self.fetch_options(),
            &self.progress,
            token,
        ) {
            Ok(bytes) => {
                let mut state = self.lock_state();
                state.total = bytes;
                state.current = bytes;
                state.finished = true;
                state.paused = false;
                drop(state);
                self.progress.set_total(bytes);
                self.progress.set_completed(bytes);
                Ok(RunOutcome::Completed)
            }
            Err(FetchError::Aborted) => Ok(RunOutcome::Paused),
            Err(e) => Err(anyhow::Error::new(e).context(format!("downloading {}", self.url))),
        }
    }

    /// Decide how a chunked run ended and combine when every part is in.
    fn finish_run(&self, first_error: Option<FetchError>) -> Result<RunOutcome> {
        let (all_complete, paused, incomplete) = {
            let state = self.lock_state();
            (
                state.all_parts_complete(),
                state.paused,
                state.completed.len() - state.completed.count_set(),
            )
        };
        if all_complete && first_error.is_none() {
            return self.combine();
        }
        if paused {
            if let Some(e) = &first_error {
                warn!(url = %self.url, error = %e, "part failed while pausing");
            }
            info!(url = %self.url, incomplete, "transfer paused");
            return Ok(RunOutcome::Paused);
        }
        if let Some(e) = first_error {
            return Err(anyhow::Error::new(e).context(format!("downloading {}", self.url)));
        }
        anyhow::bail!("{}: run ended with {} parts incomplete", self.url, incomplete)
    }

    fn combine(&self) -> Result<RunOutcome> {
        let plan = self.lock_state().plan();
        combine_parts(&self.dest, &plan)
            .with_context(|| format!("combining parts into {}", self.dest.display()))?;
        let mut state = self.lock_state();
        state.finished = true;
        state.paused = false;
        state.current = state.total;
        drop(state);
        self.progress.set_completed(plan.total());
        info!(url = %self.url, path = %self.dest.display(), "download complete");
        Ok(RunOutcome::Completed)
    }

    /// Request a pause. Workers stop at their next pull.
    pub fn pause(&self) -> Result<(), StateError> {
        let mut state = self.lock_state();
        if state.paused {
            return Err(StateError::AlreadyPaused);
        }
        if state.finished || state.all_parts_complete() {
            return Err(StateError::AlreadyComplete);
        }
        state.paused = true;
        self.current_token().cancel();
        info!(url = %self.url, "pause requested");
        Ok(())
    }

    /// Stop any run and wait until its workers are gone.
    pub fn shutdown(&self) {
        {
            let mut state = self.lock_state();
            if !state.finished {
                state.paused = true;
            }
            self.current_token().cancel();
        }
        let _run = self.lock_run();
    }
}
