//! Worker pool: N threads pulling parts from a shared feed.
//!
//! Workers are scoped threads borrowing the handler. Each loop pulls one part;
//! if the run's token is raised it hands the part back to the incomplete list
//! and exits. Parts already complete are skipped. A failed fetch re-queues its
//! part, records the first error and stops further pulls; parts in flight on
//! other workers still finish. Success updates completion and `current` in one
//! critical section, then progress outside the lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;

use tracing::{debug, warn};

use super::DownloadHandler;
use crate::control::CancelToken;
use crate::fetch::fetch_part;
use crate::parts::part_path;
use crate::planner::PartFeed;
use crate::retry::FetchError;

const MIN_WORKERS: usize = 4;
const MAX_WORKERS: usize = 16;

/// Worker count: the configured value, else `min(cpu_parallelism, parts)`
/// clamped to `[4, 16]`. Always at least 1.
pub fn derive_workers(configured: Option<usize>, parts: usize) -> usize {
    let n = configured.unwrap_or_else(|| {
        let cpus = thread::available_parallelism().map(|n| n.get()).unwrap_or(MIN_WORKERS);
        cpus.min(parts).clamp(MIN_WORKERS, MAX_WORKERS)
    });
    n.max(1)
}

/// Run the pool to exhaustion of `feed` (or the token). Returns the first fetch error.
pub(super) fn run_pool(
    handler: &DownloadHandler,
    feed: PartFeed,
    token: &CancelToken,
) -> Option<FetchError> {
    let pending = feed.remaining_hint();
    if pending == 0 {
        return None;
    }
    let workers = derive_workers(handler.config.workers, pending).min(pending);
    debug!(url = %handler.url, workers, pending, "starting worker pool");

    let feed = Mutex::new(feed);
    let stop = AtomicBool::new(false);
    let first_error: Mutex<Option<FetchError>> = Mutex::new(None);

    thread::scope(|scope| {
        for id in 0..workers {
            let feed = &feed;
            let stop = &stop;
            let first_error = &first_error;
            scope.spawn(move || worker_loop(handler, id, feed, token, stop, first_error));
        }
    });

    match first_error.into_inner() {
        Ok(e) => e,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn worker_loop(
    handler: &DownloadHandler,
    id: usize,
    feed: &Mutex<PartFeed>,
    token: &CancelToken,
    stop: &AtomicBool,
    first_error: &Mutex<Option<FetchError>>,
) {
    let opts = handler.fetch_options();
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let next = match feed.lock() {
            Ok(mut f) => f.next_part(),
            Err(_) => None,
        };
        let Some(part) = next else {
            break;
        };
        if token.is_cancelled() {
            handler.lock_state().requeue(&part);
            debug!(worker = id, part = part.index, "run cancelled; part handed back");
            break;
        }
        if handler.lock_state().completed.is_set(part.index) {
            continue;
        }

        let path = part_path(&handler.dest, part.index);
        match fetch_part(&handler.url, &part, &path, &opts, &handler.progress) {
            Ok(()) => {
                let current = {
                    let mut state = handler.lock_state();
                    state.mark_complete(&part);
                    state.current
                };
                handler.progress.set_completed(current);
                debug!(worker = id, part = part.index, bytes = part.len(), "part complete");
            }
            Err(e) => {
                handler.lock_state().mark_failed(&part);
                warn!(worker = id, part = part.index, error = %e, "part fetch failed");
                stop.store(true, Ordering::SeqCst);
                if let Ok(mut slot) = first_error.lock() {
                    slot.get_or_insert(e);
                }
                break;
            }
        }
    }
}
