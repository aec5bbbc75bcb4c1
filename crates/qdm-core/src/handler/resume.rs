//! Resume: re-validate part files, then run a fresh pool over what is left.

use anyhow::Result;
use tracing::{info, warn};

use super::{pool, DownloadHandler, RunOutcome, StateError, TransferMode};
use crate::parts::part_size;
use crate::planner::PartFeed;

impl DownloadHandler {
    /// Continue a paused (or imported) transfer.
    ///
    /// Waits for the previous run's workers to exit first. Parts marked
    /// complete whose file is missing or has the wrong size are demoted. When
    /// every part checks out the pool is skipped and parts are combined.
    pub fn resume(&self) -> Result<RunOutcome> {
        let _run = self.lock_run();

        let (feed, token) = {
            let mut state = self.lock_state();
            if state.finished {
                // a paused run can still finish its last parts and combine
                return Ok(RunOutcome::Completed);
            }
            if !state.paused {
                return Err(StateError::NotPaused.into());
            }
            state.paused = false;

            if state.mode != TransferMode::Chunked {
                // Nothing reusable without ranges: run from the probe again.
                state.mode = TransferMode::Unprobed;
                self.renew_token();
                drop(state);
                info!(url = %self.url, "restarting transfer from probe");
                return self.start_locked();
            }

            let plan = state.plan();
            let mut demoted = 0usize;
            for index in 0..plan.parts_count() {
                if state.completed.is_set(index)
                    && part_size(&self.dest, index) != Some(plan.part_len(index))
                {
                    state.completed.clear(index);
                    if let Some(part) = plan.part(index) {
                        state.requeue(&part);
                    }
                    demoted += 1;
                }
            }
            if demoted > 0 {
                warn!(url = %self.url, demoted, "part files failed validation; refetching");
            }
            state.recompute_current();
            if state.incomplete.is_empty() {
                state.rebuild_incomplete();
            }

            let token = self.renew_token();
            let incomplete = std::mem::take(&mut state.incomplete);
            let feed = PartFeed::resume(plan, incomplete, state.current, state.completed.clone());
            self.progress.set_total(state.total);
            self.progress.set_completed(state.current);
            (feed, token)
        };

        if self.lock_state().all_parts_complete() {
            info!(url = %self.url, "all parts present; combining");
            return self.combine();
        }

        self.progress.restart();
        info!(url = %self.url, remaining = feed.remaining_hint(), "resuming transfer");
        let first_error = pool::run_pool(self, feed, &token);
        self.finish_run(first_error)
    }
}
