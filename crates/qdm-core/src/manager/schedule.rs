//! Time-window activation and slot refilling.

use chrono::NaiveTime;
use tracing::{debug, info};

use super::download::{DownloadId, DownloadStatus};
use super::ops::RunKind;
use super::queue::QueueId;
use super::Manager;

impl Manager {
    /// Enable or disable time-constrained queues for time of day `now`.
    ///
    /// A queue leaving its window is disabled and its running members are
    /// paused. A queue entering its window is enabled and filled up to its
    /// concurrency limit.
    pub fn apply_time_windows(&mut self, now: NaiveTime) {
        let ids: Vec<QueueId> = self.queues.keys().copied().collect();
        for queue_id in ids {
            let Some(queue) = self.queues.get_mut(&queue_id) else { continue };
            let Some(window) = queue.window else { continue };
            let inside = window.contains(now);
            if !inside && !queue.disabled {
                queue.disabled = true;
                info!(queue_id, %now, "queue left its time window");
                self.pause_members(queue_id);
            } else if inside && queue.disabled {
                queue.disabled = false;
                info!(queue_id, %now, "queue entered its time window");
                self.fill_capacity(queue_id, None);
            }
        }
    }

    fn pause_members(&mut self, queue_id: QueueId) {
        for d in self.downloads.values_mut() {
            if d.queue_id != queue_id || !d.status.is_active() {
                continue;
            }
            if let Err(e) = d.handler.pause() {
                debug!(download_id = d.id, error = %e, "pause on window close");
            }
            d.status = DownloadStatus::Paused;
        }
    }

    /// Start eligible members of the queue while it has free slots, in
    /// round-robin order beginning after `after`.
    pub(super) fn fill_capacity(&mut self, queue_id: QueueId, after: Option<DownloadId>) {
        let Some(queue) = self.queues.get(&queue_id) else { return };
        if queue.disabled {
            return;
        }
        let order = queue.round_robin_from(after);
        for id in order {
            let has_slot = self
                .queues
                .get(&queue_id)
                .is_some_and(|q| q.has_capacity(self.running_in(queue_id)));
            if !has_slot {
                break;
            }
            let kind = match self.downloads.get(&id).map(|d| d.status) {
                Some(DownloadStatus::Pending) => RunKind::Start,
                Some(DownloadStatus::Paused) => RunKind::Resume,
                _ => continue,
            };
            info!(queue_id, download_id = id, "starting next download in queue");
            self.launch(id, kind, DownloadStatus::Starting);
        }
    }
}
