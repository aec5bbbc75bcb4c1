//! Queues: scheduling policy shared by a group of downloads.

use std::path::PathBuf;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::download::DownloadId;

pub type QueueId = u64;

/// Daily activation window. Wraps midnight when `start > end`; `start == end`
/// is active all day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, now: NaiveTime) -> bool {
        if self.start == self.end {
            true
        } else if self.start < self.end {
            self.start <= now && now < self.end
        } else {
            now >= self.start || now < self.end
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Queue {
    pub id: QueueId,
    pub name: String,
    pub directory: PathBuf,
    /// 0 = unlimited.
    pub max_concurrent: u32,
    /// Bytes/sec per download; None = unlimited.
    pub max_bandwidth: Option<u64>,
    pub max_retries: u32,
    pub window: Option<TimeWindow>,
    /// Outside the time window.
    pub disabled: bool,
    /// Member downloads in insertion order (round-robin order).
    pub members: Vec<DownloadId>,
}

impl Queue {
    pub fn has_capacity(&self, running: usize) -> bool {
        self.max_concurrent == 0 || running < self.max_concurrent as usize
    }

    pub fn position(&self, id: DownloadId) -> Option<usize> {
        self.members.iter().position(|&m| m == id)
    }

    /// Members in round-robin order, starting just after `after` (or at the front).
    pub fn round_robin_from(&self, after: Option<DownloadId>) -> Vec<DownloadId> {
        let n = self.members.len();
        let start = after
            .and_then(|id| self.position(id))
            .map(|p| p + 1)
            .unwrap_or(0);
        (0..n).map(|k| self.members[(start + k) % n]).collect()
    }
}
