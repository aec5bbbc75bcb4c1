//! Download record owned by the manager.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::queue::QueueId;
use crate::handler::DownloadHandler;

pub type DownloadId = u64;

/// Lifecycle of a download as seen by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadStatus {
    Pending,
    Starting,
    Downloading,
    Paused,
    Cancelled,
    Failed,
    Done,
    Retrying,
}

impl DownloadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Starting => "starting",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Cancelled => "cancelled",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Done => "done",
            DownloadStatus::Retrying => "retrying",
        }
    }

    /// Unknown strings map to `Failed` so a corrupt row never looks runnable.
    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => DownloadStatus::Pending,
            "starting" => DownloadStatus::Starting,
            "downloading" => DownloadStatus::Downloading,
            "paused" => DownloadStatus::Paused,
            "cancelled" => DownloadStatus::Cancelled,
            "done" => DownloadStatus::Done,
            "retrying" => DownloadStatus::Retrying,
            _ => DownloadStatus::Failed,
        }
    }

    /// Counts against the queue's concurrency limit.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            DownloadStatus::Starting | DownloadStatus::Downloading | DownloadStatus::Retrying
        )
    }

    /// Holds live transfer state; blocks delete and queue edits.
    pub fn is_busy(self) -> bool {
        self.is_active() || self == DownloadStatus::Paused
    }

    /// Can be picked up when a queue slot frees.
    pub fn is_eligible(self) -> bool {
        matches!(self, DownloadStatus::Pending | DownloadStatus::Paused)
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) struct Download {
    pub id: DownloadId,
    pub queue_id: QueueId,
    pub url: String,
    pub file_path: PathBuf,
    pub status: DownloadStatus,
    pub retry_count: u32,
    pub handler: Arc<DownloadHandler>,
    /// Bumped for every run or handler replacement; events from older runs are dropped.
    pub generation: u64,
    /// Teardown of a replaced handler (stop + residue cleanup); the next run waits on it.
    pub teardown: Option<JoinHandle<()>>,
}
