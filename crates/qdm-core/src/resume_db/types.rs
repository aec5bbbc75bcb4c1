//! Records stored in the resume database.

use std::path::PathBuf;

use crate::handler::SavedState;
use crate::manager::{DownloadId, DownloadStatus, QueueId, TimeWindow};

#[derive(Debug, Clone, PartialEq)]
pub struct QueueRecord {
    pub id: QueueId,
    pub name: String,
    pub directory: PathBuf,
    pub max_concurrent: u32,
    pub max_bandwidth: Option<u64>,
    pub max_retries: u32,
    pub window: Option<TimeWindow>,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRecord {
    pub id: DownloadId,
    pub queue_id: QueueId,
    pub url: String,
    pub file_path: PathBuf,
    pub status: DownloadStatus,
    pub retry_count: u32,
    /// Transfer progress; None when nothing worth resuming was recorded.
    pub saved: Option<SavedState>,
}

/// Everything the manager persists. Downloads are ordered by id; queues by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub last_download_id: DownloadId,
    pub last_queue_id: QueueId,
    pub queues: Vec<QueueRecord>,
    pub downloads: Vec<DownloadRecord>,
}
