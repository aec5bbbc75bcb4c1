//! Control requests, their replies, and the handle embedders use to send them.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::download::{DownloadId, DownloadStatus};
use super::queue::{QueueId, TimeWindow};

/// Queue as created, edited and listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueBody {
    /// Ignored by `AddQueue`; selects the queue for `EditQueue`.
    #[serde(default)]
    pub id: QueueId,
    pub directory: PathBuf,
    /// Empty means `queue <id>`.
    #[serde(default)]
    pub name: String,
    /// 0 = unlimited.
    #[serde(default)]
    pub max_simultaneous: u32,
    /// Bytes/sec per download; None or 0 = unlimited.
    #[serde(default)]
    pub max_bandwidth: Option<u64>,
    /// None takes the engine's `default_max_retries`.
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub has_time_constraint: bool,
    #[serde(default)]
    pub time_range: TimeWindow,
}

impl QueueBody {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            id: 0,
            directory: directory.into(),
            name: String::new(),
            max_simultaneous: 0,
            max_bandwidth: None,
            max_retries: None,
            has_time_constraint: false,
            time_range: TimeWindow::default(),
        }
    }
}

/// Download as listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadBody {
    pub id: DownloadId,
    pub url: String,
    pub file_path: PathBuf,
    pub status: DownloadStatus,
    /// 0..=100.
    pub progress: f64,
    /// Formatted current speed, e.g. `"1.50 MB/s"`.
    pub speed: String,
    pub queue_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    AddDownload { url: String, queue_id: QueueId },
    StartDownload { id: DownloadId },
    PauseDownload { id: DownloadId },
    ResumeDownload { id: DownloadId },
    RetryDownload { id: DownloadId },
    CancelDownload { id: DownloadId },
    DeleteDownload { id: DownloadId },
    AddQueue(QueueBody),
    EditQueue(QueueBody),
    DeleteQueue { id: QueueId },
    GetQueues,
    GetDownloads,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ok,
    /// Id of the queue or download just added.
    Created { id: u64 },
    Queues(Vec<QueueBody>),
    Downloads(Vec<DownloadBody>),
    Failure { message: String },
}

impl Response {
    pub fn is_ok(&self) -> bool {
        !matches!(self, Response::Failure { .. })
    }

    pub fn failure(err: &anyhow::Error) -> Self {
        Response::Failure {
            message: format!("{err:#}"),
        }
    }
}

/// Rejections of control requests. No state is changed when one is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManagerError {
    #[error("no download with id {0}")]
    UnknownDownload(DownloadId),
    #[error("no queue with id {0}")]
    UnknownQueue(QueueId),
    #[error("download {id} is {status}; {action} needs {expected}")]
    WrongStatus {
        id: DownloadId,
        status: DownloadStatus,
        action: &'static str,
        expected: &'static str,
    },
    #[error("queue {0} is at its concurrency limit")]
    QueueFull(QueueId),
    #[error("queue {0} is outside its time window")]
    QueueDisabled(QueueId),
    #[error("queue {0} has running downloads")]
    QueueBusy(QueueId),
    #[error("download {0} is running; pause or cancel it first")]
    DownloadBusy(DownloadId),
    #[error("directory {} does not exist", .0.display())]
    MissingDirectory(PathBuf),
    #[error("invalid URL {0:?}")]
    InvalidUrl(String),
}

/// A request plus the channel its reply goes to.
#[derive(Debug)]
pub struct Envelope {
    pub request: Request,
    pub reply: oneshot::Sender<Response>,
}

/// Sending side of the manager's request channel.
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    tx: mpsc::Sender<Envelope>,
}

impl ManagerHandle {
    /// Send one request and wait for its reply.
    pub async fn send(&self, request: Request) -> Result<Response> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { request, reply })
            .await
            .map_err(|_| anyhow!("manager is not running"))?;
        rx.await.context("manager dropped the request")
    }
}

/// Request channel for `Manager::run`.
pub fn channel(capacity: usize) -> (ManagerHandle, mpsc::Receiver<Envelope>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ManagerHandle { tx }, rx)
}
