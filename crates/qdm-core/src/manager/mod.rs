//! Queue manager: owns queues and downloads and serializes every decision.
//!
//! `Manager::run` is the single control loop. It handles one control
//! request, transfer event or schedule tick at a time, then persists the
//! result. Transfers run on the blocking pool and report back through the
//! event channel; the loop never waits on a network call.

mod download;
mod ops;
mod queue;
mod request;
mod schedule;

pub use download::{DownloadId, DownloadStatus};
pub use queue::{QueueId, TimeWindow};
pub use request::{
    channel, DownloadBody, Envelope, ManagerError, ManagerHandle, QueueBody, Request, Response,
};

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::handler::{DownloadHandler, HandlerConfig};
use crate::resume_db::{DownloadRecord, QueueRecord, ResumeDb, Snapshot};

use self::download::Download;
use self::ops::Event;
use self::queue::Queue;

fn local_time() -> NaiveTime {
    chrono::Local::now().time()
}

pub struct Manager {
    config: EngineConfig,
    queues: BTreeMap<QueueId, Queue>,
    downloads: BTreeMap<DownloadId, Download>,
    last_queue_id: QueueId,
    last_download_id: DownloadId,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: Option<mpsc::UnboundedReceiver<Event>>,
    db: Option<ResumeDb>,
    clock: fn() -> NaiveTime,
}

impl Manager {
    /// Empty manager without persistence.
    pub fn new(config: EngineConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            queues: BTreeMap::new(),
            downloads: BTreeMap::new(),
            last_queue_id: 0,
            last_download_id: 0,
            events_tx,
            events_rx: Some(events_rx),
            db: None,
            clock: local_time,
        }
    }

    /// Rebuild the manager from `db` and keep persisting to it.
    ///
    /// Downloads that were running when the state was saved come back as
    /// `Paused` when they carry transfer progress, otherwise as `Pending`.
    pub async fn restore(config: EngineConfig, db: ResumeDb) -> Result<Self> {
        let snap = db.load_snapshot().await.context("loading manager state")?;
        let mut manager = Self::new(config);
        manager.last_queue_id = snap.last_queue_id;
        manager.last_download_id = snap.last_download_id;

        for rec in snap.queues {
            manager.queues.insert(
                rec.id,
                Queue {
                    id: rec.id,
                    name: rec.name,
                    directory: rec.directory,
                    max_concurrent: rec.max_concurrent,
                    max_bandwidth: rec.max_bandwidth,
                    max_retries: rec.max_retries,
                    window: rec.window,
                    disabled: rec.disabled,
                    members: Vec::new(),
                },
            );
        }

        for rec in snap.downloads {
            let Some(queue) = manager.queues.get(&rec.queue_id) else {
                warn!(download_id = rec.id, queue_id = rec.queue_id, "dropping download of unknown queue");
                continue;
            };
            let handler_config = manager.handler_config(queue);
            let imported = rec.saved.as_ref().and_then(|saved| {
                DownloadHandler::import(saved, handler_config.clone())
                    .map_err(|e| {
                        warn!(download_id = rec.id, error = %format!("{e:#}"), "discarding saved state");
                    })
                    .ok()
            });
            let resumable = imported.is_some();
            let handler = imported.unwrap_or_else(|| {
                DownloadHandler::new(rec.url.clone(), rec.file_path.clone(), handler_config)
            });
            let status = if rec.status.is_busy() {
                if resumable {
                    DownloadStatus::Paused
                } else {
                    DownloadStatus::Pending
                }
            } else {
                rec.status
            };
            if let Some(q) = manager.queues.get_mut(&rec.queue_id) {
                q.members.push(rec.id);
            }
            manager.downloads.insert(
                rec.id,
                Download {
                    id: rec.id,
                    queue_id: rec.queue_id,
                    url: rec.url,
                    file_path: rec.file_path,
                    status,
                    retry_count: rec.retry_count,
                    handler: Arc::new(handler),
                    generation: 0,
                    teardown: None,
                },
            );
        }

        info!(
            queues = manager.queues.len(),
            downloads = manager.downloads.len(),
            "manager state restored"
        );
        manager.db = Some(db);
        Ok(manager)
    }

    /// Replace the time-of-day source used by the window tick.
    pub fn with_clock(mut self, clock: fn() -> NaiveTime) -> Self {
        self.clock = clock;
        self
    }

    fn handler_config(&self, queue: &Queue) -> HandlerConfig {
        HandlerConfig::from_engine(&self.config).with_bandwidth(queue.max_bandwidth)
    }

    /// Run the control loop until every `ManagerHandle` is dropped, then
    /// pause running transfers and persist once more.
    pub async fn run(mut self, mut requests: mpsc::Receiver<Envelope>) -> Result<()> {
        let mut events = self
            .events_rx
            .take()
            .context("manager control loop is already running")?;
        let mut tick = tokio::time::interval(self.config.schedule_tick());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                envelope = requests.recv() => {
                    let Some(Envelope { request, reply }) = envelope else { break };
                    let response = self.handle(request);
                    let _ = reply.send(response);
                }
                Some(event) = events.recv() => self.on_event(event),
                _ = tick.tick() => {
                    let now = (self.clock)();
                    self.apply_time_windows(now);
                }
            }
            self.persist().await;
        }

        self.stop_all().await;
        self.persist().await;
        info!("manager stopped");
        Ok(())
    }

    /// Spawn `run` on the current runtime.
    pub fn spawn(self) -> (ManagerHandle, JoinHandle<Result<()>>) {
        let (handle, rx) = channel(64);
        (handle, tokio::spawn(self.run(rx)))
    }

    /// Pause every running transfer and wait for its workers to exit.
    async fn stop_all(&mut self) {
        let mut stopping = Vec::new();
        for d in self.downloads.values_mut() {
            if !d.status.is_busy() && d.teardown.is_none() {
                continue;
            }
            if d.status.is_active() {
                d.status = DownloadStatus::Paused;
                d.generation += 1;
            }
            let handler = Arc::clone(&d.handler);
            let teardown = d.teardown.take();
            stopping.push(tokio::spawn(async move {
                if let Some(t) = teardown {
                    let _ = t.await;
                }
                let _ = tokio::task::spawn_blocking(move || handler.shutdown()).await;
            }));
        }
        for task in stopping {
            let _ = task.await;
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            last_download_id: self.last_download_id,
            last_queue_id: self.last_queue_id,
            queues: self
                .queues
                .values()
                .map(|q| QueueRecord {
                    id: q.id,
                    name: q.name.clone(),
                    directory: q.directory.clone(),
                    max_concurrent: q.max_concurrent,
                    max_bandwidth: q.max_bandwidth,
                    max_retries: q.max_retries,
                    window: q.window,
                    disabled: q.disabled,
                })
                .collect(),
            downloads: self
                .downloads
                .values()
                .map(|d| DownloadRecord {
                    id: d.id,
                    queue_id: d.queue_id,
                    url: d.url.clone(),
                    file_path: d.file_path.clone(),
                    status: d.status,
                    retry_count: d.retry_count,
                    saved: Some(d.handler.export())
                        .filter(|s| d.status != DownloadStatus::Done && s.has_progress()),
                })
                .collect(),
        }
    }

    async fn persist(&self) {
        let Some(db) = &self.db else { return };
        if let Err(e) = db.save_snapshot(&self.snapshot()).await {
            warn!(error = %format!("{e:#}"), "persisting manager state failed");
        }
    }
}
