//! Control requests and transfer events.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::download::{Download, DownloadId, DownloadStatus};
use super::queue::{Queue, QueueId};
use super::request::{DownloadBody, ManagerError, QueueBody, Request, Response};
use super::Manager;
use crate::handler::{DownloadHandler, RunOutcome, TransferMode};
use crate::parts::cleanup_parts;
use crate::progress::format_speed;
use crate::url_model::destination_path;

/// Reported by a transfer task. `generation` identifies the run; events of
/// superseded runs are dropped.
#[derive(Debug)]
pub(crate) enum Event {
    Started { id: DownloadId, generation: u64 },
    Finished { id: DownloadId, generation: u64 },
    Stopped { id: DownloadId, generation: u64 },
    Failed { id: DownloadId, generation: u64, message: String },
}

#[derive(Debug, Clone, Copy)]
pub(super) enum RunKind {
    Start,
    Resume,
}

fn expect_status(
    d: &Download,
    allowed: &[DownloadStatus],
    action: &'static str,
    expected: &'static str,
) -> Result<(), ManagerError> {
    if allowed.contains(&d.status) {
        Ok(())
    } else {
        Err(ManagerError::WrongStatus {
            id: d.id,
            status: d.status,
            action,
            expected,
        })
    }
}

fn check_directory(dir: &Path) -> Result<(), ManagerError> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(ManagerError::MissingDirectory(dir.to_path_buf()))
    }
}

/// Delete what an unfinished transfer left on disk: its part files, and the
/// destination itself when a whole-file fetch was writing straight into it.
/// Returns how many files were removed.
fn remove_residue(handler: &DownloadHandler) -> Result<usize> {
    let dest = handler.dest();
    let mut removed = cleanup_parts(dest)?;
    let state = handler.state();
    if state.mode == TransferMode::Whole && !state.finished {
        match fs::remove_file(dest) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to remove partial {}", dest.display()));
            }
        }
    }
    Ok(removed)
}

/// Run `remove_residue` for `handler` on the blocking pool, after `previous` ends.
fn spawn_residue_cleanup(
    id: DownloadId,
    handler: Arc<DownloadHandler>,
    previous: Option<tokio::task::JoinHandle<()>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(p) = previous {
            let _ = p.await;
        }
        match tokio::task::spawn_blocking(move || remove_residue(&handler)).await {
            Ok(Ok(removed)) => debug!(download_id = id, removed, "part residue removed"),
            Ok(Err(e)) => warn!(download_id = id, error = %format!("{e:#}"), "part residue cleanup failed"),
            Err(e) => warn!(download_id = id, error = %e, "part residue cleanup task failed"),
        }
    })
}

impl Manager {
    /// Apply one control request. Every rejection becomes `Response::Failure`.
    pub fn handle(&mut self, request: Request) -> Response {
        let result = match request {
            Request::AddDownload { url, queue_id } => self.add_download(&url, queue_id),
            Request::StartDownload { id } => self.start_download(id),
            Request::PauseDownload { id } => self.pause_download(id),
            Request::ResumeDownload { id } => self.resume_download(id),
            Request::RetryDownload { id } => self.retry_download(id),
            Request::CancelDownload { id } => self.cancel_download(id),
            Request::DeleteDownload { id } => self.delete_download(id),
            Request::AddQueue(body) => self.add_queue(body),
            Request::EditQueue(body) => self.edit_queue(body),
            Request::DeleteQueue { id } => self.delete_queue(id),
            Request::GetQueues => Ok(Response::Queues(self.queue_bodies())),
            Request::GetDownloads => Ok(Response::Downloads(self.download_bodies())),
        };
        result.unwrap_or_else(|e| {
            debug!(error = %format!("{e:#}"), "request rejected");
            Response::failure(&e)
        })
    }

    fn download(&self, id: DownloadId) -> Result<&Download, ManagerError> {
        self.downloads.get(&id).ok_or(ManagerError::UnknownDownload(id))
    }

    fn download_mut(&mut self, id: DownloadId) -> Result<&mut Download, ManagerError> {
        self.downloads
            .get_mut(&id)
            .ok_or(ManagerError::UnknownDownload(id))
    }

    fn queue(&self, id: QueueId) -> Result<&Queue, ManagerError> {
        self.queues.get(&id).ok_or(ManagerError::UnknownQueue(id))
    }

    pub(super) fn running_in(&self, queue_id: QueueId) -> usize {
        self.downloads
            .values()
            .filter(|d| d.queue_id == queue_id && d.status.is_active())
            .count()
    }

    fn queue_is_busy(&self, queue: &Queue) -> bool {
        queue
            .members
            .iter()
            .filter_map(|m| self.downloads.get(m))
            .any(|d| d.status.is_busy())
    }

    /// Admission control for start, resume and manual retry.
    fn admit(&self, queue_id: QueueId) -> Result<(), ManagerError> {
        let queue = self.queue(queue_id)?;
        if queue.disabled {
            return Err(ManagerError::QueueDisabled(queue_id));
        }
        if !queue.has_capacity(self.running_in(queue_id)) {
            return Err(ManagerError::QueueFull(queue_id));
        }
        Ok(())
    }

    fn add_download(&mut self, url: &str, queue_id: QueueId) -> Result<Response> {
        let url = url.trim();
        url::Url::parse(url).map_err(|_| ManagerError::InvalidUrl(url.to_string()))?;
        let queue = self.queue(queue_id)?;
        let file_path = {
            let taken = queue
                .members
                .iter()
                .filter_map(|m| self.downloads.get(m))
                .map(|d| d.file_path.as_path());
            destination_path(&queue.directory, url, taken)
        };
        let handler = DownloadHandler::new(url, file_path.clone(), self.handler_config(queue));

        self.last_download_id += 1;
        let id = self.last_download_id;
        if let Some(q) = self.queues.get_mut(&queue_id) {
            q.members.push(id);
        }
        info!(download_id = id, queue_id, path = %file_path.display(), "download added");
        self.downloads.insert(
            id,
            Download {
                id,
                queue_id,
                url: url.to_string(),
                file_path,
                status: DownloadStatus::Pending,
                retry_count: 0,
                handler: Arc::new(handler),
                generation: 0,
                teardown: None,
            },
        );
        Ok(Response::Created { id })
    }

    fn start_download(&mut self, id: DownloadId) -> Result<Response> {
        let d = self.download(id)?;
        expect_status(d, &[DownloadStatus::Pending], "start", "pending")?;
        self.admit(d.queue_id)
            .with_context(|| format!("starting download {id}"))?;
        self.launch(id, RunKind::Start, DownloadStatus::Starting);
        Ok(Response::Ok)
    }

    fn pause_download(&mut self, id: DownloadId) -> Result<Response> {
        let d = self.download_mut(id)?;
        expect_status(d, &[DownloadStatus::Downloading], "pause", "downloading")?;
        d.handler
            .pause()
            .with_context(|| format!("pausing download {id}"))?;
        d.status = DownloadStatus::Paused;
        info!(download_id = id, "download paused");
        Ok(Response::Ok)
    }

    fn resume_download(&mut self, id: DownloadId) -> Result<Response> {
        let d = self.download(id)?;
        expect_status(d, &[DownloadStatus::Paused], "resume", "paused")?;
        self.admit(d.queue_id)
            .with_context(|| format!("resuming download {id}"))?;
        self.launch(id, RunKind::Resume, DownloadStatus::Starting);
        Ok(Response::Ok)
    }

    fn retry_download(&mut self, id: DownloadId) -> Result<Response> {
        let d = self.download(id)?;
        expect_status(
            d,
            &[DownloadStatus::Cancelled, DownloadStatus::Failed],
            "retry",
            "cancelled or failed",
        )?;
        self.admit(d.queue_id)
            .with_context(|| format!("retrying download {id}"))?;
        self.download_mut(id)?.retry_count = 0;
        self.restart_fresh(id);
        Ok(Response::Ok)
    }

    fn cancel_download(&mut self, id: DownloadId) -> Result<Response> {
        let d = self.download(id)?;
        expect_status(d, &[DownloadStatus::Downloading], "cancel", "downloading")?;
        // A transfer that already finished its parts still gets torn down.
        if let Err(e) = d.handler.pause() {
            debug!(download_id = id, error = %e, "pause on cancel");
        }
        self.replace_handler(id);
        self.download_mut(id)?.status = DownloadStatus::Cancelled;
        info!(download_id = id, "download cancelled");
        Ok(Response::Ok)
    }

    fn delete_download(&mut self, id: DownloadId) -> Result<Response> {
        let d = self.download(id)?;
        if d.status.is_busy() {
            return Err(ManagerError::DownloadBusy(id).into());
        }
        self.remove_download(id);
        Ok(Response::Ok)
    }

    fn remove_download(&mut self, id: DownloadId) {
        let Some(mut d) = self.downloads.remove(&id) else { return };
        if let Some(q) = self.queues.get_mut(&d.queue_id) {
            q.members.retain(|&m| m != id);
        }
        if d.status != DownloadStatus::Done {
            let previous = d.teardown.take();
            drop(spawn_residue_cleanup(id, Arc::clone(&d.handler), previous));
        }
        info!(download_id = id, "download deleted");
    }

    fn add_queue(&mut self, body: QueueBody) -> Result<Response> {
        check_directory(&body.directory)?;
        self.last_queue_id += 1;
        let id = self.last_queue_id;
        let window = body.has_time_constraint.then_some(body.time_range);
        let now = (self.clock)();
        let queue = Queue {
            id,
            name: queue_name(id, &body.name),
            directory: body.directory,
            max_concurrent: body.max_simultaneous,
            max_bandwidth: body.max_bandwidth.filter(|&b| b > 0),
            max_retries: body.max_retries.unwrap_or(self.config.default_max_retries),
            window,
            disabled: window.is_some_and(|w| !w.contains(now)),
            members: Vec::new(),
        };
        info!(queue_id = id, name = %queue.name, "queue added");
        self.queues.insert(id, queue);
        Ok(Response::Created { id })
    }

    fn edit_queue(&mut self, body: QueueBody) -> Result<Response> {
        let queue = self.queue(body.id)?;
        if self.queue_is_busy(queue) {
            return Err(ManagerError::QueueBusy(body.id).into());
        }
        check_directory(&body.directory)?;

        let window = body.has_time_constraint.then_some(body.time_range);
        let now = (self.clock)();
        let members = {
            let q = self
                .queues
                .get_mut(&body.id)
                .ok_or(ManagerError::UnknownQueue(body.id))?;
            q.name = queue_name(q.id, &body.name);
            q.directory = body.directory;
            q.max_concurrent = body.max_simultaneous;
            q.max_bandwidth = body.max_bandwidth.filter(|&b| b > 0);
            q.max_retries = body.max_retries.unwrap_or(q.max_retries);
            q.window = window;
            q.disabled = window.is_some_and(|w| !w.contains(now));
            q.members.clone()
        };

        // Pending members have not run yet; rebuild them with the new limits.
        for id in members {
            let pending = self
                .downloads
                .get(&id)
                .is_some_and(|d| d.status == DownloadStatus::Pending);
            if pending {
                self.replace_handler(id);
            }
        }
        info!(queue_id = body.id, "queue edited");
        Ok(Response::Ok)
    }

    fn delete_queue(&mut self, id: QueueId) -> Result<Response> {
        let queue = self.queue(id)?;
        if self.queue_is_busy(queue) {
            return Err(ManagerError::QueueBusy(id).into());
        }
        let members = queue.members.clone();
        for member in members {
            self.remove_download(member);
        }
        self.queues.remove(&id);
        info!(queue_id = id, "queue deleted");
        Ok(Response::Ok)
    }

    fn queue_bodies(&self) -> Vec<QueueBody> {
        self.queues
            .values()
            .map(|q| QueueBody {
                id: q.id,
                directory: q.directory.clone(),
                name: q.name.clone(),
                max_simultaneous: q.max_concurrent,
                max_bandwidth: q.max_bandwidth,
                max_retries: Some(q.max_retries),
                has_time_constraint: q.window.is_some(),
                time_range: q.window.unwrap_or_default(),
            })
            .collect()
    }

    fn download_bodies(&self) -> Vec<DownloadBody> {
        self.downloads
            .values()
            .map(|d| {
                let snap = d.handler.progress();
                let progress = if d.status == DownloadStatus::Done {
                    100.0
                } else {
                    snap.percent
                };
                let speed = if d.status == DownloadStatus::Downloading {
                    snap.current_speed
                } else {
                    0.0
                };
                DownloadBody {
                    id: d.id,
                    url: d.url.clone(),
                    file_path: d.file_path.clone(),
                    status: d.status,
                    progress,
                    speed: format_speed(speed),
                    queue_name: self
                        .queues
                        .get(&d.queue_id)
                        .map(|q| q.name.clone())
                        .unwrap_or_default(),
                }
            })
            .collect()
    }

    /// Run the download's handler on the blocking pool and report the outcome
    /// as events tagged with a fresh generation.
    pub(super) fn launch(&mut self, id: DownloadId, kind: RunKind, status: DownloadStatus) {
        let Some(d) = self.downloads.get_mut(&id) else { return };
        d.status = status;
        d.generation += 1;
        let generation = d.generation;
        let handler = Arc::clone(&d.handler);
        let teardown = d.teardown.take();
        let events = self.events_tx.clone();
        debug!(download_id = id, generation, ?kind, "launching transfer");

        tokio::spawn(async move {
            if let Some(t) = teardown {
                let _ = t.await;
            }
            let _ = events.send(Event::Started { id, generation });
            let joined = tokio::task::spawn_blocking(move || match kind {
                RunKind::Start => handler.start(),
                RunKind::Resume => handler.resume(),
            })
            .await;
            let event = match joined {
                Ok(Ok(RunOutcome::Completed)) => Event::Finished { id, generation },
                Ok(Ok(RunOutcome::Paused)) => Event::Stopped { id, generation },
                Ok(Err(e)) => Event::Failed {
                    id,
                    generation,
                    message: format!("{e:#}"),
                },
                Err(e) => Event::Failed {
                    id,
                    generation,
                    message: format!("transfer task: {e}"),
                },
            };
            let _ = events.send(event);
        });
    }

    /// Swap in a brand-new handler. The old one is stopped and its residue
    /// removed in the background; the next run waits for that.
    fn replace_handler(&mut self, id: DownloadId) {
        let Some(config) = self
            .downloads
            .get(&id)
            .and_then(|d| self.queues.get(&d.queue_id))
            .map(|q| self.handler_config(q))
        else {
            return;
        };
        let Some(d) = self.downloads.get_mut(&id) else { return };
        let fresh = DownloadHandler::new(d.url.clone(), d.file_path.clone(), config);
        let old = std::mem::replace(&mut d.handler, Arc::new(fresh));
        let previous = d.teardown.take();
        d.generation += 1;

        let stopping = Arc::clone(&old);
        let stop = tokio::spawn(async move {
            if let Some(p) = previous {
                let _ = p.await;
            }
            let _ = tokio::task::spawn_blocking(move || stopping.shutdown()).await;
        });
        d.teardown = Some(spawn_residue_cleanup(id, old, Some(stop)));
    }

    /// Retry from scratch with a new handler.
    fn restart_fresh(&mut self, id: DownloadId) {
        self.replace_handler(id);
        self.launch(id, RunKind::Start, DownloadStatus::Retrying);
    }

    fn current_run(&mut self, id: DownloadId, generation: u64) -> Option<&mut Download> {
        self.downloads
            .get_mut(&id)
            .filter(|d| d.generation == generation)
    }

    pub(super) fn on_event(&mut self, event: Event) {
        match event {
            Event::Started { id, generation } => {
                if let Some(d) = self.current_run(id, generation) {
                    if matches!(d.status, DownloadStatus::Starting | DownloadStatus::Retrying) {
                        d.status = DownloadStatus::Downloading;
                    }
                }
            }
            Event::Stopped { id, generation } => {
                if let Some(d) = self.current_run(id, generation) {
                    if d.status.is_active() {
                        d.status = DownloadStatus::Paused;
                    }
                    debug!(download_id = id, "transfer stopped");
                }
            }
            Event::Finished { id, generation } => {
                let Some(d) = self.current_run(id, generation) else { return };
                d.status = DownloadStatus::Done;
                let queue_id = d.queue_id;
                info!(download_id = id, path = %d.file_path.display(), "download done");
                self.fill_capacity(queue_id, Some(id));
            }
            Event::Failed {
                id,
                generation,
                message,
            } => {
                if self.current_run(id, generation).is_some() {
                    self.on_failure(id, &message);
                }
            }
        }
    }

    fn on_failure(&mut self, id: DownloadId, message: &str) {
        let Some(d) = self.downloads.get(&id) else { return };
        if d.status == DownloadStatus::Paused {
            warn!(download_id = id, error = %message, "transfer failed while paused");
            return;
        }
        let queue_id = d.queue_id;
        let max_retries = self.queues.get(&queue_id).map_or(0, |q| q.max_retries);

        if d.retry_count < max_retries {
            let attempt = d.retry_count + 1;
            warn!(download_id = id, attempt, max_retries, error = %message, "download failed; retrying");
            if let Some(d) = self.downloads.get_mut(&id) {
                d.retry_count = attempt;
            }
            self.restart_fresh(id);
        } else {
            warn!(download_id = id, retries = d.retry_count, error = %message, "download failed");
            if let Some(d) = self.downloads.get_mut(&id) {
                d.status = DownloadStatus::Failed;
            }
            self.fill_capacity(queue_id, Some(id));
        }
    }
}

fn queue_name(id: QueueId, requested: &str) -> String {
    let name = requested.trim();
    if name.is_empty() {
        format!("queue {id}")
    } else {
        name.to_string()
    }
}
