//! Integration tests: the manager control loop driving real transfers.

mod common;

use std::fs;
use std::time::{Duration, Instant};

use qdm_core::config::{EngineConfig, RetryConfig};
use qdm_core::manager::{
    DownloadBody, DownloadId, DownloadStatus, Manager, ManagerHandle, QueueBody, QueueId, Request,
    Response,
};
use qdm_core::parts::list_part_files;
use tempfile::tempdir;

use common::range_server::{self, RangeServerOptions};

const KB: usize = 1024;

fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

fn engine() -> EngineConfig {
    EngineConfig {
        chunk_size: 64 * KB as u64,
        workers: Some(2),
        retry: Some(RetryConfig {
            max_attempts: 1,
            base_delay_secs: 0.05,
            max_delay_secs: 1,
        }),
        ..EngineConfig::default()
    }
}

async fn send(handle: &ManagerHandle, request: Request) -> Response {
    handle.send(request).await.unwrap()
}

async fn created(handle: &ManagerHandle, request: Request) -> u64 {
    match send(handle, request).await {
        Response::Created { id } => id,
        other => panic!("expected Created, got {other:?}"),
    }
}

async fn add_queue(handle: &ManagerHandle, body: QueueBody) -> QueueId {
    created(handle, Request::AddQueue(body)).await
}

async fn add_download(handle: &ManagerHandle, url: String, queue_id: QueueId) -> DownloadId {
    created(handle, Request::AddDownload { url, queue_id }).await
}

async fn download(handle: &ManagerHandle, id: DownloadId) -> DownloadBody {
    match send(handle, Request::GetDownloads).await {
        Response::Downloads(list) => list
            .into_iter()
            .find(|d| d.id == id)
            .unwrap_or_else(|| panic!("download {id} not listed")),
        other => panic!("expected Downloads, got {other:?}"),
    }
}

async fn wait_for(handle: &ManagerHandle, id: DownloadId, status: DownloadStatus) -> DownloadBody {
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        let d = download(handle, id).await;
        if d.status == status {
            return d;
        }
        assert!(
            Instant::now() < deadline,
            "download {id} stuck in {} waiting for {status}",
            d.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queue_with_one_slot_runs_downloads_in_sequence() {
    let data = body(512 * KB);
    let server = range_server::start_with_options(
        data.clone(),
        RangeServerOptions {
            get_delay: Some(Duration::from_millis(50)),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempdir().unwrap();
    let (handle, task) = Manager::new(engine()).spawn();

    let q = add_queue(
        &handle,
        QueueBody {
            max_simultaneous: 1,
            ..QueueBody::new(dir.path())
        },
    )
    .await;
    let first = add_download(&handle, server.url("first.bin"), q).await;
    let second = add_download(&handle, server.url("second.bin"), q).await;

    assert_eq!(send(&handle, Request::StartDownload { id: first }).await, Response::Ok);
    match send(&handle, Request::StartDownload { id: second }).await {
        Response::Failure { message } => assert!(message.contains("concurrency limit"), "{message}"),
        other => panic!("second start should be refused, got {other:?}"),
    }
    wait_for(&handle, first, DownloadStatus::Downloading).await;
    assert_eq!(download(&handle, second).await.status, DownloadStatus::Pending);

    let done = wait_for(&handle, first, DownloadStatus::Done).await;
    assert_eq!(done.progress, 100.0);
    let second_done = wait_for(&handle, second, DownloadStatus::Done).await;

    assert_eq!(fs::read(&done.file_path).unwrap(), data);
    assert_eq!(fs::read(&second_done.file_path).unwrap(), data);
    assert_eq!(done.file_path, dir.path().join("first.bin"));

    drop(handle);
    task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_download_is_retried_exactly_max_retries_times() {
    let server = range_server::start_with_options(
        body(256 * KB),
        RangeServerOptions {
            fail_status: Some(500),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempdir().unwrap();
    let (handle, task) = Manager::new(engine()).spawn();

    let q = add_queue(
        &handle,
        QueueBody {
            max_retries: Some(2),
            ..QueueBody::new(dir.path())
        },
    )
    .await;
    let d = add_download(&handle, server.url("broken.bin"), q).await;
    assert_eq!(send(&handle, Request::StartDownload { id: d }).await, Response::Ok);

    wait_for(&handle, d, DownloadStatus::Failed).await;
    // one initial attempt plus two retries, each starting with a probe
    assert_eq!(server.heads(), 3);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.heads(), 3);
    assert_eq!(download(&handle, d).await.status, DownloadStatus::Failed);

    drop(handle);
    task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pause_and_resume_through_the_manager() {
    let data = body(1024 * KB);
    let server = range_server::start_with_options(
        data.clone(),
        RangeServerOptions {
            get_delay: Some(Duration::from_millis(100)),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempdir().unwrap();
    let (handle, task) = Manager::new(engine()).spawn();

    let q = add_queue(&handle, QueueBody::new(dir.path())).await;
    let d = add_download(&handle, server.url("p.bin"), q).await;
    assert_eq!(send(&handle, Request::StartDownload { id: d }).await, Response::Ok);
    wait_for(&handle, d, DownloadStatus::Downloading).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(send(&handle, Request::PauseDownload { id: d }).await, Response::Ok);
    let paused = wait_for(&handle, d, DownloadStatus::Paused).await;
    assert!(paused.progress < 100.0);
    match send(&handle, Request::PauseDownload { id: d }).await {
        Response::Failure { message } => assert!(message.contains("pause needs downloading"), "{message}"),
        other => panic!("second pause should fail, got {other:?}"),
    }
    // paused downloads hold state and cannot be deleted
    assert!(!send(&handle, Request::DeleteDownload { id: d }).await.is_ok());

    assert_eq!(send(&handle, Request::ResumeDownload { id: d }).await, Response::Ok);
    let done = wait_for(&handle, d, DownloadStatus::Done).await;
    assert_eq!(fs::read(&done.file_path).unwrap(), data);
    assert_eq!(server.range_gets(), 16);

    drop(handle);
    task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_clears_parts_and_retry_starts_over() {
    let data = body(1024 * KB);
    let server = range_server::start_with_options(
        data.clone(),
        RangeServerOptions {
            get_delay: Some(Duration::from_millis(100)),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempdir().unwrap();
    let (handle, task) = Manager::new(engine()).spawn();

    let q = add_queue(&handle, QueueBody::new(dir.path())).await;
    let d = add_download(&handle, server.url("c.bin"), q).await;
    assert_eq!(send(&handle, Request::StartDownload { id: d }).await, Response::Ok);
    wait_for(&handle, d, DownloadStatus::Downloading).await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(send(&handle, Request::CancelDownload { id: d }).await, Response::Ok);
    let cancelled = wait_for(&handle, d, DownloadStatus::Cancelled).await;
    let deadline = Instant::now() + Duration::from_secs(10);
    while !list_part_files(&cancelled.file_path).unwrap().is_empty() {
        assert!(Instant::now() < deadline, "part files survived cancel");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(send(&handle, Request::RetryDownload { id: d }).await, Response::Ok);
    let done = wait_for(&handle, d, DownloadStatus::Done).await;
    assert_eq!(fs::read(&done.file_path).unwrap(), data);
    assert_eq!(server.heads(), 2);

    drop(handle);
    task.await.unwrap().unwrap();
}

async fn wait_until_gone(path: &std::path::Path) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while path.exists() {
        assert!(Instant::now() < deadline, "{} survived", path.display());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_whole_file_download_leaves_no_partial_destination() {
    let server = range_server::start_with_options(
        body(256 * KB),
        RangeServerOptions {
            support_ranges: false,
            get_delay: Some(Duration::from_millis(800)),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempdir().unwrap();
    let (handle, task) = Manager::new(engine()).spawn();

    let q = add_queue(&handle, QueueBody::new(dir.path())).await;
    let d = add_download(&handle, server.url("whole.bin"), q).await;
    assert_eq!(send(&handle, Request::StartDownload { id: d }).await, Response::Ok);
    let running = wait_for(&handle, d, DownloadStatus::Downloading).await;

    // the GET is held by the server, so the destination exists but is empty
    let deadline = Instant::now() + Duration::from_secs(5);
    while !running.file_path.exists() {
        assert!(Instant::now() < deadline, "whole-file fetch never opened its destination");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(send(&handle, Request::CancelDownload { id: d }).await, Response::Ok);
    wait_for(&handle, d, DownloadStatus::Cancelled).await;
    wait_until_gone(&running.file_path).await;

    drop(handle);
    task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deleting_failed_whole_file_download_removes_its_destination() {
    let server = range_server::start_with_options(
        body(64 * KB),
        RangeServerOptions {
            support_ranges: false,
            fail_status: Some(500),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempdir().unwrap();
    let (handle, task) = Manager::new(engine()).spawn();

    let q = add_queue(
        &handle,
        QueueBody {
            max_retries: Some(0),
            ..QueueBody::new(dir.path())
        },
    )
    .await;
    let d = add_download(&handle, server.url("gone.bin"), q).await;
    assert_eq!(send(&handle, Request::StartDownload { id: d }).await, Response::Ok);
    let failed = wait_for(&handle, d, DownloadStatus::Failed).await;
    assert!(failed.file_path.exists(), "failed fetch should have opened its destination");

    assert_eq!(send(&handle, Request::DeleteDownload { id: d }).await, Response::Ok);
    wait_until_gone(&failed.file_path).await;

    drop(handle);
    task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stale_file_with_same_name_is_not_mistaken_for_the_download() {
    let data = body(128 * KB);
    let server = range_server::start(data.clone());
    let dir = tempdir().unwrap();
    // same size as the download, different bytes
    let stale = dir.path().join("same.bin");
    fs::write(&stale, vec![0xAAu8; data.len()]).unwrap();
    let (handle, task) = Manager::new(engine()).spawn();

    let q = add_queue(&handle, QueueBody::new(dir.path())).await;
    let d = add_download(&handle, server.url("same.bin"), q).await;
    assert_eq!(send(&handle, Request::StartDownload { id: d }).await, Response::Ok);
    let done = wait_for(&handle, d, DownloadStatus::Done).await;

    assert_eq!(done.file_path, dir.path().join("same (1).bin"));
    assert_eq!(fs::read(&done.file_path).unwrap(), data);
    assert!(list_part_files(&done.file_path).unwrap().is_empty());
    assert_eq!(fs::read(&stale).unwrap(), vec![0xAAu8; data.len()]);

    drop(handle);
    task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn restart_resumes_from_persisted_state() {
    let data = body(1024 * KB);
    let server = range_server::start_with_options(
        data.clone(),
        RangeServerOptions {
            get_delay: Some(Duration::from_millis(100)),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("state").join("qdm.db");
    let downloads = dir.path().join("downloads");
    fs::create_dir_all(&downloads).unwrap();

    let db = qdm_core::resume_db::ResumeDb::open_at(&db_path).await.unwrap();
    let (handle, task) = Manager::restore(engine(), db).await.unwrap().spawn();
    let q = add_queue(&handle, QueueBody::new(&downloads)).await;
    let d = add_download(&handle, server.url("r.bin"), q).await;
    assert_eq!(send(&handle, Request::StartDownload { id: d }).await, Response::Ok);
    wait_for(&handle, d, DownloadStatus::Downloading).await;
    tokio::time::sleep(Duration::from_millis(350)).await;

    // shutting the loop down pauses the transfer and persists its state
    drop(handle);
    task.await.unwrap().unwrap();
    let fetched_before = server.range_gets();
    assert!(fetched_before > 0 && fetched_before < 16);

    let db = qdm_core::resume_db::ResumeDb::open_at(&db_path).await.unwrap();
    let (handle, task) = Manager::restore(engine(), db).await.unwrap().spawn();
    assert_eq!(download(&handle, d).await.status, DownloadStatus::Paused);
    assert_eq!(send(&handle, Request::ResumeDownload { id: d }).await, Response::Ok);
    let done = wait_for(&handle, d, DownloadStatus::Done).await;

    assert_eq!(fs::read(&done.file_path).unwrap(), data);
    assert_eq!(server.range_gets(), 16);
    assert_eq!(server.heads(), 1);

    drop(handle);
    task.await.unwrap().unwrap();
}
