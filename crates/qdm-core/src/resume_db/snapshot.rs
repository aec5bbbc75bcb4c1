//! Whole-state save and load.
//!
//! The manager's state is small, so every save rewrites both tables in one
//! transaction. A crash mid-save leaves the previous snapshot intact.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use sqlx::Row;

use super::db::{unix_timestamp, ResumeDb};
use super::types::{DownloadRecord, QueueRecord, Snapshot};
use crate::handler::SavedState;
use crate::manager::{DownloadStatus, TimeWindow};
use crate::planner::PartBitmap;

const TIME_FORMAT: &str = "%H:%M:%S";

fn parse_window(start: Option<String>, end: Option<String>) -> Result<Option<TimeWindow>> {
    match (start, end) {
        (Some(s), Some(e)) => Ok(Some(TimeWindow::new(
            NaiveTime::parse_from_str(&s, TIME_FORMAT).with_context(|| format!("bad window start {s:?}"))?,
            NaiveTime::parse_from_str(&e, TIME_FORMAT).with_context(|| format!("bad window end {e:?}"))?,
        ))),
        _ => Ok(None),
    }
}

impl ResumeDb {
    /// Replace the stored state with `snap`.
    pub async fn save_snapshot(&self, snap: &Snapshot) -> Result<()> {
        let now = unix_timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM downloads").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM queues").execute(&mut *tx).await?;

        for q in &snap.queues {
            sqlx::query(
                r#"
                INSERT INTO queues (
                    id, name, directory, max_concurrent, max_bandwidth,
                    max_retries, window_start, window_end, disabled
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(q.id as i64)
            .bind(&q.name)
            .bind(q.directory.to_string_lossy().into_owned())
            .bind(q.max_concurrent as i64)
            .bind(q.max_bandwidth.map(|b| b as i64))
            .bind(q.max_retries as i64)
            .bind(q.window.map(|w| w.start.format(TIME_FORMAT).to_string()))
            .bind(q.window.map(|w| w.end.format(TIME_FORMAT).to_string()))
            .bind(q.disabled)
            .execute(&mut *tx)
            .await?;
        }

        for d in &snap.downloads {
            let saved = d.saved.as_ref().filter(|s| s.has_progress());
            let bitmap = saved
                .map(|s| PartBitmap::from_flags(&s.completed_parts).to_bytes())
                .unwrap_or_default();
            let incomplete = serde_json::to_string(
                &saved.map(|s| s.incomplete_parts.clone()).unwrap_or_default(),
            )?;
            sqlx::query(
                r#"
                INSERT INTO downloads (
                    id, queue_id, url, file_path, status, retry_count,
                    has_state, chunk_size, total_bytes, current_byte, parts_count,
                    completed_bitmap, incomplete_json, is_paused, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                "#,
            )
            .bind(d.id as i64)
            .bind(d.queue_id as i64)
            .bind(&d.url)
            .bind(d.file_path.to_string_lossy().into_owned())
            .bind(d.status.as_str())
            .bind(d.retry_count as i64)
            .bind(saved.is_some())
            .bind(saved.map(|s| s.chunk_size as i64).unwrap_or(0))
            .bind(saved.map(|s| s.total_bytes as i64).unwrap_or(0))
            .bind(saved.map(|s| s.current_byte as i64).unwrap_or(0))
            .bind(saved.map(|s| s.parts_count as i64).unwrap_or(0))
            .bind(bitmap)
            .bind(incomplete)
            .bind(saved.map(|s| s.is_paused).unwrap_or(false))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        for (name, value) in [
            ("last_download_id", snap.last_download_id),
            ("last_queue_id", snap.last_queue_id),
        ] {
            sqlx::query(
                r#"
                INSERT INTO counters (name, value) VALUES (?1, ?2)
                ON CONFLICT(name) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(name)
            .bind(value as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Load the stored state (empty snapshot for a fresh database).
    pub async fn load_snapshot(&self) -> Result<Snapshot> {
        let mut snap = Snapshot::default();

        for row in sqlx::query("SELECT name, value FROM counters")
            .fetch_all(&self.pool)
            .await?
        {
            let name: String = row.get("name");
            let value: i64 = row.get("value");
            match name.as_str() {
                "last_download_id" => snap.last_download_id = value as u64,
                "last_queue_id" => snap.last_queue_id = value as u64,
                _ => {}
            }
        }

        let rows = sqlx::query(
            r#"
            SELECT id, name, directory, max_concurrent, max_bandwidth,
                   max_retries, window_start, window_end, disabled
            FROM queues
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let max_bandwidth: Option<i64> = row.get("max_bandwidth");
            let directory: String = row.get("directory");
            snap.queues.push(QueueRecord {
                id: row.get::<i64, _>("id") as u64,
                name: row.get("name"),
                directory: PathBuf::from(directory),
                max_concurrent: row.get::<i64, _>("max_concurrent") as u32,
                max_bandwidth: max_bandwidth.map(|b| b as u64),
                max_retries: row.get::<i64, _>("max_retries") as u32,
                window: parse_window(row.get("window_start"), row.get("window_end"))?,
                disabled: row.get("disabled"),
            });
        }

        let rows = sqlx::query(
            r#"
            SELECT id, queue_id, url, file_path, status, retry_count,
                   has_state, chunk_size, total_bytes, current_byte, parts_count,
                   completed_bitmap, incomplete_json, is_paused
            FROM downloads
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let url: String = row.get("url");
            let file_path = PathBuf::from(row.get::<String, _>("file_path"));
            let has_state: bool = row.get("has_state");
            let saved = if has_state {
                let parts_count = row.get::<i64, _>("parts_count") as usize;
                let bitmap: Vec<u8> = row.get("completed_bitmap");
                let incomplete: String = row.get("incomplete_json");
                Some(SavedState {
                    url: url.clone(),
                    file_path: file_path.clone(),
                    chunk_size: row.get::<i64, _>("chunk_size") as u64,
                    completed_parts: PartBitmap::from_bytes(&bitmap, parts_count).to_flags(),
                    current_byte: row.get::<i64, _>("current_byte") as u64,
                    total_bytes: row.get::<i64, _>("total_bytes") as u64,
                    parts_count,
                    is_paused: row.get("is_paused"),
                    incomplete_parts: serde_json::from_str(&incomplete)
                        .context("parsing incomplete part offsets")?,
                })
            } else {
                None
            };
            let status: String = row.get("status");
            snap.downloads.push(DownloadRecord {
                id: row.get::<i64, _>("id") as u64,
                queue_id: row.get::<i64, _>("queue_id") as u64,
                url,
                file_path,
                status: DownloadStatus::parse(&status),
                retry_count: row.get::<i64, _>("retry_count") as u32,
                saved,
            });
        }

        Ok(snap)
    }
}
