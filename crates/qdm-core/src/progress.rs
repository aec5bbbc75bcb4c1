//! Progress and throughput tracking for one download.
//!
//! Workers call `record` for every chunk of bytes that lands on disk and
//! `set_completed` after a part is accounted in the transfer state. Speed is
//! sampled over a rolling window and smoothed over the last few samples;
//! percent is derived from completed bytes only.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Derived view of a download's progress. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProgressSnapshot {
    pub percent: f64,
    /// Smoothed instantaneous speed in bytes/sec.
    pub current_speed: f64,
    /// Bytes/sec since the tracker (re)started.
    pub average_speed: f64,
    pub completed: u64,
    pub total: u64,
}

#[derive(Debug)]
struct Inner {
    total: u64,
    completed: u64,
    transferred: u64,
    started: Instant,
    window_start: Instant,
    window_bytes: u64,
    samples: VecDeque<f64>,
}

#[derive(Debug)]
pub struct ProgressTracker {
    inner: Mutex<Inner>,
    window: Duration,
    max_samples: usize,
}

impl ProgressTracker {
    pub fn new(total: u64, window: Duration, max_samples: usize) -> Self {
        let now = Instant::now();
        Self {
            inner: Mutex::new(Inner {
                total,
                completed: 0,
                transferred: 0,
                started: now,
                window_start: now,
                window_bytes: 0,
                samples: VecDeque::new(),
            }),
            window: window.max(Duration::from_millis(1)),
            max_samples: max_samples.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_total(&self, total: u64) {
        let mut p = self.lock();
        p.total = total;
        p.completed = p.completed.min(total);
    }

    /// Restart the clocks (start of a new run); completed bytes are kept.
    pub fn restart(&self) {
        let now = Instant::now();
        let mut p = self.lock();
        p.transferred = 0;
        p.started = now;
        p.window_start = now;
        p.window_bytes = 0;
        p.samples.clear();
    }

    /// Account `n` bytes that just landed.
    pub fn record(&self, n: u64) {
        self.record_at(n, Instant::now());
    }

    fn record_at(&self, n: u64, now: Instant) {
        let mut p = self.lock();
        p.transferred += n;
        p.window_bytes += n;
        let elapsed = now.saturating_duration_since(p.window_start);
        if elapsed >= self.window {
            let sample = p.window_bytes as f64 / elapsed.as_secs_f64();
            p.samples.push_back(sample);
            while p.samples.len() > self.max_samples {
                p.samples.pop_front();
            }
            p.window_start = now;
            p.window_bytes = 0;
        }
    }

    /// Set the completed byte count (capped at the total when known).
    pub fn set_completed(&self, bytes: u64) {
        let mut p = self.lock();
        p.completed = if p.total > 0 { bytes.min(p.total) } else { bytes };
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot_at(Instant::now())
    }

    fn snapshot_at(&self, now: Instant) -> ProgressSnapshot {
        let p = self.lock();
        let percent = if p.total == 0 {
            0.0
        } else {
            p.completed as f64 / p.total as f64 * 100.0
        };
        let since_window = now.saturating_duration_since(p.window_start);
        let current_speed = if since_window >= self.window * 2 {
            // nothing landed for two windows: stalled or paused
            0.0
        } else if !p.samples.is_empty() {
            p.samples.iter().sum::<f64>() / p.samples.len() as f64
        } else if since_window > Duration::ZERO {
            p.window_bytes as f64 / since_window.as_secs_f64()
        } else {
            0.0
        };
        let elapsed = now.saturating_duration_since(p.started).as_secs_f64();
        let average_speed = if elapsed > 0.0 {
            p.transferred as f64 / elapsed
        } else {
            0.0
        };
        ProgressSnapshot {
            percent,
            current_speed,
            average_speed,
            completed: p.completed,
            total: p.total,
        }
    }
}

/// Human-readable speed, 1024-based: `"1.50 MB/s"`.
pub fn format_speed(bytes_per_sec: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * KB;
    const GB: f64 = 1024.0 * MB;

    if bytes_per_sec >= GB {
        format!("{:.2} GB/s", bytes_per_sec / GB)
    } else if bytes_per_sec >= MB {
        format!("{:.2} MB/s", bytes_per_sec / MB)
    } else if bytes_per_sec >= KB {
        format!("{:.2} KB/s", bytes_per_sec / KB)
    } else {
        format!("{:.2} B/s", bytes_per_sec)
    }
}
