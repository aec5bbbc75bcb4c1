//! Part and whole-file fetches over curl.
//!
//! `fetch_part` downloads one inclusive byte range into its own part file and
//! insists on `206 Partial Content` with exactly the expected length.
//! `fetch_whole` is the fallback for servers without range support: a single
//! GET straight into the destination. Both stream through the download's
//! shared bandwidth limiter, report landed bytes to the progress tracker and
//! apply the fetch-level retry policy before failing.

mod range;
mod status;
mod whole;

pub use range::fetch_part;
pub use whole::fetch_whole;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use crate::retry::{FetchError, RetryPolicy};
use crate::throttle::{BandwidthLimiter, LimitedWriter};

/// Per-download fetch settings shared by every worker.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
    pub limiter: BandwidthLimiter,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            limiter: BandwidthLimiter::unlimited(),
        }
    }
}

fn configure(easy: &mut curl::easy::Easy, url: &str, opts: &FetchOptions) -> Result<(), FetchError> {
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.connect_timeout(opts.connect_timeout)?;
    // Abort if throughput stays below 1 KiB/s for 60s rather than using a wall-clock timeout.
    easy.low_speed_limit(1024)?;
    easy.low_speed_time(Duration::from_secs(60))?;
    Ok(())
}

type Sink = LimitedWriter<BufWriter<File>>;

fn open_sink(path: &Path, limiter: &BandwidthLimiter) -> Result<Sink, FetchError> {
    let file = File::create(path)?;
    Ok(LimitedWriter::new(BufWriter::new(file), limiter.clone()))
}

/// Flush, fsync and re-stat the written file; returns its on-disk size.
fn finish_sink(sink: Sink, path: &Path) -> Result<u64, FetchError> {
    let mut buf = sink.into_inner();
    buf.flush()?;
    let file = buf.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    drop(file);
    Ok(std::fs::metadata(path)?.len())
}
