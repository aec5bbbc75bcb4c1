//! Capability probe.
//!
//! Issues a HEAD request with curl to learn the total size and whether the
//! server accepts byte-range requests (`Accept-Ranges: bytes`).

mod parse;

use anyhow::{Context, Result};
use std::str;
use std::time::Duration;
use tracing::debug;

/// Result of a probe: what the engine needs to choose chunked vs whole-file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// Total size in bytes, if `Content-Length` is present.
    pub content_length: Option<u64>,
    /// True if the server sent `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
}

impl ProbeResult {
    /// Chunked transfer needs range support and a known, non-zero size.
    pub fn supports_chunking(&self) -> bool {
        self.accept_ranges && self.content_length.is_some_and(|n| n > 0)
    }
}

/// Performs a HEAD request bounded by `timeout`. Status >= 400 is an error.
///
/// Blocking; call from a worker thread or `spawn_blocking`.
pub fn probe(url: &str, timeout: Duration) -> Result<ProbeResult> {
    let mut headers: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.nobody(true)?;
    easy.follow_location(true)?;
    easy.connect_timeout(timeout)?;
    easy.timeout(timeout)?;

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                let line = s.trim_end();
                // A redirect starts a new header block; keep only the last one.
                if line.starts_with("HTTP/") {
                    headers.clear();
                }
                headers.push(line.to_string());
            }
            true
        })?;
        transfer
            .perform()
            .with_context(|| format!("HEAD {url} failed"))?;
    }

    let code = easy.response_code().context("no response code")?;
    if code >= 400 {
        anyhow::bail!("HEAD {} returned HTTP {}", url, code);
    }

    let result = parse::parse_headers(&headers);
    debug!(
        url,
        status = code,
        content_length = ?result.content_length,
        accept_ranges = result.accept_ranges,
        "probe complete"
    );
    Ok(result)
}
