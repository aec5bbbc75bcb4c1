//! Single-part HTTP Range GET into a dedicated part file.

use std::cell::{Cell, RefCell};
use std::io::Write;
use std::path::Path;

use tracing::trace;

use super::status::ResponseHead;
use super::{configure, finish_sink, open_sink, FetchOptions};
use crate::planner::Part;
use crate::progress::ProgressTracker;
use crate::retry::{run_with_retry, FetchError};

/// Fetch `part` into `path`, retrying transient failures per `opts.retry`.
///
/// The part file is created (or truncated) for every attempt, so a failed
/// attempt never leaves bytes that a later attempt appends to.
pub fn fetch_part(
    url: &str,
    part: &Part,
    path: &Path,
    opts: &FetchOptions,
    progress: &ProgressTracker,
) -> Result<(), FetchError> {
    run_with_retry(&opts.retry, || fetch_part_once(url, part, path, opts, progress))
}

fn fetch_part_once(
    url: &str,
    part: &Part,
    path: &Path,
    opts: &FetchOptions,
    progress: &ProgressTracker,
) -> Result<(), FetchError> {
    let expected = part.len();
    let mut sink = open_sink(path, &opts.limiter)?;
    let head = RefCell::new(ResponseHead::default());
    let received = Cell::new(0u64);
    let rejected: RefCell<Option<FetchError>> = RefCell::new(None);

    let mut easy = curl::easy::Easy::new();
    configure(&mut easy, url, opts)?;
    easy.range(&part.curl_range())?;

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            head.borrow_mut().observe(data);
            true
        })?;
        transfer.write_function(|data| {
            let h = *head.borrow();
            if h.status != Some(206) {
                *rejected.borrow_mut() = Some(FetchError::Http(h.status.unwrap_or(0)));
                return Ok(0);
            }
            if let Some(announced) = h.content_length.filter(|&n| n != expected) {
                *rejected.borrow_mut() = Some(FetchError::LengthMismatch { expected, announced });
                return Ok(0);
            }
            let total = received.get() + data.len() as u64;
            if total > expected {
                *rejected.borrow_mut() = Some(FetchError::PartialTransfer {
                    expected,
                    received: total,
                });
                return Ok(0);
            }
            if let Err(e) = sink.write_all(data) {
                *rejected.borrow_mut() = Some(FetchError::Storage(e));
                return Ok(0);
            }
            received.set(total);
            progress.record(data.len() as u64);
            Ok(data.len())
        })?;
        if let Err(e) = transfer.perform() {
            if e.is_write_error() {
                if let Some(err) = rejected.borrow_mut().take() {
                    return Err(err);
                }
            }
            return Err(FetchError::Curl(e));
        }
    }

    let code = easy.response_code()?;
    if code != 206 {
        return Err(FetchError::Http(code));
    }
    let got = received.get();
    if got != expected {
        return Err(FetchError::PartialTransfer {
            expected,
            received: got,
        });
    }
    let found = finish_sink(sink, path)?;
    if found != expected {
        return Err(FetchError::SizeMismatch { expected, found });
    }
    trace!(part = part.index, bytes = expected, "part written");
    Ok(())
}
