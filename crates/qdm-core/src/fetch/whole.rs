//! Whole-file GET for servers without range support.

use std::cell::{Cell, RefCell};
use std::io::Write;
use std::path::Path;

use tracing::debug;

use super::status::ResponseHead;
use super::{configure, finish_sink, open_sink, FetchOptions};
use crate::control::CancelToken;
use crate::progress::ProgressTracker;
use crate::retry::{run_with_retry, FetchError};

/// Download the whole body straight into `dest`. Returns the byte count.
///
/// When `expected` is known, the body and the file on disk must match it.
/// Without ranges there is nothing to resume from, so a raised `cancel`
/// token aborts the transfer with `FetchError::Aborted`.
pub fn fetch_whole(
    url: &str,
    dest: &Path,
    expected: Option<u64>,
    opts: &FetchOptions,
    progress: &ProgressTracker,
    cancel: &CancelToken,
) -> Result<u64, FetchError> {
    run_with_retry(&opts.retry, || {
        fetch_whole_once(url, dest, expected, opts, progress, cancel)
    })
}

fn fetch_whole_once(
    url: &str,
    dest: &Path,
    expected: Option<u64>,
    opts: &FetchOptions,
    progress: &ProgressTracker,
    cancel: &CancelToken,
) -> Result<u64, FetchError> {
    let mut sink = open_sink(dest, &opts.limiter)?;
    let head = RefCell::new(ResponseHead::default());
    let received = Cell::new(0u64);
    let rejected: RefCell<Option<FetchError>> = RefCell::new(None);
    progress.set_completed(0);

    let mut easy = curl::easy::Easy::new();
    configure(&mut easy, url, opts)?;

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            head.borrow_mut().observe(data);
            true
        })?;
        transfer.write_function(|data| {
            if cancel.is_cancelled() {
                *rejected.borrow_mut() = Some(FetchError::Aborted);
                return Ok(0);
            }
            let h = *head.borrow();
            if !h.is_success() {
                *rejected.borrow_mut() = Some(FetchError::Http(h.status.unwrap_or(0)));
                return Ok(0);
            }
            if let Err(e) = sink.write_all(data) {
                *rejected.borrow_mut() = Some(FetchError::Storage(e));
                return Ok(0);
            }
            let total = received.get() + data.len() as u64;
            received.set(total);
            progress.record(data.len() as u64);
            progress.set_completed(total);
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
    if !(200..300).contains(&code) {
        return Err(FetchError::Http(code));
    }
    let got = received.get();
    if let Some(expected) = expected {
        if got != expected {
            return Err(FetchError::PartialTransfer {
                expected,
                received: got,
            });
        }
    }
    let found = finish_sink(sink, dest)?;
    if found != got {
        return Err(FetchError::SizeMismatch {
            expected: got,
            found,
        });
    }
    debug!(bytes = got, path = %dest.display(), "whole-file fetch complete");
    Ok(got)
}
