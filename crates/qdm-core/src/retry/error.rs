//! Part fetch error type, classified before it is surfaced to the worker.

use thiserror::Error;

/// Error returned by a single part (or whole-file) fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Curl reported an error (timeout, connection, etc.).
    #[error("{0}")]
    Curl(#[from] curl::Error),
    /// Response status was not the one the request requires (206 for ranges, 2xx otherwise).
    #[error("HTTP {0}")]
    Http(u32),
    /// Announced body length differs from the expected range length.
    #[error("content length mismatch: expected {expected} bytes, server announced {announced}")]
    LengthMismatch { expected: u64, announced: u64 },
    /// Transfer finished with fewer (or more) bytes than expected.
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },
    /// File on disk after flush has the wrong size.
    #[error("size mismatch on disk: expected {expected} bytes, found {found}")]
    SizeMismatch { expected: u64, found: u64 },
    /// Disk write failed (disk full, permission denied). Not retried.
    #[error("storage: {0}")]
    Storage(#[from] std::io::Error),
    /// The run's cancel token was raised mid-transfer.
    #[error("fetch aborted by pause or cancel")]
    Aborted,
}
