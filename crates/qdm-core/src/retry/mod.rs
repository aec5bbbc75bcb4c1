//! Fetch-level retry and backoff.
//!
//! A fetch that hits a timeout, throttling or a dropped connection gets a few
//! short retries before its failure reaches the worker. Download-level
//! retries are the manager's decision, not this module's.

mod classify;
mod error;
mod policy;
mod run;

pub use classify::{is_server_error, is_throttle_status, is_transient_curl};
pub use error::FetchError;
pub use policy::RetryPolicy;
pub use run::run_with_retry;
