//! QDM core: segmented HTTP downloads with pause/resume, grouped into
//! scheduled queues.
//!
//! A `handler::DownloadHandler` moves one file: probe, parallel range
//! fetches into part files, combine. A `manager::Manager` owns queues of
//! downloads and drives handlers from a single control loop.

pub mod combine;
pub mod config;
pub mod control;
pub mod fetch;
pub mod handler;
pub mod logging;
pub mod manager;
pub mod parts;
pub mod planner;
pub mod probe;
pub mod progress;
pub mod resume_db;
pub mod retry;
pub mod throttle;
pub mod url_model;
