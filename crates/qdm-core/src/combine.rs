//! Reassembly of part files into the destination file.
//!
//! Combining is idempotent: a destination that already has the expected size
//! is left alone. Otherwise every part `0..parts_count` must be present with
//! its exact expected length; parts are copied in ascending index order, the
//! final size is checked, and only then are the part files removed. Any
//! failure leaves the part files in place for a later attempt.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use crate::parts::list_part_files;
use crate::planner::ChunkPlan;

const COPY_BUF_SIZE: usize = 32 * 1024;

#[derive(Debug, Error)]
pub enum CombineError {
    #[error("missing part file for part {index}")]
    MissingPart { index: usize },
    #[error("part {index} has {found} bytes, expected {expected}")]
    PartSizeMismatch {
        index: usize,
        expected: u64,
        found: u64,
    },
    #[error("combined file has {found} bytes, expected {expected}")]
    FinalSizeMismatch { expected: u64, found: u64 },
    #[error("combine i/o: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineOutcome {
    /// Destination already had the expected size; nothing was touched.
    AlreadyComplete,
    /// Parts were concatenated and removed.
    Combined { parts: usize },
}

/// Concatenate the part files of `dest` according to `plan`.
pub fn combine_parts(dest: &Path, plan: &ChunkPlan) -> Result<CombineOutcome, CombineError> {
    let total = plan.total();
    if let Ok(meta) = fs::metadata(dest) {
        if meta.is_file() && meta.len() == total {
            debug!(path = %dest.display(), "destination already complete");
            return Ok(CombineOutcome::AlreadyComplete);
        }
    }

    let found = list_part_files(dest).map_err(|e| io::Error::other(format!("{e:#}")))?;
    let count = plan.parts_count();
    let mut ordered = Vec::with_capacity(count);
    for index in 0..count {
        let path = found
            .get(&index)
            .ok_or(CombineError::MissingPart { index })?;
        let expected = plan.part_len(index);
        let size = fs::metadata(path)?.len();
        if size != expected {
            return Err(CombineError::PartSizeMismatch {
                index,
                expected,
                found: size,
            });
        }
        ordered.push(path);
    }

    let mut out = File::create(dest)?;
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    for (index, path) in ordered.iter().enumerate() {
        let expected = plan.part_len(index);
        let mut part = File::open(path)?;
        let mut copied = 0u64;
        loop {
            let n = part.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
            copied += n as u64;
        }
        if copied != expected {
            return Err(CombineError::PartSizeMismatch {
                index,
                expected,
                found: copied,
            });
        }
    }
    out.flush()?;
    out.sync_all()?;
    drop(out);

    let final_size = fs::metadata(dest)?.len();
    if final_size != total {
        return Err(CombineError::FinalSizeMismatch {
            expected: total,
            found: final_size,
        });
    }

    for path in &ordered {
        fs::remove_file(path)?;
    }
    info!(path = %dest.display(), parts = count, bytes = total, "parts combined");
    Ok(CombineOutcome::Combined { parts: count })
}
