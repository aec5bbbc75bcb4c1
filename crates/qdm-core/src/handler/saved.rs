//! Saved state: the serializable subset needed to rebuild a handler after a restart.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{DownloadHandler, HandlerConfig, TransferMode, TransferState};
use crate::planner::{ChunkPlan, PartBitmap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedState {
    pub url: String,
    pub file_path: PathBuf,
    pub chunk_size: u64,
    pub completed_parts: Vec<bool>,
    pub current_byte: u64,
    pub total_bytes: u64,
    pub parts_count: usize,
    pub is_paused: bool,
    /// Start offsets of parts to fetch first.
    pub incomplete_parts: Vec<u64>,
}

impl SavedState {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("serializing saved state")
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("parsing saved state")
    }

    /// True when the state carries chunked progress worth resuming.
    pub fn has_progress(&self) -> bool {
        self.parts_count > 0 && self.total_bytes > 0
    }
}

impl DownloadHandler {
    /// Snapshot the transfer for persistence.
    pub fn export(&self) -> SavedState {
        let state = self.lock_state();
        let chunked = state.mode == TransferMode::Chunked;
        SavedState {
            url: self.url.clone(),
            file_path: self.dest.clone(),
            chunk_size: state.chunk_size,
            completed_parts: if chunked { state.completed.to_flags() } else { Vec::new() },
            current_byte: if chunked { state.current } else { 0 },
            total_bytes: if chunked { state.total } else { 0 },
            parts_count: if chunked { state.completed.len() } else { 0 },
            is_paused: state.paused,
            incomplete_parts: if chunked { state.incomplete.clone() } else { Vec::new() },
        }
    }

    /// Rebuild a handler from saved state. The result is always paused; call
    /// `resume` to continue. `current` is recomputed from the completion flags.
    pub fn import(saved: &SavedState, config: HandlerConfig) -> Result<Self> {
        let mut state = TransferState::new(saved.chunk_size);
        state.paused = true;
        if saved.has_progress() {
            let plan = ChunkPlan::new(saved.total_bytes, saved.chunk_size);
            if plan.parts_count() != saved.parts_count
                || saved.completed_parts.len() != saved.parts_count
            {
                anyhow::bail!(
                    "saved state for {} is inconsistent: {} parts planned, {} recorded, {} flags",
                    saved.url,
                    plan.parts_count(),
                    saved.parts_count,
                    saved.completed_parts.len()
                );
            }
            state.mode = TransferMode::Chunked;
            state.total = saved.total_bytes;
            state.completed = PartBitmap::from_flags(&saved.completed_parts);
            state.incomplete = saved
                .incomplete_parts
                .iter()
                .copied()
                .filter(|&start| start < saved.total_bytes && start % plan.chunk_size() == 0)
                .collect();
            state.recompute_current();
        }
        let config = HandlerConfig {
            chunk_size: state.chunk_size,
            ..config
        };
        Ok(Self::with_state(
            saved.url.clone(),
            saved.file_path.clone(),
            config,
            state,
        ))
    }
}
