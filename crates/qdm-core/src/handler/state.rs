//! Transfer state: the lock-protected byte and part accounting of one download.

use crate::planner::{ChunkPlan, Part, PartBitmap};

/// How the transfer is being carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Not probed yet (fresh handler, or a pause that landed before the probe finished).
    Unprobed,
    /// Byte ranges into part files.
    Chunked,
    /// Single GET straight into the destination.
    Whole,
}

#[derive(Debug, Clone)]
pub struct TransferState {
    pub mode: TransferMode,
    pub total: u64,
    pub chunk_size: u64,
    /// Sum of the lengths of parts marked complete (whole mode: bytes written).
    pub current: u64,
    pub completed: PartBitmap,
    /// Start offsets of parts to fetch first on the next run.
    pub incomplete: Vec<u64>,
    pub paused: bool,
    /// Set once the destination holds the full file.
    pub finished: bool,
}

impl TransferState {
    pub fn new(chunk_size: u64) -> Self {
        Self {
            mode: TransferMode::Unprobed,
            total: 0,
            chunk_size: chunk_size.max(1),
            current: 0,
            completed: PartBitmap::new(0),
            incomplete: Vec::new(),
            paused: false,
            finished: false,
        }
    }

    pub fn plan(&self) -> ChunkPlan {
        ChunkPlan::new(self.total, self.chunk_size)
    }

    /// Switch to chunked mode for a transfer of `total` bytes with nothing done.
    pub fn init_chunked(&mut self, total: u64) {
        self.mode = TransferMode::Chunked;
        self.total = total;
        self.current = 0;
        self.completed = PartBitmap::new(self.plan().parts_count());
        self.incomplete.clear();
    }

    pub fn init_whole(&mut self, total: Option<u64>) {
        self.mode = TransferMode::Whole;
        self.total = total.unwrap_or(0);
        self.current = 0;
        self.completed = PartBitmap::new(0);
        self.incomplete.clear();
    }

    /// Record a fetched part. Returns false if it was already complete, in
    /// which case `current` is left untouched.
    pub fn mark_complete(&mut self, part: &Part) -> bool {
        if self.completed.is_set(part.index) {
            return false;
        }
        self.completed.set(part.index);
        self.current = (self.current + part.len()).min(self.total);
        true
    }

    /// Record a failed part: not complete, and first in line next run.
    pub fn mark_failed(&mut self, part: &Part) {
        if self.completed.is_set(part.index) {
            self.completed.clear(part.index);
            self.current = self.current.saturating_sub(part.len());
        }
        self.requeue(part);
    }

    /// Push a part back onto the incomplete list without touching completion.
    pub fn requeue(&mut self, part: &Part) {
        if !self.incomplete.contains(&part.start) {
            self.incomplete.push(part.start);
        }
    }

    /// Rebuild `current` from the completion flags.
    pub fn recompute_current(&mut self) {
        let plan = self.plan();
        self.current = (0..plan.parts_count())
            .filter(|&i| self.completed.is_set(i))
            .map(|i| plan.part_len(i))
            .sum();
    }

    /// Rebuild the incomplete list from the completion flags.
    pub fn rebuild_incomplete(&mut self) {
        let plan = self.plan();
        self.incomplete = self
            .completed
            .unset_indices()
            .filter_map(|i| plan.part(i).map(|p| p.start))
            .collect();
    }

    pub fn all_parts_complete(&self) -> bool {
        self.mode == TransferMode::Chunked && self.completed.all_set()
    }
}
