//! Work feed consumed by the worker pool.
//!
//! A fresh run walks the plan from offset 0. A resumed run first yields the
//! recovered incomplete parts, then walks from the recorded current-byte
//! offset to the end and wraps to the start, skipping parts that were
//! complete when the run began. Each index is issued at most once per feed.

use std::collections::{HashSet, VecDeque};

use super::{ChunkPlan, Part, PartBitmap};

#[derive(Debug)]
pub struct PartFeed {
    plan: ChunkPlan,
    priority: VecDeque<u64>,
    done: PartBitmap,
    origin: usize,
    walked: usize,
    issued: HashSet<usize>,
}

impl PartFeed {
    /// Feed for an initial run: every part in ascending order.
    pub fn fresh(plan: ChunkPlan) -> Self {
        let done = PartBitmap::new(plan.parts_count());
        Self::resume(plan, Vec::new(), 0, done)
    }

    /// Feed for a resumed run.
    ///
    /// `incomplete` holds part start offsets; `done` is the completion bitmap
    /// as validated at resume time.
    pub fn resume(
        plan: ChunkPlan,
        incomplete: impl IntoIterator<Item = u64>,
        current_byte: u64,
        done: PartBitmap,
    ) -> Self {
        let count = plan.parts_count();
        let origin = if count == 0 {
            0
        } else {
            ((current_byte / plan.chunk_size()) as usize).min(count - 1)
        };
        Self {
            plan,
            priority: incomplete.into_iter().collect(),
            done,
            origin,
            walked: 0,
            issued: HashSet::new(),
        }
    }

    fn eligible(&self, index: usize) -> bool {
        !self.done.is_set(index) && !self.issued.contains(&index)
    }

    /// Next part to fetch, or None when the feed is drained.
    pub fn next_part(&mut self) -> Option<Part> {
        while let Some(start) = self.priority.pop_front() {
            if let Some(part) = self.plan.part_at(start) {
                if part.start == start && self.eligible(part.index) {
                    self.issued.insert(part.index);
                    return Some(part);
                }
            }
        }
        let count = self.plan.parts_count();
        while self.walked < count {
            let index = (self.origin + self.walked) % count;
            self.walked += 1;
            if self.eligible(index) {
                self.issued.insert(index);
                return self.plan.part(index);
            }
        }
        None
    }

    /// Parts that the feed would still hand out (upper bound).
    pub fn remaining_hint(&self) -> usize {
        self.plan.parts_count().saturating_sub(self.done.count_set() + self.issued.len())
    }
}

impl Iterator for PartFeed {
    type Item = Part;

    fn next(&mut self) -> Option<Part> {
        self.next_part()
    }
}
