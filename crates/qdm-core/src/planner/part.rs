//! Part type and fixed-size chunk plan.

/// A single part: inclusive byte range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Part {
    /// Position in the plan; equals `start / chunk_size`.
    pub index: usize,
    pub start: u64,
    /// Last byte offset (inclusive).
    pub end: u64,
}

impl Part {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// HTTP Range header value: `bytes=start-end`.
    pub fn range_header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    /// Value for curl's `range` option (no `bytes=` prefix).
    pub fn curl_range(&self) -> String {
        format!("{}-{}", self.start, self.end)
    }
}

/// Fixed-size chunking of `total` bytes. Parts are produced on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    /// A zero chunk size is treated as 1 so every part has a length.
    pub fn new(total: u64, chunk_size: u64) -> Self {
        Self {
            total,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// `ceil(total / chunk_size)`; 0 for an empty transfer.
    pub fn parts_count(&self) -> usize {
        self.total.div_ceil(self.chunk_size) as usize
    }

    /// Part at `index`, or None past the end.
    pub fn part(&self, index: usize) -> Option<Part> {
        let start = (index as u64).checked_mul(self.chunk_size)?;
        if start >= self.total {
            return None;
        }
        let end = (start + self.chunk_size).min(self.total) - 1;
        Some(Part { index, start, end })
    }

    /// Part containing byte `offset`, or None when the offset is past the end.
    pub fn part_at(&self, offset: u64) -> Option<Part> {
        self.part((offset / self.chunk_size) as usize)
    }

    /// Expected on-disk length of part `index` (0 when out of range).
    pub fn part_len(&self, index: usize) -> u64 {
        self.part(index).map(|p| p.len()).unwrap_or(0)
    }

    /// Lazily yields every part in ascending order.
    pub fn parts(&self) -> impl Iterator<Item = Part> + '_ {
        (0..self.parts_count()).filter_map(move |i| self.part(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partition(total: u64, chunk: u64) {
        let plan = ChunkPlan::new(total, chunk);
        let parts: Vec<Part> = plan.parts().collect();
        assert_eq!(parts.len(), plan.parts_count(), "total={total} chunk={chunk}");
        let mut next = 0u64;
        for (i, p) in parts.iter().enumerate() {
            assert_eq!(p.index, i);
            assert_eq!(p.start, next, "gap or overlap at part {i}");
            assert!(p.end >= p.start);
            assert!(p.len() <= chunk.max(1));
            assert_eq!(p.index as u64, p.start / chunk.max(1));
            next = p.end + 1;
        }
        assert_eq!(next, total);
    }

    #[test]
    fn parts_partition_the_range() {
        for total in [0u64, 1, 2, 7, 100, 1023, 1024, 1025, 10 * 1024 * 1024 + 3] {
            for chunk in [1u64, 3, 64, 1000, 1024, 1024 * 1024, 1 << 40] {
                assert_partition(total, chunk);
            }
        }
    }

    #[test]
    fn ten_megabytes_in_one_megabyte_chunks() {
        let plan = ChunkPlan::new(10 * 1024 * 1024, 1024 * 1024);
        assert_eq!(plan.parts_count(), 10);
        let last = plan.part(9).unwrap();
        assert_eq!(last.start, 9 * 1024 * 1024);
        assert_eq!(last.end, 10 * 1024 * 1024 - 1);
        assert!(plan.part(10).is_none());
    }

    #[test]
    fn final_part_holds_remainder() {
        let plan = ChunkPlan::new(2500, 1000);
        assert_eq!(plan.parts_count(), 3);
        assert_eq!(plan.part_len(0), 1000);
        assert_eq!(plan.part_len(2), 500);
        assert_eq!(plan.part_len(3), 0);
    }

    #[test]
    fn part_at_offset() {
        let plan = ChunkPlan::new(2500, 1000);
        assert_eq!(plan.part_at(0).unwrap().index, 0);
        assert_eq!(plan.part_at(1999).unwrap().index, 1);
        assert_eq!(plan.part_at(2000).unwrap().index, 2);
        assert!(plan.part_at(2500).is_none());
    }

    #[test]
    fn range_header_is_inclusive() {
        let p = Part { index: 0, start: 0, end: 99 };
        assert_eq!(p.range_header_value(), "bytes=0-99");
        assert_eq!(p.curl_range(), "0-99");
        assert_eq!(p.len(), 100);
        let single = Part { index: 42, start: 42, end: 42 };
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn zero_chunk_size_is_clamped() {
        let plan = ChunkPlan::new(3, 0);
        assert_eq!(plan.chunk_size(), 1);
        assert_eq!(plan.parts_count(), 3);
    }
}
