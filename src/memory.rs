//! Intermediate-buffer planner: packs transient tensors into one flat arena
//! so that tensors with overlapping live ranges never alias.
//!
//! The primary strategy is the memory offset calculation used by the TFLite
//! runtime (greedy-by-size assignment); the naive no-sharing layout is kept as
//! a baseline and the smaller arena wins.

use serde::Serialize;

/// Live range and size of one transient tensor. `first_op`/`last_op` are
/// operator-call indices; sizes and offsets are in elements.
#[derive(Debug, Clone, Serialize)]
pub struct TensorUsageRecord {
    pub first_op: usize,
    pub last_op: usize,
    pub size: usize,
}

impl TensorUsageRecord {
    pub fn overlaps(&self, other: &TensorUsageRecord) -> bool {
        !(self.last_op < other.first_op || self.first_op > other.last_op)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Layout {
    /// Arena size in elements.
    pub total: usize,
    /// Offset of each record, parallel to the input slice.
    pub offsets: Vec<usize>,
}

/// Offsets in appearance order, no sharing.
pub fn naive(records: &[TensorUsageRecord]) -> Layout {
    let mut offsets = Vec::with_capacity(records.len());
    let mut total = 0usize;
    for record in records {
        offsets.push(total);
        total += record.size;
    }
    Layout { total, offsets }
}

/// Greedy-by-size assignment: place tensors in decreasing size order, each
/// into the smallest offset gap left by already-placed overlapping tensors,
/// first-fit on ties.
pub fn greedy_by_size(records: &[TensorUsageRecord]) -> Layout {
    let mut order: Vec<usize> = (0..records.len()).collect();
    // decreasing size, stable on ties
    order.sort_by(|&a, &b| records[b].size.cmp(&records[a].size).then(a.cmp(&b)));

    let mut offsets = vec![0usize; records.len()];
    let mut total = 0usize;
    // already-placed record indices, kept ordered by offset
    let mut ordered_allocs: Vec<usize> = Vec::new();

    for &ti in &order {
        let t = &records[ti];
        let mut prev_end = 0usize;
        let mut best_offset: Option<usize> = None;
        let mut smallest_gap = usize::MAX;

        for &pi in &ordered_allocs {
            let placed = &records[pi];
            if !placed.overlaps(t) {
                continue;
            }
            let cur_offset = offsets[pi];
            if cur_offset >= prev_end {
                let gap = cur_offset - prev_end;
                if gap >= t.size && gap < smallest_gap {
                    smallest_gap = gap;
                    best_offset = Some(prev_end);
                }
            }
            prev_end = prev_end.max(cur_offset + placed.size);
        }

        let chosen = best_offset.unwrap_or(prev_end);
        offsets[ti] = chosen;
        total = total.max(chosen + t.size);

        ordered_allocs.push(ti);
        ordered_allocs.sort_by_key(|&i| offsets[i]);
    }

    Layout { total, offsets }
}

/// Computes every strategy and returns the one with the smallest arena.
pub fn best_layout(records: &[TensorUsageRecord]) -> Layout {
    let candidates = [greedy_by_size(records), naive(records)];
    candidates
        .into_iter()
        .min_by_key(|l| l.total)
        .unwrap_or(Layout {
            total: 0,
            offsets: Vec::new(),
        })
}
