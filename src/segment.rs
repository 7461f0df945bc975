//! Segment detection over an ordered event table.
//!
//! Both segmentations used by the scorers come from the same forward scan;
//! they differ only in the boundary predicate.

use std::ops::Range;

use crate::events::EventTable;

/// New segment whenever the student changes.
pub fn entity_boundary(table: &EventTable, prev: usize, curr: usize) -> bool {
    let ids = table.student_ids();
    ids[prev] != ids[curr]
}

/// New segment whenever the student or the outcome changes.
pub fn run_boundary(table: &EventTable, prev: usize, curr: usize) -> bool {
    entity_boundary(table, prev, curr) || table.correct()[prev] != table.correct()[curr]
}

/// Assigns a 0-based segment id to every row. The id increases by one at each
/// row where `boundary(prev, curr)` holds and is unchanged otherwise.
pub fn segment_ids<F>(table: &EventTable, boundary: F) -> Vec<usize>
where
    F: Fn(&EventTable, usize, usize) -> bool,
{
    let mut ids = Vec::with_capacity(table.len());
    let mut current = 0usize;
    for row in 0..table.len() {
        if row > 0 && boundary(table, row - 1, row) {
            current += 1;
        }
        ids.push(current);
    }
    ids
}

pub fn entity_segments(table: &EventTable) -> Vec<usize> {
    segment_ids(table, entity_boundary)
}

pub fn run_segments(table: &EventTable) -> Vec<usize> {
    segment_ids(table, run_boundary)
}

pub fn segment_count(ids: &[usize]) -> usize {
    ids.last().map_or(0, |last| last + 1)
}

/// Row ranges covered by each segment, in id order.
pub fn segment_ranges(ids: &[usize]) -> Vec<Range<usize>> {
    let mut ranges = Vec::with_capacity(segment_count(ids));
    let mut start = 0;
    for row in 1..=ids.len() {
        if row == ids.len() || ids[row] != ids[row - 1] {
            ranges.push(start..row);
            start = row;
        }
    }
    ranges
}
