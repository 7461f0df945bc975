//! Segmented running-state scorers.
//!
//! Each scorer is a single forward pass over `correct` that resets its state
//! whenever the segment id changes. The first row of a slice always starts a
//! fresh segment, so any slice cut on a segment boundary can be scored alone.

use std::collections::VecDeque;

use crate::error::ScoreError;

pub fn contribution(correct: bool) -> i64 {
    if correct {
        1
    } else {
        -1
    }
}

/// Cumulative sum of ±1 contributions within each segment.
pub fn running_score(correct: &[bool], segment_ids: &[usize], out: &mut [i64]) {
    let mut total = 0i64;
    for (row, &hit) in correct.iter().enumerate() {
        if starts_segment(segment_ids, row) {
            total = 0;
        }
        total += contribution(hit);
        out[row] = total;
    }
}

/// Sum of the last `min(history, position)` contributions within each
/// segment.
pub fn forgetful_score(
    correct: &[bool],
    segment_ids: &[usize],
    history: usize,
    out: &mut [i64],
) -> Result<(), ScoreError> {
    let mut window = WindowSum::new(history)?;
    for (row, &hit) in correct.iter().enumerate() {
        if starts_segment(segment_ids, row) {
            window.reset();
        }
        out[row] = window.push(contribution(hit));
    }
    Ok(())
}

/// Signed length of the current run: `+n` for the n-th consecutive hit,
/// `-n` for the n-th consecutive miss. `run_ids` must break on outcome
/// changes as well as student changes.
pub fn streak(correct: &[bool], run_ids: &[usize], out: &mut [i64]) {
    let mut position = 0i64;
    for (row, &hit) in correct.iter().enumerate() {
        if starts_segment(run_ids, row) {
            position = 0;
        }
        position += 1;
        out[row] = if hit { position } else { -position };
    }
}

fn starts_segment(segment_ids: &[usize], row: usize) -> bool {
    row == 0 || segment_ids[row] != segment_ids[row - 1]
}

/// Fixed-capacity trailing window with a running sum.
#[derive(Debug, Clone)]
pub struct WindowSum {
    values: VecDeque<i64>,
    capacity: usize,
    sum: i64,
}

impl WindowSum {
    pub fn new(capacity: usize) -> Result<Self, ScoreError> {
        if capacity == 0 {
            return Err(ScoreError::InvalidConfig(
                "history must be > 0".to_string(),
            ));
        }
        Ok(Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
            sum: 0,
        })
    }

    pub fn reset(&mut self) {
        self.values.clear();
        self.sum = 0;
    }

    /// Adds `value`, evicting the oldest entry once full, and returns the new
    /// sum.
    pub fn push(&mut self, value: i64) -> i64 {
        if self.values.len() == self.capacity {
            if let Some(oldest) = self.values.pop_front() {
                self.sum -= oldest;
            }
        }
        self.values.push_back(value);
        self.sum += value;
        self.sum
    }

    pub fn sum(&self) -> i64 {
        self.sum
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
