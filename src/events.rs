//! Answer-event data model and the ordering stage.
//!
//! An [`EventTable`] is column-oriented: one vector per required field plus
//! optional pass-through columns that ride along with their row. Tables are
//! validated on construction, so every downstream stage can assume `correct`
//! is boolean and that each key column holds a single kind of value.

use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::ScoreError;

pub const STUDENT_ID_COLUMN: &str = "student_id";
pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const CORRECT_COLUMN: &str = "correct";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StudentId {
    Numeric(i64),
    Text(String),
}

impl StudentId {
    pub fn kind(&self) -> &'static str {
        match self {
            StudentId::Numeric(_) => "numeric",
            StudentId::Text(_) => "text",
        }
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StudentId::Numeric(id) => write!(f, "{id}"),
            StudentId::Text(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timestamp {
    Epoch(i64),
    DateTime(NaiveDateTime),
}

impl Timestamp {
    pub fn kind(&self) -> &'static str {
        match self {
            Timestamp::Epoch(_) => "epoch",
            Timestamp::DateTime(_) => "datetime",
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Epoch(ts) => write!(f, "{ts}"),
            Timestamp::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRow {
    pub student_id: StudentId,
    pub timestamp: Timestamp,
    pub correct: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicateKeyPolicy {
    /// Equal `(student_id, timestamp)` keys keep their original relative order.
    Tolerate,
    /// Equal keys fail the whole operation.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSummary {
    pub already_sorted: bool,
    pub duplicate_keys: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventTable {
    student_id: Vec<StudentId>,
    timestamp: Vec<Timestamp>,
    correct: Vec<bool>,
    extra_headers: Vec<String>,
    extra_values: Vec<Vec<String>>,
}

impl EventTable {
    pub fn from_columns(
        student_id: Vec<StudentId>,
        timestamp: Vec<Timestamp>,
        correct: Vec<u8>,
    ) -> Result<Self, ScoreError> {
        let rows = student_id.len();
        check_len(TIMESTAMP_COLUMN, rows, timestamp.len())?;
        check_len(CORRECT_COLUMN, rows, correct.len())?;
        check_homogeneous(STUDENT_ID_COLUMN, student_id.iter().map(StudentId::kind))?;
        check_homogeneous(TIMESTAMP_COLUMN, timestamp.iter().map(Timestamp::kind))?;

        let mut flags = Vec::with_capacity(rows);
        for (row, value) in correct.into_iter().enumerate() {
            flags.push(correct_flag(row, &student_id[row], value)?);
        }

        Ok(Self {
            student_id,
            timestamp,
            correct: flags,
            extra_headers: Vec::new(),
            extra_values: Vec::new(),
        })
    }

    pub fn try_from_rows(rows: Vec<EventRow>) -> Result<Self, ScoreError> {
        let mut student_id = Vec::with_capacity(rows.len());
        let mut timestamp = Vec::with_capacity(rows.len());
        let mut correct = Vec::with_capacity(rows.len());
        for row in rows {
            student_id.push(row.student_id);
            timestamp.push(row.timestamp);
            correct.push(row.correct);
        }
        Self::from_columns(student_id, timestamp, correct)
    }

    /// Attaches pass-through columns. `values` is row-major and must line up
    /// with the existing rows.
    pub fn with_extra_columns(
        mut self,
        headers: Vec<String>,
        values: Vec<Vec<String>>,
    ) -> Result<Self, ScoreError> {
        check_len("extra columns", self.len(), values.len())?;
        for row in &values {
            check_len("extra column values", headers.len(), row.len())?;
        }
        self.extra_headers = headers;
        self.extra_values = values;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.student_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.student_id.is_empty()
    }

    pub fn student_ids(&self) -> &[StudentId] {
        &self.student_id
    }

    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamp
    }

    pub fn correct(&self) -> &[bool] {
        &self.correct
    }

    pub fn extra_headers(&self) -> &[String] {
        &self.extra_headers
    }

    pub fn extra_row(&self, row: usize) -> &[String] {
        self.extra_values
            .get(row)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn row(&self, row: usize) -> Option<EventRow> {
        Some(EventRow {
            student_id: self.student_id.get(row)?.clone(),
            timestamp: *self.timestamp.get(row)?,
            correct: u8::from(*self.correct.get(row)?),
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = EventRow> + '_ {
        (0..self.len()).filter_map(|row| self.row(row))
    }

    fn key_cmp(&self, a: usize, b: usize) -> Ordering {
        self.student_id[a]
            .cmp(&self.student_id[b])
            .then_with(|| self.timestamp[a].cmp(&self.timestamp[b]))
    }

    pub fn is_sorted(&self) -> bool {
        (1..self.len()).all(|row| self.key_cmp(row - 1, row) != Ordering::Greater)
    }

    fn permuted(self, order: &[usize]) -> Self {
        let extra_values = if self.extra_values.is_empty() {
            self.extra_values
        } else {
            permute(self.extra_values, order)
        };
        Self {
            student_id: permute(self.student_id, order),
            timestamp: permute(self.timestamp, order),
            correct: permute(self.correct, order),
            extra_headers: self.extra_headers,
            extra_values,
        }
    }
}

/// Orders the table by `(student_id, timestamp)`.
///
/// The sort is stable, so rows with equal keys keep their input order. Under
/// [`DuplicateKeyPolicy::Reject`] the first equal pair fails the call and is
/// reported with its input row indices.
pub fn sort_events(
    table: EventTable,
    policy: DuplicateKeyPolicy,
) -> Result<(EventTable, SortSummary), ScoreError> {
    let already_sorted = table.is_sorted();
    let mut order: Vec<usize> = (0..table.len()).collect();
    if !already_sorted {
        order.sort_by(|&a, &b| table.key_cmp(a, b));
    }

    let mut duplicate_keys = 0u64;
    for pair in order.windows(2) {
        if table.key_cmp(pair[0], pair[1]) != Ordering::Equal {
            continue;
        }
        if policy == DuplicateKeyPolicy::Reject {
            return Err(ScoreError::DuplicateEventKey {
                student_id: table.student_id[pair[0]].clone(),
                timestamp: table.timestamp[pair[0]],
                first_row: pair[0],
                second_row: pair[1],
            });
        }
        duplicate_keys += 1;
    }

    let summary = SortSummary {
        already_sorted,
        duplicate_keys,
    };
    if already_sorted {
        Ok((table, summary))
    } else {
        Ok((table.permuted(&order), summary))
    }
}

fn permute<T>(values: Vec<T>, order: &[usize]) -> Vec<T> {
    let mut slots: Vec<Option<T>> = values.into_iter().map(Some).collect();
    order
        .iter()
        .map(|&idx| slots[idx].take().expect("sort order is a permutation"))
        .collect()
}

fn correct_flag(row: usize, student_id: &StudentId, value: u8) -> Result<bool, ScoreError> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ScoreError::InvalidCorrect {
            row,
            student_id: student_id.clone(),
            value: other.to_string(),
        }),
    }
}

fn check_len(column: &'static str, expected: usize, actual: usize) -> Result<(), ScoreError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ScoreError::ColumnLengthMismatch {
            column,
            expected,
            actual,
        })
    }
}

fn check_homogeneous(
    column: &'static str,
    mut kinds: impl Iterator<Item = &'static str>,
) -> Result<(), ScoreError> {
    let Some(expected) = kinds.next() else {
        return Ok(());
    };
    for (offset, actual) in kinds.enumerate() {
        if actual != expected {
            return Err(ScoreError::MixedColumnKinds {
                row: offset + 1,
                column,
                expected,
                actual,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(student: i64, ts: i64, correct: u8) -> EventRow {
        EventRow {
            student_id: StudentId::Numeric(student),
            timestamp: Timestamp::Epoch(ts),
            correct,
        }
    }

    #[test]
    fn rejects_non_binary_correct_with_row_context() {
        let err = EventTable::try_from_rows(vec![row(1, 1, 1), row(7, 2, 2)])
            .expect_err("correct=2 must be rejected");
        match err {
            ScoreError::InvalidCorrect {
                row,
                student_id,
                value,
            } => {
                assert_eq!(row, 1);
                assert_eq!(student_id, StudentId::Numeric(7));
                assert_eq!(value, "2");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_mixed_student_id_kinds() {
        let err = EventTable::from_columns(
            vec![StudentId::Numeric(1), StudentId::Text("s2".to_string())],
            vec![Timestamp::Epoch(1), Timestamp::Epoch(2)],
            vec![1, 0],
        )
        .expect_err("mixed kinds must be rejected");
        assert!(matches!(
            err,
            ScoreError::MixedColumnKinds {
                row: 1,
                column: STUDENT_ID_COLUMN,
                ..
            }
        ));
    }

    #[test]
    fn rejects_column_length_mismatch() {
        let err = EventTable::from_columns(
            vec![StudentId::Numeric(1)],
            vec![Timestamp::Epoch(1), Timestamp::Epoch(2)],
            vec![1],
        )
        .expect_err("length mismatch must be rejected");
        assert!(matches!(err, ScoreError::ColumnLengthMismatch { .. }));
    }

    #[test]
    fn sort_is_stable_for_equal_keys() {
        let table = EventTable::try_from_rows(vec![
            row(2, 5, 1),
            row(1, 3, 1),
            row(1, 3, 0),
            row(1, 1, 1),
        ])
        .expect("valid table")
        .with_extra_columns(
            vec!["question".to_string()],
            vec![
                vec!["q0".to_string()],
                vec!["q1".to_string()],
                vec!["q2".to_string()],
                vec!["q3".to_string()],
            ],
        )
        .expect("extra columns line up");

        let (sorted, summary) =
            sort_events(table, DuplicateKeyPolicy::Tolerate).expect("tolerant sort");

        assert!(!summary.already_sorted);
        assert_eq!(summary.duplicate_keys, 1);
        let rows: Vec<EventRow> = sorted.rows().collect();
        assert_eq!(rows, vec![row(1, 1, 1), row(1, 3, 1), row(1, 3, 0), row(2, 5, 1)]);
        assert_eq!(sorted.extra_row(0), ["q3".to_string()]);
        assert_eq!(sorted.extra_row(1), ["q1".to_string()]);
        assert_eq!(sorted.extra_row(2), ["q2".to_string()]);
    }

    #[test]
    fn strict_policy_reports_original_rows_of_duplicate_key() {
        let table = EventTable::try_from_rows(vec![row(1, 9, 1), row(1, 4, 0), row(1, 9, 0)])
            .expect("valid table");

        let err = sort_events(table, DuplicateKeyPolicy::Reject).expect_err("duplicate key");
        match err {
            ScoreError::DuplicateEventKey {
                student_id,
                timestamp,
                first_row,
                second_row,
            } => {
                assert_eq!(student_id, StudentId::Numeric(1));
                assert_eq!(timestamp, Timestamp::Epoch(9));
                assert_eq!((first_row, second_row), (0, 2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn sorted_input_is_detected() {
        let table = EventTable::try_from_rows(vec![row(1, 1, 1), row(1, 2, 0), row(2, 1, 1)])
            .expect("valid table");
        let (sorted, summary) =
            sort_events(table.clone(), DuplicateKeyPolicy::Reject).expect("no duplicates");
        assert!(summary.already_sorted);
        assert_eq!(sorted, table);
    }
}
