use thiserror::Error;

use crate::events::{StudentId, Timestamp};

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("invalid scoring config: {0}")]
    InvalidConfig(String),
    #[error("required column '{0}' is missing from the input header")]
    MissingColumn(&'static str),
    #[error("row {row}: required field '{column}' is empty")]
    MissingField { row: usize, column: &'static str },
    #[error("row {row} (student {student_id}): correct must be 0 or 1, got '{value}'")]
    InvalidCorrect {
        row: usize,
        student_id: StudentId,
        value: String,
    },
    #[error("row {row}: column '{column}' mixes {expected} and {actual} values")]
    MixedColumnKinds {
        row: usize,
        column: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("row {row}: unparsable timestamp '{value}'")]
    InvalidTimestamp { row: usize, value: String },
    #[error("column '{column}' has {actual} rows, expected {expected}")]
    ColumnLengthMismatch {
        column: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error(
        "duplicate event key for student {student_id} at {timestamp} (rows {first_row} and {second_row})"
    )]
    DuplicateEventKey {
        student_id: StudentId,
        timestamp: Timestamp,
        first_row: usize,
        second_row: usize,
    },
    #[error("unable to allocate signal columns for {rows} rows")]
    Allocation { rows: usize },
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
    #[error("worker pool build error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
