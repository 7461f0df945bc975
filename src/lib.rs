//! Per-student answer signals.
//!
//! Current implemented scope:
//! - ordering of answer events by `(student_id, timestamp)`
//! - student and streak-run segmentation
//! - running score, bounded-history score and signed streak columns
//! - CSV read/write of event tables

mod csv_table;
mod error;
mod events;
mod observability;
mod scores;
mod segment;
mod signals;

pub use csv_table::{read_events_csv, read_events_csv_path, write_scored_csv, write_scored_csv_path};
pub use error::ScoreError;
pub use events::{
    sort_events, DuplicateKeyPolicy, EventRow, EventTable, SortSummary, StudentId, Timestamp,
    CORRECT_COLUMN, STUDENT_ID_COLUMN, TIMESTAMP_COLUMN,
};
pub use observability::{
    init_logging, log_app_start, logging_config_from_env, LogFormat, LoggingConfig,
    LoggingInitError,
};
pub use scores::{contribution, forgetful_score, running_score, streak, WindowSum};
pub use segment::{
    entity_boundary, entity_segments, run_boundary, run_segments, segment_count, segment_ids,
    segment_ranges,
};
pub use signals::{
    assert_schema_compatible, build_signal_schema, forgetful_column_name, is_signal_column,
    score_events, scoring_config_from_env,
    ScoredTable, ScoringConfig, ScoringReport, SignalColumn, SignalColumnSpec, SignalKind,
    SignalSchema, RUNNING_SCORE_COLUMN, SIGNAL_SCHEMA_VERSION, STREAK_COLUMN,
};
