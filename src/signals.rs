//! Answer events to per-student signal columns.

use std::collections::HashSet;
use std::env;
use std::ops::Range;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::ScoreError;
use crate::events::{sort_events, DuplicateKeyPolicy, EventTable};
use crate::observability::parse_bool;
use crate::scores::{forgetful_score, running_score, streak};
use crate::segment::{entity_segments, run_segments, segment_count, segment_ranges};

pub const SIGNAL_SCHEMA_VERSION: u32 = 1;
pub const RUNNING_SCORE_COLUMN: &str = "student_ben_score";
pub const STREAK_COLUMN: &str = "student_streak";

const MIN_BATCH_ROWS: usize = 4_096;
const BATCHES_PER_WORKER: usize = 4;

const FORGETFUL_COLUMN_PREFIX: &str = "forgetful_ben_score=";

pub fn forgetful_column_name(history: usize) -> String {
    format!("{FORGETFUL_COLUMN_PREFIX}{history}")
}

/// True for any header this crate writes as a signal column.
pub fn is_signal_column(name: &str) -> bool {
    name == RUNNING_SCORE_COLUMN
        || name == STREAK_COLUMN
        || name.starts_with(FORGETFUL_COLUMN_PREFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    RunningScore,
    ForgetfulScore { history: usize },
    Streak,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalColumnSpec {
    pub name: String,
    pub kind: SignalKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<SignalColumnSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalColumn {
    pub name: String,
    pub values: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub histories: Vec<usize>,
    pub include_running_score: bool,
    pub include_streak: bool,
    pub duplicate_policy: DuplicateKeyPolicy,
    pub worker_threads: usize,
    pub schema_version: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            histories: vec![5],
            include_running_score: true,
            include_streak: true,
            duplicate_policy: DuplicateKeyPolicy::Tolerate,
            worker_threads: 1,
            schema_version: SIGNAL_SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringReport {
    pub input_rows: u64,
    pub output_rows: u64,
    pub entity_count: u64,
    pub run_count: Option<u64>,
    pub already_sorted: bool,
    pub duplicate_keys: u64,
    pub batches: u64,
}

/// Sorted events plus the derived signal columns, row-aligned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredTable {
    events: EventTable,
    columns: Vec<SignalColumn>,
}

impl ScoredTable {
    pub fn events(&self) -> &EventTable {
        &self.events
    }

    pub fn columns(&self) -> &[SignalColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&[i64]> {
        self.columns
            .iter()
            .find(|column| column.name == name)
            .map(|column| column.values.as_slice())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drops the derived columns and hands back the ordered events.
    pub fn into_events(self) -> EventTable {
        self.events
    }
}

struct BatchTask<'a> {
    rows: Range<usize>,
    outputs: Vec<&'a mut [i64]>,
}

pub fn build_signal_schema(cfg: &ScoringConfig) -> SignalSchema {
    let mut columns = Vec::new();
    if cfg.include_running_score {
        columns.push(SignalColumnSpec {
            name: RUNNING_SCORE_COLUMN.to_string(),
            kind: SignalKind::RunningScore,
        });
    }
    for history in &cfg.histories {
        columns.push(SignalColumnSpec {
            name: forgetful_column_name(*history),
            kind: SignalKind::ForgetfulScore { history: *history },
        });
    }
    if cfg.include_streak {
        columns.push(SignalColumnSpec {
            name: STREAK_COLUMN.to_string(),
            kind: SignalKind::Streak,
        });
    }

    let fingerprint = schema_fingerprint(cfg.schema_version, &columns);

    info!(
        component = "signals",
        event = "signals.schema.built",
        version = cfg.schema_version,
        histories = ?cfg.histories,
        column_count = columns.len(),
        fingerprint = fingerprint
    );

    SignalSchema {
        version: cfg.schema_version,
        fingerprint,
        columns,
    }
}

/// Sorts `table` by `(student_id, timestamp)` and attaches every configured
/// signal column.
///
/// Fails before any scoring work on an invalid config, and before any column
/// is produced on a rejected duplicate key or a failed allocation.
pub fn score_events(
    table: EventTable,
    cfg: &ScoringConfig,
) -> Result<(SignalSchema, ScoredTable, ScoringReport), ScoreError> {
    validate_config(cfg)?;

    info!(
        component = "signals",
        event = "signals.score.start",
        input_rows = table.len(),
        histories = ?cfg.histories,
        include_running_score = cfg.include_running_score,
        include_streak = cfg.include_streak,
        duplicate_policy = ?cfg.duplicate_policy,
        worker_threads = cfg.worker_threads
    );

    let schema = build_signal_schema(cfg);
    let input_rows = table.len();

    let (events, sort_summary) = sort_events(table, cfg.duplicate_policy)?;
    info!(
        component = "signals",
        event = "signals.sort.finish",
        already_sorted = sort_summary.already_sorted,
        duplicate_keys = sort_summary.duplicate_keys
    );
    if sort_summary.duplicate_keys > 0 {
        warn!(
            component = "signals",
            event = "signals.duplicate_keys",
            duplicate_keys = sort_summary.duplicate_keys,
            resolution = "stable_input_order"
        );
    }

    let entity_ids = entity_segments(&events);
    let run_ids = if cfg.include_streak {
        run_segments(&events)
    } else {
        Vec::new()
    };
    let entity_count = segment_count(&entity_ids);
    let run_count = cfg.include_streak.then(|| segment_count(&run_ids) as u64);
    info!(
        component = "signals",
        event = "signals.segment.finish",
        entity_count = entity_count,
        run_count = ?run_count
    );

    let batches = plan_batches(&entity_ids, cfg.worker_threads);
    let kinds: Vec<SignalKind> = schema.columns.iter().map(|column| column.kind).collect();
    let mut buffers = Vec::with_capacity(kinds.len());
    for _ in &kinds {
        buffers.push(allocate_column(events.len())?);
    }

    {
        let tasks = split_outputs(&batches, &mut buffers);
        let correct = events.correct();
        let run = |task: BatchTask<'_>| {
            let rows = task.rows.clone();
            let run_slice = if run_ids.is_empty() {
                &run_ids[..]
            } else {
                &run_ids[rows.clone()]
            };
            score_batch(
                &correct[rows.clone()],
                &entity_ids[rows],
                run_slice,
                &kinds,
                task.outputs,
            )
        };

        if cfg.worker_threads > 1 && tasks.len() > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(cfg.worker_threads)
                .build()?;
            pool.install(|| tasks.into_par_iter().try_for_each(run))?;
        } else {
            tasks.into_iter().try_for_each(run)?;
        }
    }

    let columns: Vec<SignalColumn> = schema
        .columns
        .iter()
        .zip(buffers)
        .map(|(spec, values)| SignalColumn {
            name: spec.name.clone(),
            values,
        })
        .collect();

    let report = ScoringReport {
        input_rows: input_rows as u64,
        output_rows: events.len() as u64,
        entity_count: entity_count as u64,
        run_count,
        already_sorted: sort_summary.already_sorted,
        duplicate_keys: sort_summary.duplicate_keys,
        batches: batches.len() as u64,
    };

    info!(
        component = "signals",
        event = "signals.score.finish",
        input_rows = report.input_rows,
        output_rows = report.output_rows,
        entity_count = report.entity_count,
        column_count = columns.len(),
        batches = report.batches
    );

    Ok((schema, ScoredTable { events, columns }, report))
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &SignalSchema,
) -> Result<(), ScoreError> {
    if expected_version != actual.version {
        return Err(ScoreError::SchemaVersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(ScoreError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

/// Reads `BEN_HISTORIES`, `BEN_STRICT_ORDERING`, `BEN_WORKERS`,
/// `BEN_SKIP_RUNNING` and `BEN_SKIP_STREAK`.
///
/// Unrecognized flag values fall back to the defaults. An unparsable history
/// list is an error, since silently scoring a different window would change
/// the output columns.
pub fn scoring_config_from_env() -> Result<ScoringConfig, ScoreError> {
    let mut config = ScoringConfig::default();

    if let Ok(raw) = env::var("BEN_HISTORIES") {
        if !raw.trim().is_empty() {
            config.histories = parse_histories(&raw)?;
        }
    }

    if let Ok(raw) = env::var("BEN_STRICT_ORDERING") {
        if let Some(strict) = parse_bool(&raw) {
            config.duplicate_policy = if strict {
                DuplicateKeyPolicy::Reject
            } else {
                DuplicateKeyPolicy::Tolerate
            };
        }
    }

    if let Ok(raw) = env::var("BEN_WORKERS") {
        if let Ok(workers) = raw.trim().parse::<usize>() {
            config.worker_threads = workers;
        }
    }

    if let Ok(raw) = env::var("BEN_SKIP_RUNNING") {
        if let Some(skip) = parse_bool(&raw) {
            config.include_running_score = !skip;
        }
    }

    if let Ok(raw) = env::var("BEN_SKIP_STREAK") {
        if let Some(skip) = parse_bool(&raw) {
            config.include_streak = !skip;
        }
    }

    Ok(config)
}

fn parse_histories(raw: &str) -> Result<Vec<usize>, ScoreError> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            token.parse::<usize>().map_err(|_| {
                ScoreError::InvalidConfig(format!(
                    "history '{token}' is not a positive integer"
                ))
            })
        })
        .collect()
}

fn validate_config(cfg: &ScoringConfig) -> Result<(), ScoreError> {
    if cfg.schema_version != SIGNAL_SCHEMA_VERSION {
        return Err(ScoreError::InvalidConfig(format!(
            "schema_version must equal SIGNAL_SCHEMA_VERSION ({SIGNAL_SCHEMA_VERSION})"
        )));
    }

    if cfg.worker_threads == 0 {
        return Err(ScoreError::InvalidConfig(
            "worker_threads must be > 0".to_string(),
        ));
    }

    if !cfg.include_running_score && !cfg.include_streak && cfg.histories.is_empty() {
        return Err(ScoreError::InvalidConfig(
            "at least one signal column must be requested".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for history in &cfg.histories {
        if *history == 0 {
            return Err(ScoreError::InvalidConfig(
                "histories entries must be > 0".to_string(),
            ));
        }
        if !seen.insert(*history) {
            return Err(ScoreError::InvalidConfig(
                "histories entries must be unique".to_string(),
            ));
        }
    }

    Ok(())
}

/// Contiguous row batches that never split a student.
fn plan_batches(entity_ids: &[usize], worker_threads: usize) -> Vec<Range<usize>> {
    if entity_ids.is_empty() {
        return Vec::new();
    }
    if worker_threads <= 1 {
        return vec![0..entity_ids.len()];
    }

    let target = (entity_ids.len() / (worker_threads * BATCHES_PER_WORKER)).max(MIN_BATCH_ROWS);
    let mut batches = Vec::new();
    let mut start = 0;
    for segment in segment_ranges(entity_ids) {
        if segment.end - start >= target {
            batches.push(start..segment.end);
            start = segment.end;
        }
    }
    if start < entity_ids.len() {
        batches.push(start..entity_ids.len());
    }
    batches
}

fn split_outputs<'a>(batches: &[Range<usize>], buffers: &'a mut [Vec<i64>]) -> Vec<BatchTask<'a>> {
    let mut tasks: Vec<BatchTask<'a>> = batches
        .iter()
        .map(|rows| BatchTask {
            rows: rows.clone(),
            outputs: Vec::with_capacity(buffers.len()),
        })
        .collect();

    for buffer in buffers.iter_mut() {
        let mut rest: &'a mut [i64] = buffer.as_mut_slice();
        for task in &mut tasks {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(task.rows.len());
            task.outputs.push(head);
            rest = tail;
        }
    }

    tasks
}

fn score_batch(
    correct: &[bool],
    entity_ids: &[usize],
    run_ids: &[usize],
    kinds: &[SignalKind],
    outputs: Vec<&mut [i64]>,
) -> Result<(), ScoreError> {
    for (kind, out) in kinds.iter().zip(outputs) {
        match *kind {
            SignalKind::RunningScore => running_score(correct, entity_ids, out),
            SignalKind::ForgetfulScore { history } => {
                forgetful_score(correct, entity_ids, history, out)?
            }
            SignalKind::Streak => streak(correct, run_ids, out),
        }
    }
    Ok(())
}

fn allocate_column(rows: usize) -> Result<Vec<i64>, ScoreError> {
    let mut values = Vec::new();
    values
        .try_reserve_exact(rows)
        .map_err(|_| ScoreError::Allocation { rows })?;
    values.resize(rows, 0);
    Ok(values)
}

fn schema_fingerprint(version: u32, columns: &[SignalColumnSpec]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{version};"));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(":i64;");
    }
    hex::encode(hasher.finalize())
}
