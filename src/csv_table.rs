//! CSV boundary for event tables.
//!
//! Reading accepts any column order; `student_id`, `timestamp` and `correct`
//! are required, signal columns from an earlier run are dropped, and every
//! other column is carried through untouched. Writing emits the required
//! columns, then the pass-through columns, then the signal columns.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use tracing::{debug, info};

use crate::error::ScoreError;
use crate::events::{
    EventTable, StudentId, Timestamp, CORRECT_COLUMN, STUDENT_ID_COLUMN, TIMESTAMP_COLUMN,
};
use crate::signals::{is_signal_column, ScoredTable};

const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

struct HeaderLayout {
    student_id: usize,
    timestamp: usize,
    correct: usize,
    extra: Vec<(usize, String)>,
    dropped_signal_columns: usize,
}

pub fn read_events_csv_path(path: &Path) -> Result<EventTable, ScoreError> {
    debug!(
        component = "csv_table",
        event = "csv.read.open",
        path = %path.display()
    );
    let file = File::open(path)?;
    read_events_csv(BufReader::new(file))
}

pub fn read_events_csv<R: Read>(reader: R) -> Result<EventTable, ScoreError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(reader);
    let layout = header_layout(reader.headers()?)?;

    let mut raw_student_ids = Vec::new();
    let mut timestamps = Vec::new();
    let mut correct = Vec::new();
    let mut extra_values = Vec::new();

    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let raw_student_id = required_field(&record, layout.student_id, row, STUDENT_ID_COLUMN)?;
        let timestamp = parse_timestamp(
            required_field(&record, layout.timestamp, row, TIMESTAMP_COLUMN)?,
            row,
        )?;
        let raw_correct = required_field(&record, layout.correct, row, CORRECT_COLUMN)?;
        let Some(flag) = parse_correct(raw_correct) else {
            return Err(ScoreError::InvalidCorrect {
                row,
                student_id: parse_student_id(raw_student_id),
                value: raw_correct.to_string(),
            });
        };

        if !layout.extra.is_empty() {
            extra_values.push(
                layout
                    .extra
                    .iter()
                    .map(|(idx, _)| record.get(*idx).unwrap_or_default().to_string())
                    .collect::<Vec<String>>(),
            );
        }
        raw_student_ids.push(raw_student_id.to_string());
        timestamps.push(timestamp);
        correct.push(flag);
    }

    let rows = raw_student_ids.len();
    let student_ids = student_id_column(raw_student_ids);
    let mut table = EventTable::from_columns(student_ids, timestamps, correct)?;
    if !layout.extra.is_empty() {
        let headers = layout.extra.into_iter().map(|(_, name)| name).collect();
        table = table.with_extra_columns(headers, extra_values)?;
    }

    info!(
        component = "csv_table",
        event = "csv.read.finish",
        rows = rows,
        student_id_kind = table.student_ids().first().map_or("empty", StudentId::kind),
        extra_columns = table.extra_headers().len(),
        dropped_signal_columns = layout.dropped_signal_columns
    );

    Ok(table)
}

pub fn write_scored_csv_path(path: &Path, scored: &ScoredTable) -> Result<(), ScoreError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_scored_csv(&mut writer, scored)?;
    writer.flush()?;
    Ok(())
}

pub fn write_scored_csv<W: Write>(writer: W, scored: &ScoredTable) -> Result<(), ScoreError> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(writer);
    let events = scored.events();

    let mut header = vec![
        STUDENT_ID_COLUMN.to_string(),
        TIMESTAMP_COLUMN.to_string(),
        CORRECT_COLUMN.to_string(),
    ];
    header.extend(events.extra_headers().iter().cloned());
    header.extend(scored.columns().iter().map(|column| column.name.clone()));
    writer.write_record(&header)?;

    let mut record = Vec::with_capacity(header.len());
    for row in 0..events.len() {
        record.clear();
        record.push(events.student_ids()[row].to_string());
        record.push(events.timestamps()[row].to_string());
        record.push(u8::from(events.correct()[row]).to_string());
        record.extend(events.extra_row(row).iter().cloned());
        for column in scored.columns() {
            record.push(column.values[row].to_string());
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;

    info!(
        component = "csv_table",
        event = "csv.write.finish",
        rows = events.len(),
        columns = header.len()
    );

    Ok(())
}

fn header_layout(headers: &StringRecord) -> Result<HeaderLayout, ScoreError> {
    let position = |name: &'static str| {
        headers
            .iter()
            .position(|header| header == name)
            .ok_or(ScoreError::MissingColumn(name))
    };
    let student_id = position(STUDENT_ID_COLUMN)?;
    let timestamp = position(TIMESTAMP_COLUMN)?;
    let correct = position(CORRECT_COLUMN)?;
    let mut extra = Vec::new();
    let mut dropped_signal_columns = 0;
    for (idx, name) in headers.iter().enumerate() {
        if idx == student_id || idx == timestamp || idx == correct {
            continue;
        }
        // Derived columns from an earlier run are recomputed, never carried.
        if is_signal_column(name) {
            dropped_signal_columns += 1;
            continue;
        }
        extra.push((idx, name.to_string()));
    }

    Ok(HeaderLayout {
        student_id,
        timestamp,
        correct,
        extra,
        dropped_signal_columns,
    })
}

fn required_field<'r>(
    record: &'r StringRecord,
    idx: usize,
    row: usize,
    column: &'static str,
) -> Result<&'r str, ScoreError> {
    match record.get(idx) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ScoreError::MissingField { row, column }),
    }
}

/// The whole column is numeric only when every id is a canonical integer;
/// otherwise every id stays text, so `007` and `7` remain distinct students.
fn student_id_column(raw: Vec<String>) -> Vec<StudentId> {
    if raw.iter().all(|id| canonical_integer(id).is_some()) {
        raw.iter()
            .filter_map(|id| canonical_integer(id))
            .map(StudentId::Numeric)
            .collect()
    } else {
        raw.into_iter().map(StudentId::Text).collect()
    }
}

fn parse_student_id(raw: &str) -> StudentId {
    canonical_integer(raw)
        .map(StudentId::Numeric)
        .unwrap_or_else(|| StudentId::Text(raw.to_string()))
}

fn canonical_integer(raw: &str) -> Option<i64> {
    let value = raw.parse::<i64>().ok()?;
    (value.to_string() == raw).then_some(value)
}

/// Integers are taken as-is; RFC 3339 values are normalized to naive UTC.
fn parse_timestamp(raw: &str, row: usize) -> Result<Timestamp, ScoreError> {
    if let Ok(epoch) = raw.parse::<i64>() {
        return Ok(Timestamp::Epoch(epoch));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Timestamp::DateTime(dt.naive_utc()));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(Timestamp::DateTime(dt));
        }
    }
    Err(ScoreError::InvalidTimestamp {
        row,
        value: raw.to_string(),
    })
}

fn parse_correct(raw: &str) -> Option<u8> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" => Some(1),
        "0" | "false" => Some(0),
        _ => None,
    }
}
