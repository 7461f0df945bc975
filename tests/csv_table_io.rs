use std::fs;
use std::io::Cursor;

use ben_score::{
    read_events_csv, read_events_csv_path, score_events, write_scored_csv, write_scored_csv_path,
    ScoreError, ScoringConfig, StudentId, Timestamp, STUDENT_ID_COLUMN, TIMESTAMP_COLUMN,
};
use tempfile::tempdir;

fn config(histories: Vec<usize>) -> ScoringConfig {
    ScoringConfig {
        histories,
        ..ScoringConfig::default()
    }
}

#[test]
fn scored_csv_keeps_pass_through_columns_and_appends_signals() {
    let input = "\
question_id,correct,student_id,timestamp
q3,0,7,30
q1,1,7,10
q9,1,3,5
q2,1,7,20
";
    let table = read_events_csv(Cursor::new(input)).expect("read csv");
    assert_eq!(table.len(), 4);
    assert_eq!(table.extra_headers(), ["question_id".to_string()]);

    let (_schema, scored, _report) = score_events(table, &config(vec![2])).expect("score");

    let mut out = Vec::new();
    write_scored_csv(&mut out, &scored).expect("write csv");
    let text = String::from_utf8(out).expect("utf8 output");

    let expected = "\
student_id,timestamp,correct,question_id,student_ben_score,forgetful_ben_score=2,student_streak
3,5,1,q9,1,1,1
7,10,1,q1,1,1,1
7,20,1,q2,2,2,2
7,30,0,q3,1,0,-1
";
    assert_eq!(text, expected);
}

#[test]
fn datetime_timestamps_round_trip_through_files() {
    let dir = tempdir().expect("temp dir");
    let input_path = dir.path().join("events.csv");
    let output_path = dir.path().join("events.scored.csv");
    fs::write(
        &input_path,
        "student_id,timestamp,correct\n\
         s1,2024-03-01 12:00:02,false\n\
         s1,2024-03-01T12:00:01,true\n\
         s2,2024-03-01T11:00:00Z,1\n",
    )
    .expect("write input");

    let table = read_events_csv_path(&input_path).expect("read csv");
    assert_eq!(table.student_ids()[0], StudentId::Text("s1".to_string()));
    assert!(matches!(table.timestamps()[0], Timestamp::DateTime(_)));

    let cfg = ScoringConfig {
        include_streak: false,
        ..config(vec![1])
    };
    let (_schema, scored, _report) = score_events(table, &cfg).expect("score");
    write_scored_csv_path(&output_path, &scored).expect("write output");

    let text = fs::read_to_string(&output_path).expect("read output");
    let expected = "\
student_id,timestamp,correct,student_ben_score,forgetful_ben_score=1
s1,2024-03-01 12:00:01,1,1,1
s1,2024-03-01 12:00:02,0,0,-1
s2,2024-03-01 11:00:00,1,1,1
";
    assert_eq!(text, expected);
}

#[test]
fn missing_required_column_is_a_schema_error() {
    let err = read_events_csv(Cursor::new("student_id,correct\n1,1\n"))
        .expect_err("timestamp column is required");
    assert!(matches!(err, ScoreError::MissingColumn("timestamp")));
}

#[test]
fn empty_required_field_names_row_and_column() {
    let err = read_events_csv(Cursor::new(
        "student_id,timestamp,correct\n1,1,1\n,2,0\n",
    ))
    .expect_err("empty student id");
    match err {
        ScoreError::MissingField { row, column } => {
            assert_eq!(row, 1);
            assert_eq!(column, STUDENT_ID_COLUMN);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn invalid_correct_value_names_row_and_student() {
    let err = read_events_csv(Cursor::new(
        "student_id,timestamp,correct\n1,1,1\n9,2,yes\n",
    ))
    .expect_err("non-binary correct");
    match err {
        ScoreError::InvalidCorrect {
            row,
            student_id,
            value,
        } => {
            assert_eq!(row, 1);
            assert_eq!(student_id, StudentId::Numeric(9));
            assert_eq!(value, "yes");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn mixed_timestamp_kinds_are_rejected() {
    let err = read_events_csv(Cursor::new(
        "student_id,timestamp,correct\n1,1700000000,1\n1,2024-03-01 12:00:00,0\n",
    ))
    .expect_err("mixed timestamp kinds");
    match err {
        ScoreError::MixedColumnKinds { row, column, .. } => {
            assert_eq!(row, 1);
            assert_eq!(column, TIMESTAMP_COLUMN);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn zero_padded_ids_stay_distinct_students() {
    let table = read_events_csv(Cursor::new(
        "student_id,timestamp,correct\n007,1,1\n7,2,1\n",
    ))
    .expect("read csv");
    assert_eq!(table.student_ids()[0], StudentId::Text("007".to_string()));

    let (_schema, scored, report) = score_events(table, &config(vec![2])).expect("score");
    assert_eq!(report.entity_count, 2);

    let mut out = Vec::new();
    write_scored_csv(&mut out, &scored).expect("write csv");
    let expected = "\
student_id,timestamp,correct,student_ben_score,forgetful_ben_score=2,student_streak
007,1,1,1,1,1
7,2,1,1,1,1
";
    assert_eq!(String::from_utf8(out).expect("utf8 output"), expected);
}

#[test]
fn text_id_column_accepts_digit_only_ids() {
    let table = read_events_csv(Cursor::new(
        "student_id,timestamp,correct\nabc,1,1\n123,2,0\n",
    ))
    .expect("digit-only ids in a text column are text");
    assert_eq!(
        table.student_ids(),
        [
            StudentId::Text("abc".to_string()),
            StudentId::Text("123".to_string())
        ]
    );
}

#[test]
fn rescoring_a_scored_file_replaces_signal_columns() {
    let dir = tempdir().expect("temp dir");
    let input_path = dir.path().join("events.csv");
    let first_path = dir.path().join("events.scored.csv");
    let second_path = dir.path().join("events.rescored.csv");
    fs::write(
        &input_path,
        "student_id,timestamp,correct,question_id\n2,1,0,q1\n1,1,1,q2\n1,2,1,q3\n",
    )
    .expect("write input");

    let cfg = config(vec![2]);
    let (_schema, first, _report) =
        score_events(read_events_csv_path(&input_path).expect("read input"), &cfg)
            .expect("first pass");
    write_scored_csv_path(&first_path, &first).expect("write first pass");

    let reread = read_events_csv_path(&first_path).expect("read scored file");
    assert_eq!(reread.extra_headers(), ["question_id".to_string()]);
    let (_schema, second, _report) = score_events(reread, &cfg).expect("second pass");
    write_scored_csv_path(&second_path, &second).expect("write second pass");

    let first_text = fs::read_to_string(&first_path).expect("read first output");
    let second_text = fs::read_to_string(&second_path).expect("read second output");
    assert_eq!(first_text, second_text);

    let header: Vec<&str> = second_text
        .lines()
        .next()
        .expect("header line")
        .split(',')
        .collect();
    let mut unique = header.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), header.len());
}
