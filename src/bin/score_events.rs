use std::path::PathBuf;

use ben_score::{
    init_logging, log_app_start, logging_config_from_env, read_events_csv_path, score_events,
    scoring_config_from_env, write_scored_csv_path,
};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;

    let input_path = std::env::var("BEN_INPUT_PATH")
        .map(PathBuf::from)
        .map_err(|_| "BEN_INPUT_PATH must point at an events CSV file")?;
    let output_path = std::env::var("BEN_OUTPUT_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| input_path.with_extension("scored.csv"));
    let cfg = scoring_config_from_env()?;
    log_app_start(&input_path, &output_path, &cfg);

    let events = read_events_csv_path(&input_path)?;
    let (schema, scored, report) = score_events(events, &cfg)?;
    write_scored_csv_path(&output_path, &scored)?;

    let summary = json!({
        "input_path": input_path.display().to_string(),
        "output_path": output_path.display().to_string(),
        "schema_version": schema.version,
        "schema_fingerprint": schema.fingerprint,
        "columns": schema.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        "report": report,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
