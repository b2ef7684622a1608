//! `sensorwatch snapshot`: one dataset pull, printed and optionally exported.

use std::path::Path;

use sensorwatch_core::sources::{DatasetLocation, PollOutcome, PullAdapter};
use sensorwatch_core::{Error, ExportFormat, Result, TelemetryQuery, evaluate, export_rows};

use crate::BufferArgs;

pub struct SnapshotCommandConfig<'a> {
    pub config_path: Option<&'a Path>,
    pub dataset: &'a str,
    pub buffer: &'a BufferArgs,
    pub machine: Option<&'a str>,
    pub limit: Option<usize>,
    pub export_path: Option<&'a Path>,
    pub format: &'a str,
    pub json: bool,
}

pub fn run(cmd: SnapshotCommandConfig<'_>) -> Result<()> {
    let config = super::load_config(cmd.config_path, cmd.buffer)?;
    let format: ExportFormat = cmd.format.parse()?;
    let buffer = super::make_buffer(&config)?;
    let adapter = PullAdapter::new(DatasetLocation::parse(cmd.dataset), config.pull.interval)?;

    let rt = super::runtime()?;
    let outcome = rt.block_on(adapter.poll_once(&buffer))?;
    let (rows, rejected) = match outcome {
        PollOutcome::Reloaded { rows, rejected, .. } => (rows, rejected),
        PollOutcome::Unchanged => (0, 0),
    };

    let query = TelemetryQuery::new(buffer);
    let machines = query.list_machines();
    let limit = cmd.limit.unwrap_or(config.alert.latest_limit).max(1);
    let selected = cmd
        .machine
        .map(str::to_string)
        .or_else(|| machines.first().cloned());

    if let Some(id) = cmd.machine {
        if !machines.iter().any(|m| m == id) {
            return Err(Error::Config(format!(
                "machine {id} not in dataset (available: {})",
                machines.join(", ")
            )));
        }
    }

    let latest = selected
        .as_deref()
        .map(|id| query.latest_readings(id, limit))
        .unwrap_or_default();
    let alert = evaluate(&latest, config.alert.vibration_threshold);

    if cmd.json {
        let summary = serde_json::json!({
            "dataset": cmd.dataset,
            "rows": rows,
            "rejected": rejected,
            "retained": query.buffer().len(),
            "machines": machines,
            "machine": selected,
            "latest": latest,
            "alert": alert,
            "summary": selected.as_deref().and_then(|id| query.summarize(id)),
        });
        let text = serde_json::to_string_pretty(&summary)
            .map_err(|e| Error::ExportEncoding(e.to_string()))?;
        println!("{text}");
    } else {
        println!("Dataset: {}", cmd.dataset);
        println!(
            "  {rows} rows, {rejected} rejected, {} retained",
            query.buffer().len()
        );
        println!("  Machines: {}", machines.join(", "));
        match &selected {
            Some(id) => {
                println!();
                println!("  {id}: {} latest readings", latest.len());
                super::print_readings(&latest);
                super::print_alert(&alert);
            }
            None => println!("  No valid readings in dataset."),
        }
    }

    if let Some(path) = cmd.export_path {
        let rows = match cmd.machine {
            Some(id) => query.series_for(id),
            None => query.all_readings(),
        };
        let bytes = export_rows(&rows, format)?;
        std::fs::write(path, &bytes)?;
        eprintln!(
            "Exported {} rows ({format}) to {}",
            rows.len(),
            path.display()
        );
    }

    Ok(())
}
