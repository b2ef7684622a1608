//! `sensorwatch watch`: print a machine's latest readings on a timer.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::warn;

use sensorwatch_core::{
    IngestSnapshot, Result, TelemetryQuery, TelemetrySource, evaluate, shutdown_channel,
};

use crate::{BufferArgs, SourceArgs};

pub struct WatchCommandConfig<'a> {
    pub config_path: Option<&'a Path>,
    pub source: &'a SourceArgs,
    pub buffer: &'a BufferArgs,
    pub machine: Option<&'a str>,
    pub limit: Option<usize>,
    pub refresh: Duration,
}

pub fn run(cmd: WatchCommandConfig<'_>) -> Result<()> {
    let config = super::load_config(cmd.config_path, cmd.buffer)?;
    let buffer = super::make_buffer(&config)?;
    let source = Arc::new(super::make_source(cmd.source, &config)?);
    let query = TelemetryQuery::new(Arc::clone(&buffer));

    let limit = cmd.limit.unwrap_or(config.alert.latest_limit).max(1);
    let threshold = config.alert.vibration_threshold;
    let refresh = cmd.refresh.max(Duration::from_millis(100));
    let machine = cmd.machine.map(str::to_string);

    let info = source.info();
    println!("Watching {} ({}) every {refresh:?}. Ctrl+C to stop.", info.endpoint, info.kind);

    let rt = super::runtime()?;
    rt.block_on(async move {
        let (stop, shutdown) = shutdown_channel();
        let adapter = super::spawn_source(&source, &buffer, shutdown);

        let ctrl_c = super::stop_on_ctrl_c(&stop);
        tokio::pin!(ctrl_c);
        let mut ticker = tokio::time::interval(refresh);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    render(&query, machine.as_deref(), limit, threshold, source.stats().snapshot());
                }
                _ = &mut ctrl_c => break,
            }
        }

        let _ = stop.send(true);
        if let Err(e) = adapter.await {
            warn!("adapter task failed: {e}");
        }
    });
    Ok(())
}

fn render(
    query: &TelemetryQuery,
    selected: Option<&str>,
    limit: usize,
    threshold: f64,
    stats: IngestSnapshot,
) {
    let machines = query.list_machines();
    println!();
    println!(
        "── {} machines · {} received · {} dropped · {} source errors",
        machines.len(),
        stats.received,
        stats.dropped_malformed,
        stats.source_errors
    );

    let Some(machine) = selected.or(machines.first().map(String::as_str)) else {
        println!("  Waiting for data...");
        return;
    };

    let latest = query.latest_readings(machine, limit);
    println!("  {machine}: {} latest readings", latest.len());
    super::print_readings(&latest);
    super::print_alert(&evaluate(&latest, threshold));
}
