pub mod serve;
pub mod snapshot;
pub mod watch;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::watch::Sender;

use sensorwatch_core::sources::{Backoff, DatasetLocation, LineFeed, PullAdapter, PushAdapter};
use sensorwatch_core::{
    AlertOutcome, Error, IngestStats, MonitorConfig, QueryResult, Result, ShutdownSignal,
    SourceInfo, TelemetryBuffer, TelemetrySource,
};

use crate::{BufferArgs, SourceArgs};

/// clap value parser for duration flags.
pub fn parse_duration_arg(s: &str) -> std::result::Result<Duration, String> {
    sensorwatch_core::parse_duration(s).map_err(|e| e.to_string())
}

/// Load the config file (if any), apply flag overrides, validate.
pub fn load_config(path: Option<&Path>, overrides: &BufferArgs) -> Result<MonitorConfig> {
    let mut config = match path {
        Some(p) => MonitorConfig::load(p)?,
        None => MonitorConfig::default(),
    };
    if let Some(capacity) = overrides.capacity {
        config.buffer.capacity = capacity;
    }
    if let Some(interval) = overrides.interval {
        config.pull.interval = interval;
    }
    if let Some(threshold) = overrides.threshold {
        config.alert.vibration_threshold = threshold;
    }
    config.validate()?;
    Ok(config)
}

pub fn make_buffer(config: &MonitorConfig) -> Result<Arc<TelemetryBuffer>> {
    TelemetryBuffer::new(config.buffer.capacity).map(Arc::new)
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Runtime::new()?)
}

// ---------------------------------------------------------------------------
// Source selection
// ---------------------------------------------------------------------------

/// The adapter chosen on the command line.
pub enum Ingest {
    Push(PushAdapter<LineFeed>),
    Pull(PullAdapter),
}

/// Build the adapter named by `--feed` or `--dataset`.
pub fn make_source(args: &SourceArgs, config: &MonitorConfig) -> Result<Ingest> {
    match (&args.feed, &args.dataset) {
        (Some(addr), None) => Ok(Ingest::Push(PushAdapter::new(
            LineFeed::new(addr.clone()),
            Backoff::from(&config.push),
        ))),
        (None, Some(location)) => Ok(Ingest::Pull(PullAdapter::new(
            DatasetLocation::parse(location),
            config.pull.interval,
        )?)),
        _ => Err(Error::Config(
            "exactly one of --feed or --dataset is required".into(),
        )),
    }
}

impl TelemetrySource for Ingest {
    fn info(&self) -> SourceInfo {
        match self {
            Self::Push(a) => a.info(),
            Self::Pull(a) => a.info(),
        }
    }

    fn stats(&self) -> &Arc<IngestStats> {
        match self {
            Self::Push(a) => a.stats(),
            Self::Pull(a) => a.stats(),
        }
    }

    async fn run(&self, buffer: Arc<TelemetryBuffer>, shutdown: ShutdownSignal) {
        match self {
            Self::Push(a) => a.run(buffer, shutdown).await,
            Self::Pull(a) => a.run(buffer, shutdown).await,
        }
    }
}

/// Run `source` on the runtime until `shutdown` fires.
pub fn spawn_source(
    source: &Arc<Ingest>,
    buffer: &Arc<TelemetryBuffer>,
    shutdown: ShutdownSignal,
) -> tokio::task::JoinHandle<()> {
    let source = Arc::clone(source);
    let buffer = Arc::clone(buffer);
    tokio::spawn(async move { source.run(buffer, shutdown).await })
}

/// Resolve on Ctrl+C and raise the shutdown flag.
pub async fn stop_on_ctrl_c(stop: &Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Ctrl+C received, shutting down");
    let _ = stop.send(true);
}

// ---------------------------------------------------------------------------
// Printing
// ---------------------------------------------------------------------------

fn cell(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
}

/// Print readings as a fixed-width table.
pub fn print_readings(readings: &QueryResult) {
    println!(
        "  {:<23} {:>11} {:>9} {:>10} {:>6}",
        "timestamp", "temperature", "pressure", "vibration", "rpm"
    );
    println!("  {}", "─".repeat(63));
    for r in readings {
        println!(
            "  {:<23} {:>11} {:>9} {:>10} {:>6}",
            sensorwatch_core::record::format_timestamp(&r.timestamp),
            cell(r.temperature),
            cell(r.pressure),
            cell(r.vibration),
            r.rpm.map_or_else(|| "-".to_string(), |v| v.to_string()),
        );
    }
}

pub fn print_alert(outcome: &AlertOutcome) {
    if outcome.is_alert() {
        println!("  ⚠ {}", outcome.message);
    } else {
        println!("  ✓ {}", outcome.message);
    }
}
