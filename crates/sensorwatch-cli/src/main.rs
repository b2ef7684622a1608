//! CLI for sensorwatch: live machine telemetry from a feed or a dataset.

mod commands;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use commands::parse_duration_arg;

#[derive(Parser)]
#[command(name = "sensorwatch")]
#[command(about = "sensorwatch: live machine telemetry, alerts and exports")]
#[command(version = sensorwatch_core::VERSION)]
struct Cli {
    /// TOML config file (flags override its values)
    #[arg(long, global = true, env = "SENSORWATCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Where readings come from. Exactly one is required.
#[derive(Args, Clone)]
#[group(required = true, multiple = false)]
pub struct SourceArgs {
    /// Push feed: newline-delimited JSON over TCP (HOST:PORT)
    #[arg(long)]
    feed: Option<String>,

    /// Pull dataset: CSV at an http(s) URL or a local path
    #[arg(long)]
    dataset: Option<String>,
}

/// Overrides shared by every command that owns a buffer.
#[derive(Args, Clone, Default)]
pub struct BufferArgs {
    /// Records retained across all machines
    #[arg(long)]
    capacity: Option<usize>,

    /// Dataset poll interval (e.g. "3s", "500ms")
    #[arg(long, value_parser = parse_duration_arg)]
    interval: Option<Duration>,

    /// Vibration alert threshold in mm/s
    #[arg(long)]
    threshold: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest from one source and serve the HTTP query API until Ctrl+C
    Serve {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        buffer: BufferArgs,

        /// Bind address
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },

    /// Ingest from one source and print a machine's latest readings periodically
    Watch {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        buffer: BufferArgs,

        /// Machine to show (default: first machine seen)
        #[arg(long)]
        machine: Option<String>,

        /// Rows shown per refresh
        #[arg(long)]
        limit: Option<usize>,

        /// Refresh period (e.g. "2s")
        #[arg(long, default_value = "2s", value_parser = parse_duration_arg)]
        refresh: Duration,
    },

    /// Pull a dataset once, print machines, latest readings and alert
    Snapshot {
        /// CSV at an http(s) URL or a local path
        #[arg(long)]
        dataset: String,

        #[command(flatten)]
        buffer: BufferArgs,

        /// Machine to show (default: first machine)
        #[arg(long)]
        machine: Option<String>,

        /// Rows shown
        #[arg(long)]
        limit: Option<usize>,

        /// Write the machine's readings (or all readings) to this file
        #[arg(long)]
        export: Option<PathBuf>,

        /// Export format
        #[arg(long, default_value = "csv", value_parser = ["csv", "arrow"])]
        format: String,

        /// Print the summary as JSON instead of tables
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Serve {
            source,
            buffer,
            host,
            port,
        } => commands::serve::run(commands::serve::ServeCommandConfig {
            config_path,
            source: &source,
            buffer: &buffer,
            host: host.as_deref(),
            port,
        }),
        Commands::Watch {
            source,
            buffer,
            machine,
            limit,
            refresh,
        } => commands::watch::run(commands::watch::WatchCommandConfig {
            config_path,
            source: &source,
            buffer: &buffer,
            machine: machine.as_deref(),
            limit,
            refresh,
        }),
        Commands::Snapshot {
            dataset,
            buffer,
            machine,
            limit,
            export,
            format,
            json,
        } => commands::snapshot::run(commands::snapshot::SnapshotCommandConfig {
            config_path,
            dataset: &dataset,
            buffer: &buffer,
            machine: machine.as_deref(),
            limit,
            export_path: export.as_deref(),
            format: &format,
            json,
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
