//! # sensorwatch-core
//!
//! **Live machine telemetry, held in a bounded window.**
//!
//! `sensorwatch-core` ingests sensor readings (temperature, pressure,
//! vibration, rpm) from a push feed or a periodically re-fetched dataset, keeps
//! the most recent readings in a fixed-capacity buffer, and answers
//! machine-scoped queries, vibration alerts and exports over that window.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use chrono::Utc;
//! use sensorwatch_core::{TelemetryBuffer, TelemetryQuery, TelemetryRecord, alert};
//!
//! let buffer = Arc::new(TelemetryBuffer::new(1000).unwrap());
//! buffer.append(TelemetryRecord::new("MCH-001", Utc::now()).with_vibration(1.4));
//!
//! let query = TelemetryQuery::new(Arc::clone(&buffer));
//! let latest = query.latest_readings("MCH-001", 10);
//! let outcome = alert::evaluate(&latest, alert::DEFAULT_VIBRATION_THRESHOLD);
//! assert!(outcome.is_alert());
//! ```
//!
//! ## Architecture
//!
//! Source adapter → Buffer (bounded, FIFO by arrival) → Query → Alert / Export
//!
//! Both ingestion strategies implement [`TelemetrySource`]:
//! - **Push** ([`sources::PushAdapter`]): one record per feed message,
//!   reconnecting with backoff.
//! - **Pull** ([`sources::PullAdapter`]): the whole dataset is re-fetched on an
//!   interval and replaces the buffer contents when it changed.
//!
//! The [`TelemetryBuffer`] is owned by the process and shared by `Arc`; every
//! read is a consistent copy taken under its lock.

pub mod alert;
pub mod buffer;
pub mod config;
pub mod error;
pub mod export;
pub mod query;
pub mod record;
pub mod source;
pub mod sources;

pub use alert::{AlertOutcome, DEFAULT_VIBRATION_THRESHOLD, evaluate};
pub use buffer::{BufferStats, DEFAULT_CAPACITY, TelemetryBuffer};
pub use config::{MonitorConfig, format_duration, parse_duration};
pub use error::{Error, Result};
pub use export::{ExportFormat, export_filename, export_rows};
pub use query::{DEFAULT_LATEST_LIMIT, MachineSummary, QueryResult, TelemetryQuery};
pub use record::{RawReading, TelemetryRecord};
pub use source::{
    IngestSnapshot, IngestStats, ShutdownSignal, SourceInfo, SourceKind, TelemetrySource,
    shutdown_channel,
};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
