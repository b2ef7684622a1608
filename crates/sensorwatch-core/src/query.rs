//! Machine-scoped read projections over the telemetry buffer.
//!
//! Every query takes one [`TelemetryBuffer::snapshot`] and reshapes the copy.
//! Nothing here mutates the buffer, and an unknown machine simply yields an
//! empty result.

use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::buffer::TelemetryBuffer;
use crate::record::TelemetryRecord;

/// Default row count for [`TelemetryQuery::latest_readings`].
pub const DEFAULT_LATEST_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// QueryResult
// ---------------------------------------------------------------------------

/// Caller-owned, ordered copy of buffer records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct QueryResult {
    records: Vec<TelemetryRecord>,
}

impl QueryResult {
    pub fn records(&self) -> &[TelemetryRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<TelemetryRecord> {
        self.records
    }
}

impl From<Vec<TelemetryRecord>> for QueryResult {
    fn from(records: Vec<TelemetryRecord>) -> Self {
        Self { records }
    }
}

impl Deref for QueryResult {
    type Target = [TelemetryRecord];

    fn deref(&self) -> &Self::Target {
        &self.records
    }
}

impl IntoIterator for QueryResult {
    type Item = TelemetryRecord;
    type IntoIter = std::vec::IntoIter<TelemetryRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = &'a TelemetryRecord;
    type IntoIter = std::slice::Iter<'a, TelemetryRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

// ---------------------------------------------------------------------------
// MachineSummary
// ---------------------------------------------------------------------------

/// Aggregate view of one machine's retained window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineSummary {
    pub machine_id: String,
    /// Records retained for this machine.
    pub count: usize,
    pub first_timestamp: DateTime<Utc>,
    pub last_timestamp: DateTime<Utc>,
    /// Most recent reading by timestamp.
    pub latest: TelemetryRecord,
    /// Min / mean / max vibration; `None` when no record carries vibration.
    pub vibration_min: Option<f64>,
    pub vibration_mean: Option<f64>,
    pub vibration_max: Option<f64>,
}

// ---------------------------------------------------------------------------
// TelemetryQuery
// ---------------------------------------------------------------------------

/// Read-only query service sharing the process-owned buffer.
#[derive(Clone)]
pub struct TelemetryQuery {
    buffer: Arc<TelemetryBuffer>,
}

impl TelemetryQuery {
    pub fn new(buffer: Arc<TelemetryBuffer>) -> Self {
        Self { buffer }
    }

    /// The buffer this service reads from.
    pub fn buffer(&self) -> &Arc<TelemetryBuffer> {
        &self.buffer
    }

    /// Sorted distinct machine IDs currently retained.
    pub fn list_machines(&self) -> Vec<String> {
        self.buffer.distinct_machine_ids().into_iter().collect()
    }

    /// Newest-first readings for one machine, at most `limit` rows.
    pub fn latest_readings(&self, machine_id: &str, limit: usize) -> QueryResult {
        let mut records = self.buffer.snapshot(Some(machine_id)).into_records();
        records.reverse();
        records.truncate(limit);
        QueryResult::from(records)
    }

    /// Oldest-first readings for one machine, untruncated (for charting).
    pub fn series_for(&self, machine_id: &str) -> QueryResult {
        self.buffer.snapshot(Some(machine_id))
    }

    /// Every retained record, oldest first.
    pub fn all_readings(&self) -> QueryResult {
        self.buffer.snapshot(None)
    }

    /// Aggregate one machine's window, or `None` if the machine is not retained.
    pub fn summarize(&self, machine_id: &str) -> Option<MachineSummary> {
        let series = self.series_for(machine_id).into_records();
        let first = series.first()?.timestamp;
        let latest = series.last()?.clone();

        let vibrations: Vec<f64> = series.iter().filter_map(|r| r.vibration).collect();
        let (vibration_min, vibration_mean, vibration_max) = if vibrations.is_empty() {
            (None, None, None)
        } else {
            let min = vibrations.iter().copied().fold(f64::INFINITY, f64::min);
            let max = vibrations.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = vibrations.iter().sum::<f64>() / vibrations.len() as f64;
            (Some(min), Some(mean), Some(max))
        };

        Some(MachineSummary {
            machine_id: machine_id.to_string(),
            count: series.len(),
            first_timestamp: first,
            last_timestamp: latest.timestamp,
            latest,
            vibration_min,
            vibration_mean,
            vibration_max,
        })
    }
}
