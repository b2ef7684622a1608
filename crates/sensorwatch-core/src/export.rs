//! Row export for download.
//!
//! Turns an already-obtained [`QueryResult`] into bytes. Never reads the
//! buffer, so an export always reflects exactly the rows the caller queried.
//!
//! # Formats
//!
//! - `csv`: header `machine_id,timestamp,temperature,pressure,vibration,rpm`,
//!   one `\n`-terminated line per record, absent values as empty cells
//! - `arrow`: Arrow IPC file with the same columns, for spreadsheet and
//!   dataframe tools
//!
//! Both are deterministic: the same rows always produce the same bytes.

use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::ipc::writer::FileWriter;

use crate::error::{Error, Result};
use crate::query::QueryResult;
use crate::record::format_timestamp;

/// Column names in record field declaration order.
pub const COLUMNS: [&str; 6] = [
    "machine_id",
    "timestamp",
    "temperature",
    "pressure",
    "vibration",
    "rpm",
];

/// Supported export encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    /// Row-oriented text (CSV).
    Csv,
    /// Binary table (Arrow IPC file).
    ArrowIpc,
}

impl ExportFormat {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::ArrowIpc => "arrow",
        }
    }

    /// MIME type for HTTP responses.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv; charset=utf-8",
            Self::ArrowIpc => "application/vnd.apache.arrow.file",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" | "text" => Ok(Self::Csv),
            "arrow" | "ipc" | "binary" => Ok(Self::ArrowIpc),
            other => Err(Error::Config(format!(
                "unknown export format '{other}' (expected csv or arrow)"
            ))),
        }
    }
}

/// Serialize `result` in the requested format.
pub fn export_rows(result: &QueryResult, format: ExportFormat) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Csv => export_csv(result),
        ExportFormat::ArrowIpc => export_arrow(result),
    }
}

/// Download filename: `{machine}_data.{ext}`, or `live_machine_data.{ext}`
/// for an unfiltered export.
pub fn export_filename(machine: Option<&str>, format: ExportFormat) -> String {
    match machine {
        Some(id) => {
            let safe: String = id
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect();
            format!("{safe}_data.{}", format.extension())
        }
        None => format!("live_machine_data.{}", format.extension()),
    }
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

fn export_csv(result: &QueryResult) -> Result<Vec<u8>> {
    let mut out = String::with_capacity(64 * (result.len() + 1));
    out.push_str(&COLUMNS.join(","));
    out.push('\n');

    for r in result {
        let _ = write!(
            out,
            "{},{},{},{},{},{}",
            csv_field(&r.machine_id),
            format_timestamp(&r.timestamp),
            csv_float("temperature", r.temperature)?,
            csv_float("pressure", r.pressure)?,
            csv_float("vibration", r.vibration)?,
            r.rpm.map(|v| v.to_string()).unwrap_or_default(),
        );
        out.push('\n');
    }
    Ok(out.into_bytes())
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_float(column: &str, value: Option<f64>) -> Result<String> {
    match value {
        None => Ok(String::new()),
        Some(v) if v.is_finite() => Ok(v.to_string()),
        Some(v) => Err(Error::ExportEncoding(format!(
            "{column} value {v} cannot be written as a CSV number"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Arrow IPC
// ---------------------------------------------------------------------------

/// Arrow schema for exported rows.
pub fn export_schema() -> Schema {
    Schema::new(vec![
        Field::new("machine_id", DataType::Utf8, false),
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ),
        Field::new("temperature", DataType::Float64, true),
        Field::new("pressure", DataType::Float64, true),
        Field::new("vibration", DataType::Float64, true),
        Field::new("rpm", DataType::Int64, true),
    ])
}

fn export_arrow(result: &QueryResult) -> Result<Vec<u8>> {
    let schema = Arc::new(export_schema());

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(
            result.iter().map(|r| r.machine_id.as_str()).collect::<Vec<_>>(),
        )),
        Arc::new(
            TimestampMicrosecondArray::from(
                result
                    .iter()
                    .map(|r| r.timestamp.timestamp_micros())
                    .collect::<Vec<_>>(),
            )
            .with_timezone("UTC"),
        ),
        Arc::new(Float64Array::from(
            result.iter().map(|r| r.temperature).collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(
            result.iter().map(|r| r.pressure).collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(
            result.iter().map(|r| r.vibration).collect::<Vec<_>>(),
        )),
        Arc::new(Int64Array::from(
            result.iter().map(|r| r.rpm).collect::<Vec<_>>(),
        )),
    ];

    let batch = RecordBatch::try_new(Arc::clone(&schema), columns)?;
    let mut writer = FileWriter::try_new(Vec::new(), &schema)?;
    writer.write(&batch)?;
    writer.finish()?;
    Ok(writer.into_inner()?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TelemetryRecord;
    use arrow::array::Array;
    use arrow::ipc::reader::FileReader;
    use chrono::{Duration, TimeZone, Utc};
    use std::io::Cursor;

    fn sample() -> QueryResult {
        let base = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();
        QueryResult::from(vec![
            TelemetryRecord::new("MCH-001", base)
                .with_temperature(75.123)
                .with_pressure(30.5)
                .with_vibration(0.48)
                .with_rpm(1500),
            TelemetryRecord::new("MCH-001", base + Duration::seconds(10))
                .with_temperature(76.0)
                .with_vibration(1.2),
        ])
    }

    // -----------------------------------------------------------------------
    // Format parsing
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_formats() {
        assert_eq!("csv".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("ARROW".parse::<ExportFormat>().unwrap(), ExportFormat::ArrowIpc);
        assert!("xlsx".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_filenames() {
        assert_eq!(export_filename(Some("MCH-001"), ExportFormat::Csv), "MCH-001_data.csv");
        assert_eq!(export_filename(Some("a/b"), ExportFormat::ArrowIpc), "a_b_data.arrow");
        assert_eq!(export_filename(None, ExportFormat::Csv), "live_machine_data.csv");
    }

    // -----------------------------------------------------------------------
    // CSV
    // -----------------------------------------------------------------------

    #[test]
    fn test_csv_layout() {
        let bytes = export_rows(&sample(), ExportFormat::Csv).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "machine_id,timestamp,temperature,pressure,vibration,rpm");
        assert_eq!(lines[1], "MCH-001,2025-05-01 08:00:00,75.123,30.5,0.48,1500");
        assert_eq!(lines[2], "MCH-001,2025-05-01 08:00:10,76,,1.2,");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_csv_empty_result_is_header_only() {
        let bytes = export_rows(&QueryResult::default(), ExportFormat::Csv).unwrap();
        assert_eq!(bytes, b"machine_id,timestamp,temperature,pressure,vibration,rpm\n");
    }

    #[test]
    fn test_csv_quotes_awkward_ids() {
        let ts = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();
        let result =
            QueryResult::from(vec![TelemetryRecord::new("line \"A\",2", ts).with_vibration(0.1)]);
        let text = String::from_utf8(export_rows(&result, ExportFormat::Csv).unwrap()).unwrap();
        assert!(text.contains("\"line \"\"A\"\",2\""));
    }

    #[test]
    fn test_csv_rejects_non_finite() {
        let ts = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();
        let result = QueryResult::from(vec![TelemetryRecord::new("M1", ts).with_vibration(f64::NAN)]);
        let err = export_rows(&result, ExportFormat::Csv).unwrap_err();
        assert!(matches!(err, Error::ExportEncoding(_)));
    }

    // -----------------------------------------------------------------------
    // Arrow IPC
    // -----------------------------------------------------------------------

    #[test]
    fn test_arrow_readback() {
        let bytes = export_rows(&sample(), ExportFormat::ArrowIpc).unwrap();
        let mut reader = FileReader::try_new(Cursor::new(bytes), None).unwrap();
        let batch = reader.next().unwrap().unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), COLUMNS.len());
        for (field, name) in batch.schema().fields().iter().zip(COLUMNS) {
            assert_eq!(field.name(), name);
        }
        let rpm = batch
            .column(5)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(rpm.value(0), 1500);
        assert!(rpm.is_null(1));
    }

    #[test]
    fn test_exports_are_deterministic() {
        for format in [ExportFormat::Csv, ExportFormat::ArrowIpc] {
            let a = export_rows(&sample(), format).unwrap();
            let b = export_rows(&sample(), format).unwrap();
            assert_eq!(a, b, "{format} export differs between calls");
        }
    }
}
