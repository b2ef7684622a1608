//! Telemetry record model and ingestion-time normalization.
//!
//! Both source adapters funnel their input through [`RawReading::normalize`],
//! so a feed message and a dataset row are held to the same rules.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// TelemetryRecord
// ---------------------------------------------------------------------------

/// One timestamped sensor reading for one machine.
///
/// Field declaration order is the export column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Machine identifier, never empty.
    pub machine_id: String,
    /// Reading time; ingestion wall clock when the source did not carry one.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    /// Vibration in mm/s. The only field with alert semantics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vibration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpm: Option<i64>,
}

impl TelemetryRecord {
    /// Start a record with no measurements. Use the `with_*` builders to fill it.
    pub fn new(machine_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            machine_id: machine_id.into(),
            timestamp,
            temperature: None,
            pressure: None,
            vibration: None,
            rpm: None,
        }
    }

    pub fn with_temperature(mut self, value: f64) -> Self {
        self.temperature = Some(value);
        self
    }

    pub fn with_pressure(mut self, value: f64) -> Self {
        self.pressure = Some(value);
        self
    }

    pub fn with_vibration(mut self, value: f64) -> Self {
        self.vibration = Some(value);
        self
    }

    pub fn with_rpm(mut self, value: i64) -> Self {
        self.rpm = Some(value);
        self
    }

    /// Whether the record carries at least one of temperature, pressure, vibration.
    pub fn has_measurement(&self) -> bool {
        self.temperature.is_some() || self.pressure.is_some() || self.vibration.is_some()
    }
}

// ---------------------------------------------------------------------------
// RawReading
// ---------------------------------------------------------------------------

/// An un-validated reading as delivered by a feed or read from a dataset row.
///
/// Every field is a loose JSON value so that a wrong value type is reported
/// as malformed input instead of failing deserialization of the whole message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawReading {
    #[serde(default)]
    pub machine_id: Value,
    #[serde(default)]
    pub timestamp: Value,
    #[serde(default)]
    pub temperature: Value,
    #[serde(default)]
    pub pressure: Value,
    #[serde(default)]
    pub vibration: Value,
    #[serde(default)]
    pub rpm: Value,
}

impl RawReading {
    /// Parse a JSON feed payload. Unknown keys are ignored.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| Error::malformed(format!("invalid JSON payload: {e}")))?;
        if !value.is_object() {
            return Err(Error::malformed(format!(
                "payload must be a JSON object, got {}",
                value_kind(&value)
            )));
        }
        serde_json::from_value(value)
            .map_err(|e| Error::malformed(format!("invalid payload: {e}")))
    }

    /// Validate and convert into a stored record. `now` is used when the
    /// reading carries no timestamp.
    pub fn normalize(&self, now: DateTime<Utc>) -> Result<TelemetryRecord> {
        let machine_id = match &self.machine_id {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            Value::String(_) => return Err(Error::malformed("machine_id is empty")),
            Value::Null => return Err(Error::malformed("missing machine_id")),
            other => {
                return Err(Error::malformed(format!(
                    "machine_id must be a string, got {}",
                    value_kind(other)
                )));
            }
        };

        let timestamp = match &self.timestamp {
            Value::Null => now,
            Value::String(s) => parse_timestamp(s)?,
            Value::Number(n) => {
                let secs = n
                    .as_f64()
                    .ok_or_else(|| Error::malformed("timestamp is not representable"))?;
                from_unix_secs(secs)?
            }
            other => {
                return Err(Error::malformed(format!(
                    "timestamp must be a string or number, got {}",
                    value_kind(other)
                )));
            }
        };

        let record = TelemetryRecord {
            machine_id,
            timestamp,
            temperature: measurement("temperature", &self.temperature)?,
            pressure: measurement("pressure", &self.pressure)?,
            vibration: measurement("vibration", &self.vibration)?,
            rpm: integer("rpm", &self.rpm)?,
        };

        if !record.has_measurement() {
            return Err(Error::malformed(format!(
                "reading for {} has none of temperature, pressure, vibration",
                record.machine_id
            )));
        }
        Ok(record)
    }
}

fn measurement(name: &str, value: &Value) -> Result<Option<f64>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => match n.as_f64() {
            Some(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(Error::malformed(format!("{name} is not a finite number"))),
        },
        other => Err(Error::malformed(format!(
            "{name} must be a number, got {}",
            value_kind(other)
        ))),
    }
}

fn integer(name: &str, value: &Value) -> Result<Option<i64>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(Some(i));
            }
            match n.as_f64() {
                Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Ok(Some(f as i64))
                }
                _ => Err(Error::malformed(format!("{name} must be an integer, got {n}"))),
            }
        }
        other => Err(Error::malformed(format!(
            "{name} must be an integer, got {}",
            value_kind(other)
        ))),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse a timestamp string. RFC 3339 keeps its offset (converted to UTC);
/// naive `YYYY-MM-DD HH:MM:SS[.fff]` forms are taken as UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(Error::malformed(format!("unrecognized timestamp '{s}'")))
}

fn from_unix_secs(secs: f64) -> Result<DateTime<Utc>> {
    if !secs.is_finite() {
        return Err(Error::malformed("timestamp is not finite"));
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
        .ok_or_else(|| Error::malformed(format!("timestamp {secs} out of range")))
}

/// Row-friendly timestamp: `2025-01-01 10:00:00`, with a fraction only when non-zero.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

/// RFC 3339 with millisecond precision, for logs and JSON summaries.
pub fn format_rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    // -----------------------------------------------------------------------
    // Feed payload normalization
    // -----------------------------------------------------------------------

    #[test]
    fn test_feed_payload_without_timestamp_gets_ingestion_time() {
        let raw = RawReading::from_json(
            br#"{"machine_id":"M7","temperature":81.5,"pressure":40.25,"vibration":0.42}"#,
        )
        .unwrap();
        let rec = raw.normalize(now()).unwrap();
        assert_eq!(rec.machine_id, "M7");
        assert_eq!(rec.timestamp, now());
        assert_eq!(rec.temperature, Some(81.5));
        assert_eq!(rec.vibration, Some(0.42));
        assert_eq!(rec.rpm, None);
    }

    #[test]
    fn test_missing_machine_id_is_malformed() {
        let raw = RawReading::from_json(br#"{"temperature":70.0}"#).unwrap();
        let err = raw.normalize(now()).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
        assert!(err.to_string().contains("machine_id"));
    }

    #[test]
    fn test_blank_machine_id_is_malformed() {
        let raw = RawReading::from_json(br#"{"machine_id":"  ","vibration":0.1}"#).unwrap();
        assert!(raw.normalize(now()).is_err());
    }

    #[test]
    fn test_wrong_value_type_is_malformed() {
        let raw =
            RawReading::from_json(br#"{"machine_id":"M1","temperature":"hot"}"#).unwrap();
        let err = raw.normalize(now()).unwrap_err();
        assert!(err.to_string().contains("temperature must be a number"));
    }

    #[test]
    fn test_no_measurements_is_malformed() {
        let raw = RawReading::from_json(br#"{"machine_id":"M1","rpm":1200}"#).unwrap();
        assert!(raw.normalize(now()).is_err());
    }

    #[test]
    fn test_single_measurement_is_enough() {
        let raw = RawReading::from_json(br#"{"machine_id":"M1","pressure":31.0}"#).unwrap();
        let rec = raw.normalize(now()).unwrap();
        assert_eq!(rec.pressure, Some(31.0));
        assert_eq!(rec.temperature, None);
    }

    #[test]
    fn test_invalid_json_and_non_object() {
        assert!(RawReading::from_json(b"{not json").is_err());
        assert!(RawReading::from_json(b"[1,2,3]").is_err());
    }

    #[test]
    fn test_extra_keys_ignored() {
        let raw = RawReading::from_json(
            br#"{"machine_id":"M1","vibration":0.5,"firmware":"1.2.3"}"#,
        )
        .unwrap();
        assert!(raw.normalize(now()).is_ok());
    }

    #[test]
    fn test_rpm_integral_float_accepted_fraction_rejected() {
        let ok = RawReading::from_json(br#"{"machine_id":"M1","vibration":0.5,"rpm":1500.0}"#)
            .unwrap();
        assert_eq!(ok.normalize(now()).unwrap().rpm, Some(1500));

        let bad = RawReading::from_json(br#"{"machine_id":"M1","vibration":0.5,"rpm":1500.5}"#)
            .unwrap();
        assert!(bad.normalize(now()).is_err());
    }

    #[test]
    fn test_explicit_null_treated_as_absent() {
        let raw = RawReading::from_json(
            br#"{"machine_id":"M1","timestamp":null,"vibration":0.5,"rpm":null}"#,
        )
        .unwrap();
        let rec = raw.normalize(now()).unwrap();
        assert_eq!(rec.timestamp, now());
        assert_eq!(rec.rpm, None);
    }

    // -----------------------------------------------------------------------
    // Timestamp parsing / formatting
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_dataset_timestamp() {
        let ts = parse_timestamp("2025-03-04 05:06:07").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap());
    }

    #[test]
    fn test_parse_rfc3339_with_offset() {
        let ts = parse_timestamp("2025-03-04T07:06:07+02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap());
    }

    #[test]
    fn test_parse_fractional_naive() {
        let ts = parse_timestamp("2025-03-04T05:06:07.250").unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_parse_garbage_timestamp() {
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_numeric_unix_timestamp() {
        let raw =
            RawReading::from_json(br#"{"machine_id":"M1","timestamp":1700000000,"vibration":1}"#)
                .unwrap();
        let rec = raw.normalize(now()).unwrap();
        assert_eq!(rec.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_format_timestamp_omits_zero_fraction() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(format_timestamp(&ts), "2025-03-04 05:06:07");
        assert_eq!(format_rfc3339(&ts), "2025-03-04T05:06:07.000Z");
    }

    #[test]
    fn test_record_json_omits_absent_fields() {
        let rec = TelemetryRecord::new("M1", now()).with_vibration(0.3);
        let json = serde_json::to_value(&rec).unwrap();
        assert!(json.get("rpm").is_none());
        assert!(json.get("temperature").is_none());
        assert_eq!(json["vibration"], 0.3);
    }
}
