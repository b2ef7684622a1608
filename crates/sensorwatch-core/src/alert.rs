//! Vibration threshold alerting.
//!
//! A single-field policy hook: every reading whose vibration is strictly above
//! the threshold is flagged. Multi-field or hysteresis rules would replace
//! [`evaluate`], not extend it.

use serde::Serialize;

use crate::query::QueryResult;
use crate::record::TelemetryRecord;

/// Default vibration threshold in mm/s.
pub const DEFAULT_VIBRATION_THRESHOLD: f64 = 1.0;

/// Result of applying the vibration rule to a query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertOutcome {
    /// Readings above the threshold, in the order of the input.
    pub triggered_points: Vec<TelemetryRecord>,
    /// Human-readable summary.
    pub message: String,
    /// Threshold the rule was evaluated with.
    pub threshold: f64,
}

impl AlertOutcome {
    /// Whether any reading crossed the threshold.
    pub fn is_alert(&self) -> bool {
        !self.triggered_points.is_empty()
    }
}

/// Flag every record with `vibration > threshold`. Records without a
/// vibration reading never trigger.
pub fn evaluate(result: &QueryResult, threshold: f64) -> AlertOutcome {
    let triggered_points: Vec<TelemetryRecord> = result
        .iter()
        .filter(|r| r.vibration.is_some_and(|v| v > threshold))
        .cloned()
        .collect();

    let message = if triggered_points.is_empty() {
        "Vibration normal".to_string()
    } else {
        format!(
            "ALERT: {} high vibration points (> {threshold} mm/s)",
            triggered_points.len()
        )
    };

    AlertOutcome {
        triggered_points,
        message,
        threshold,
    }
}
