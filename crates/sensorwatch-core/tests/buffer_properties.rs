//! Property-based tests for the bounded telemetry buffer.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use sensorwatch_core::{TelemetryBuffer, TelemetryRecord};

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

/// Records tagged with their arrival index in `rpm`.
fn arrivals(machines: &[u8], stamps: &[i64]) -> Vec<TelemetryRecord> {
    machines
        .iter()
        .zip(stamps)
        .enumerate()
        .map(|(i, (m, s))| {
            TelemetryRecord::new(format!("M{m}"), t(*s))
                .with_vibration(0.5)
                .with_rpm(i as i64)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// After any append sequence the buffer holds exactly the last
    /// `min(n, capacity)` arrivals.
    #[test]
    fn retains_most_recent_arrivals(
        capacity in 1usize..20,
        input in prop::collection::vec((0u8..5, 0i64..50), 0..60),
    ) {
        let (machines, stamps): (Vec<u8>, Vec<i64>) = input.into_iter().unzip();
        let records = arrivals(&machines, &stamps);
        let buffer = TelemetryBuffer::new(capacity).unwrap();
        for r in &records {
            buffer.append(r.clone());
        }

        let expected = records.len().min(capacity);
        prop_assert_eq!(buffer.len(), expected);

        let mut kept: Vec<i64> = buffer.snapshot(None).iter().filter_map(|r| r.rpm).collect();
        kept.sort_unstable();
        let first = (records.len() - expected) as i64;
        let want: Vec<i64> = (first..records.len() as i64).collect();
        prop_assert_eq!(kept, want);
    }

    /// Snapshots are timestamp-ascending with arrival order breaking ties.
    #[test]
    fn snapshot_sorted_stably(
        input in prop::collection::vec((0u8..3, 0i64..10), 1..40),
    ) {
        let (machines, stamps): (Vec<u8>, Vec<i64>) = input.into_iter().unzip();
        let buffer = TelemetryBuffer::new(100).unwrap();
        for r in arrivals(&machines, &stamps) {
            buffer.append(r);
        }
        let snap = buffer.snapshot(None);
        for pair in snap.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert!(
                a.timestamp < b.timestamp || (a.timestamp == b.timestamp && a.rpm < b.rpm)
            );
        }
    }

    /// Distinct machine IDs always match the retained records.
    #[test]
    fn distinct_ids_track_retained(
        capacity in 1usize..10,
        input in prop::collection::vec((0u8..6, 0i64..50), 0..40),
    ) {
        let (machines, stamps): (Vec<u8>, Vec<i64>) = input.into_iter().unzip();
        let buffer = TelemetryBuffer::new(capacity).unwrap();
        for r in arrivals(&machines, &stamps) {
            buffer.append(r);
        }
        let from_records: std::collections::BTreeSet<String> = buffer
            .snapshot(None)
            .iter()
            .map(|r| r.machine_id.clone())
            .collect();
        prop_assert_eq!(buffer.distinct_machine_ids(), from_records);
    }
}
