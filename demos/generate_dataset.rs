//! Synthetic machine dataset generator.
//!
//! Writes a CSV of 20 machines × 100 readings (10 s apart) that the pull
//! adapter can poll. With a refresh period it rewrites the file on a timer so
//! a running `sensorwatch serve --dataset` sees changing data.
//!
//! Run: `cargo run --example generate_dataset -- machine_data.csv 15`

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use sensorwatch_core::{ExportFormat, QueryResult, TelemetryRecord, export_rows};

const MACHINES: usize = 20;
const RECORDS_PER_MACHINE: i64 = 100;

fn round(v: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (v * scale).round() / scale
}

fn generate() -> QueryResult {
    let mut rng = rand::rng();
    let start = Utc::now();
    let mut records = Vec::with_capacity(MACHINES * RECORDS_PER_MACHINE as usize);

    for machine in 1..=MACHINES {
        for i in 0..RECORDS_PER_MACHINE {
            records.push(
                TelemetryRecord::new(
                    format!("MCH-{machine:03}"),
                    start + chrono::Duration::seconds(i * 10),
                )
                .with_temperature(round(75.0 + rng.random_range(-10.0..10.0), 3))
                .with_pressure(round(30.0 + rng.random_range(-4.0..4.0), 2))
                .with_vibration(round(rng.random_range(0.3..1.1), 3))
                .with_rpm(rng.random_range(1000..=3000)),
            );
        }
    }
    QueryResult::from(records)
}

fn main() -> sensorwatch_core::Result<()> {
    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "machine_data.csv".to_string());
    let refresh = args
        .next()
        .map(|s| sensorwatch_core::parse_duration(&s))
        .transpose()?;

    loop {
        let rows = generate();
        std::fs::write(&path, export_rows(&rows, ExportFormat::Csv)?)?;
        println!("Wrote {} readings for {MACHINES} machines to {path}", rows.len());

        match refresh {
            Some(period) => std::thread::sleep(period.max(Duration::from_secs(1))),
            None => return Ok(()),
        }
    }
}
