//! Simulated machine feed publisher.
//!
//! Listens on a TCP address and streams one JSON reading per line to every
//! subscriber, for `sensorwatch serve --feed`.
//!
//! Run: `cargo run --example publish_feed -- 127.0.0.1:7878 2s`

use std::time::Duration;

use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

fn reading() -> String {
    let mut rng = rand::rng();
    let round2 = |v: f64| (v * 100.0).round() / 100.0;
    serde_json::json!({
        "machine_id": format!("M{}", rng.random_range(1..=20)),
        "temperature": round2(rng.random_range(70.0..100.0)),
        "pressure": round2(rng.random_range(30.0..60.0)),
        "vibration": round2(rng.random_range(0.1..1.2)),
    })
    .to_string()
}

#[tokio::main]
async fn main() -> sensorwatch_core::Result<()> {
    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:7878".to_string());
    let period = match args.next() {
        Some(s) => sensorwatch_core::parse_duration(&s)?,
        None => Duration::from_secs(2),
    }
    .max(Duration::from_millis(10));

    let listener = TcpListener::bind(&addr).await?;
    println!("Publishing readings on {addr} every {period:?}");

    loop {
        let (mut socket, peer) = listener.accept().await?;
        println!("subscriber connected: {peer}");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let mut line = reading();
                line.push('\n');
                if socket.write_all(line.as_bytes()).await.is_err() {
                    println!("subscriber left: {peer}");
                    return;
                }
            }
        });
    }
}
