//! `sensorwatch serve`: one adapter plus the HTTP query API.

use std::path::Path;
use std::sync::Arc;

use log::warn;

use sensorwatch_core::{Result, TelemetryQuery, TelemetrySource, shutdown_channel};
use sensorwatch_server::{build_router, run_server};

use crate::{BufferArgs, SourceArgs};

pub struct ServeCommandConfig<'a> {
    pub config_path: Option<&'a Path>,
    pub source: &'a SourceArgs,
    pub buffer: &'a BufferArgs,
    pub host: Option<&'a str>,
    pub port: Option<u16>,
}

pub fn run(cmd: ServeCommandConfig<'_>) -> Result<()> {
    let mut config = super::load_config(cmd.config_path, cmd.buffer)?;
    if let Some(host) = cmd.host {
        config.server.host = host.to_string();
    }
    if let Some(port) = cmd.port {
        config.server.port = port;
    }

    let buffer = super::make_buffer(&config)?;
    let source = Arc::new(super::make_source(cmd.source, &config)?);
    let info = source.info();
    let query = TelemetryQuery::new(Arc::clone(&buffer));

    let base = format!("http://{}:{}", config.server.host, config.server.port);
    println!("📡 sensorwatch v{}", sensorwatch_core::VERSION);
    println!("   {base}");
    println!("   source: {} ({})", info.endpoint, info.kind);
    println!("   buffer: {} records", config.buffer.capacity);
    println!();
    println!("   Endpoints:");
    println!("     GET /                          API index (try: curl {base})");
    println!("     GET /machines                  Machines with retained readings");
    println!("     GET /machines/{{id}}/latest      Newest-first readings (?limit=N)");
    println!("     GET /machines/{{id}}/series      Oldest-first readings");
    println!("     GET /machines/{{id}}/alerts      Vibration alert (?threshold=X)");
    println!("     GET /machines/{{id}}/summary     Window aggregates");
    println!("     GET /export                    Download (?machine=ID&format=csv|arrow)");
    println!("     GET /health                    Buffer and ingestion status");
    println!();

    let router = build_router(
        query,
        Some((info, Arc::clone(source.stats()))),
        config.alert.clone(),
    );

    let rt = super::runtime()?;
    rt.block_on(async move {
        let (stop, shutdown) = shutdown_channel();
        let adapter = super::spawn_source(&source, &buffer, shutdown.clone());

        let host = config.server.host.clone();
        let server = run_server(router, &host, config.server.port, shutdown);
        tokio::pin!(server);

        let result = tokio::select! {
            res = &mut server => res,
            _ = super::stop_on_ctrl_c(&stop) => server.await,
        };

        // Stops the adapter when the server exited on its own (e.g. bind failure).
        let _ = stop.send(true);
        if let Err(e) = adapter.await {
            warn!("adapter task failed: {e}");
        }
        result
    })
}
